//! Logical acquisition: `tar czf` archives of user data onto the output medium.

use std::path::Path;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::collect::{Artifact, CollectError, Collector, Stamp};
use crate::runner::CommandLine;

/// The fixed set of acquisition templates offered to the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum AcquisitionTarget {
    Users,
    Documents,
    Desktop,
    Downloads,
    MailMessages,
    Safari,
    Chrome,
    Firefox,
    Library,
    HomeDirectories,
}

impl AcquisitionTarget {
    pub const ALL: [AcquisitionTarget; 10] = [
        AcquisitionTarget::Users,
        AcquisitionTarget::Documents,
        AcquisitionTarget::Desktop,
        AcquisitionTarget::Downloads,
        AcquisitionTarget::MailMessages,
        AcquisitionTarget::Safari,
        AcquisitionTarget::Chrome,
        AcquisitionTarget::Firefox,
        AcquisitionTarget::Library,
        AcquisitionTarget::HomeDirectories,
    ];

    pub fn display_name(&self) -> &'static str {
        match self {
            AcquisitionTarget::Users => "Complete /Users Directory",
            AcquisitionTarget::Documents => "Documents Only",
            AcquisitionTarget::Desktop => "Desktop Only",
            AcquisitionTarget::Downloads => "Downloads Only",
            AcquisitionTarget::MailMessages => "Mail & Messages",
            AcquisitionTarget::Safari => "Safari History & Cache",
            AcquisitionTarget::Chrome => "Chrome Profile",
            AcquisitionTarget::Firefox => "Firefox Profile",
            AcquisitionTarget::Library => "Complete /Users/*/Library",
            AcquisitionTarget::HomeDirectories => "All User Home Directories",
        }
    }

    /// Shell path expression handed to tar; may contain globs and escapes.
    pub fn paths(&self) -> &'static str {
        match self {
            AcquisitionTarget::Users => "/Users/",
            AcquisitionTarget::Documents => "/Users/*/Documents/",
            AcquisitionTarget::Desktop => "/Users/*/Desktop/",
            AcquisitionTarget::Downloads => "/Users/*/Downloads/",
            AcquisitionTarget::MailMessages => "/Users/*/Library/Mail/ /Users/*/Library/Messages/",
            AcquisitionTarget::Safari => "/Users/*/Library/Safari/",
            AcquisitionTarget::Chrome => r"/Users/*/Library/Application\ Support/Google/Chrome/",
            AcquisitionTarget::Firefox => r"/Users/*/Library/Application\ Support/Firefox/",
            AcquisitionTarget::Library => "/Users/*/Library/",
            AcquisitionTarget::HomeDirectories => "/Users/*/",
        }
    }

    pub fn request(&self) -> AcquisitionRequest {
        AcquisitionRequest::new(self.display_name(), self.paths())
    }
}

/// What to archive and under which name.
#[derive(Debug, Clone)]
pub struct AcquisitionRequest {
    pub name: String,
    pub paths: String,
}

impl AcquisitionRequest {
    pub fn new(name: impl Into<String>, paths: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            paths: paths.into(),
        }
    }

    pub fn archive_label(&self) -> String {
        format!("{}.tar.gz", safe_name(&self.name))
    }
}

#[derive(Debug)]
pub enum AcquisitionOutcome {
    Archived(Artifact),
    /// tar exited non-zero. `kept` holds the archive when it still lists entries.
    Warning {
        excerpt: String,
        kept: Option<Artifact>,
    },
}

/// Spaces and slashes become underscores.
pub fn safe_name(name: &str) -> String {
    name.replace([' ', '/'], "_")
}

/// At most `max_chars` characters of `text`, never splitting a character.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// Archive `req.paths` into `out_dir/<stamp>_<safe name>.tar.gz`.
///
/// A non-zero tar exit is reported as a warning with a bounded error excerpt,
/// never as an error. The archive is kept only if tar can still list at least
/// one entry from it; otherwise it is removed so no empty or corrupt archive
/// is left on the medium.
pub async fn acquire(
    collector: &Collector,
    req: &AcquisitionRequest,
    out_dir: &Path,
    stamp: &Stamp,
    max_excerpt_chars: usize,
) -> Result<AcquisitionOutcome, CollectError> {
    let status = collector.status();
    status.info(format!("Starting logical acquisition: {}...", req.name));

    let label = req.archive_label();
    let file_name = stamp.file_name(&label);
    let archive = out_dir.join(&file_name);
    let cmd = CommandLine::shell(format!("tar czf \"{}\" {}", archive.display(), req.paths));

    let output = match collector.runner().run(&cmd).await {
        Ok(out) => out,
        Err(source) => {
            let e = CollectError::Spawn {
                command: cmd.to_string(),
                source,
            };
            status.fail(format!("Error: {}", e));
            return Err(e);
        }
    };

    let artifact = |bytes: u64| Artifact {
        category: "Logical Acquisition".to_string(),
        label: label.clone(),
        timestamp: stamp.to_string(),
        file_name: file_name.clone(),
        path: archive.clone(),
        bytes,
        exit_code: output.exit_code,
    };
    let archive_len = || std::fs::metadata(&archive).map(|m| m.len()).unwrap_or(0);

    if output.success() {
        info!(archive = %archive.display(), "archive written");
        status.ok(format!("Archived → {}", file_name));
        return Ok(AcquisitionOutcome::Archived(artifact(archive_len())));
    }

    let raw = if output.stderr.is_empty() {
        output.stdout_lossy()
    } else {
        output.stderr_lossy()
    };
    let excerpt = excerpt(raw.trim(), max_excerpt_chars);
    warn!(archive = %archive.display(), exit_code = ?output.exit_code, "tar reported errors");

    let kept = if archive_has_entries(collector, &archive).await {
        Some(artifact(archive_len()))
    } else {
        match tokio::fs::remove_file(&archive).await {
            Ok(()) => debug!(archive = %archive.display(), "removed unusable archive"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(CollectError::Write {
                    path: archive.clone(),
                    source: e,
                })
            }
        }
        None
    };

    match &kept {
        Some(_) => status.warn(format!("Warning: {} (partial archive kept → {})", excerpt, file_name)),
        None => status.warn(format!("Warning: {}", excerpt)),
    }
    Ok(AcquisitionOutcome::Warning { excerpt, kept })
}

async fn archive_has_entries(collector: &Collector, archive: &Path) -> bool {
    if tokio::fs::metadata(archive).await.map(|m| m.len()).unwrap_or(0) == 0 {
        return false;
    }
    let list = CommandLine::args(["tar".to_string(), "tzf".to_string(), archive.display().to_string()]);
    match collector.runner().run(&list).await {
        Ok(out) => out.success() && !out.stdout.iter().all(|b| b.is_ascii_whitespace()),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::ShellRunner;
    use crate::status::StatusLog;
    use std::sync::Arc;

    fn shell_collector() -> Collector {
        Collector::new(Arc::new(ShellRunner::default()), StatusLog::sink())
    }

    #[test]
    fn test_safe_names() {
        assert_eq!(AcquisitionTarget::Users.request().archive_label(), "Complete__Users_Directory.tar.gz");
        assert_eq!(AcquisitionTarget::MailMessages.request().archive_label(), "Mail_&_Messages.tar.gz");
        assert_eq!(AcquisitionTarget::Library.request().archive_label(), "Complete__Users_*_Library.tar.gz");
    }

    #[test]
    fn test_excerpt_is_bounded_on_char_boundary() {
        assert_eq!(excerpt("short", 200), "short");
        assert_eq!(excerpt("abcdef", 3), "abc");
        assert_eq!(excerpt("ééé", 2), "éé");
        let long = "x".repeat(1000);
        assert_eq!(excerpt(&long, 200).len(), 200);
    }

    #[test]
    fn test_templates_are_distinct() {
        let mut paths: Vec<_> = AcquisitionTarget::ALL.iter().map(|t| t.paths()).collect();
        paths.sort();
        paths.dedup();
        assert_eq!(paths.len(), AcquisitionTarget::ALL.len());
    }

    #[tokio::test]
    async fn test_missing_source_reports_bounded_warning_and_leaves_no_archive() {
        let out = tempfile::tempdir().unwrap();
        let missing = out.path().join("does-not-exist");
        let req = AcquisitionRequest::new("Documents Only", missing.display().to_string());
        let stamp = Stamp::now();

        let outcome = acquire(&shell_collector(), &req, out.path(), &stamp, 40)
            .await
            .unwrap();

        match outcome {
            AcquisitionOutcome::Warning { excerpt, kept } => {
                assert!(!excerpt.is_empty());
                assert!(excerpt.chars().count() <= 40);
                assert!(kept.is_none());
            }
            other => panic!("expected warning, got {:?}", other),
        }
        assert!(!out.path().join(stamp.file_name("Documents_Only.tar.gz")).exists());
        assert_eq!(std::fs::read_dir(out.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_existing_source_is_archived() {
        let src = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("notes.txt"), "evidence").unwrap();
        let out = tempfile::tempdir().unwrap();
        let req = AcquisitionRequest::new("Desktop Only", src.path().display().to_string());
        let stamp = Stamp::now();

        let outcome = acquire(&shell_collector(), &req, out.path(), &stamp, 200)
            .await
            .unwrap();

        match outcome {
            AcquisitionOutcome::Archived(artifact) => {
                assert_eq!(artifact.file_name, stamp.file_name("Desktop_Only.tar.gz"));
                assert!(artifact.bytes > 0);
                assert!(artifact.path.exists());
            }
            other => panic!("expected archive, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_partially_missing_sources_keep_usable_archive() {
        let src = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("mail.emlx"), "From: a@b").unwrap();
        let out = tempfile::tempdir().unwrap();
        let paths = format!(
            "{} {}",
            src.path().display(),
            src.path().join("Messages-missing").display()
        );
        let req = AcquisitionRequest::new("Mail & Messages", paths);

        let outcome = acquire(&shell_collector(), &req, out.path(), &Stamp::now(), 200)
            .await
            .unwrap();

        match outcome {
            AcquisitionOutcome::Warning { kept: Some(artifact), .. } => {
                assert!(artifact.path.exists());
            }
            other => panic!("expected kept partial archive, got {:?}", other),
        }
    }
}
