//! SHA-256 checksum manifest over collected artifacts.
//!
//! The manifest uses the `shasum -a 256` line format (`<hex>  <name>`) so the
//! output medium can be verified later with stock tools.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::collect::CollectError;
use crate::status::StatusLog;

pub const MANIFEST_FILE_NAME: &str = "checksums.txt";

/// File name suffixes covered by the manifest.
pub const HASHED_SUFFIXES: [&str; 3] = [".txt", ".log", ".tar.gz"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestEntry {
    pub digest: String,
    pub file_name: String,
}

impl ManifestEntry {
    pub fn to_line(&self) -> String {
        format!("{}  {}", self.digest, self.file_name)
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ManifestResult {
    Written {
        path: PathBuf,
        entries: Vec<ManifestEntry>,
    },
    NothingToHash,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum VerifyStatus {
    Ok,
    Mismatch { actual: String },
    Missing,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifyEntry {
    pub file_name: String,
    pub status: VerifyStatus,
}

pub fn is_eligible(file_name: &str) -> bool {
    file_name != MANIFEST_FILE_NAME && HASHED_SUFFIXES.iter().any(|s| file_name.ends_with(s))
}

/// Streamed SHA-256 of a file, lowercase hex.
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Parse one manifest line. Accepts the binary-mode `*` marker.
pub fn parse_manifest_line(line: &str) -> Option<ManifestEntry> {
    let (digest, rest) = line.split_once(' ')?;
    if digest.len() != 64 || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let name = rest
        .strip_prefix(' ')
        .or_else(|| rest.strip_prefix('*'))?;
    if name.is_empty() {
        return None;
    }
    Some(ManifestEntry {
        digest: digest.to_ascii_lowercase(),
        file_name: name.to_string(),
    })
}

fn eligible_files(dir: &Path) -> Result<Vec<String>, CollectError> {
    let read_err = |source: io::Error| CollectError::Read {
        path: dir.to_path_buf(),
        source,
    };
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(read_err)? {
        let entry = entry.map_err(read_err)?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !is_eligible(&name) {
            continue;
        }
        if entry.metadata().map(|m| m.is_file()).unwrap_or(false) {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

/// Hash every eligible file in `dir` and write `checksums.txt`.
///
/// With no eligible file nothing is written.
pub fn hash_artifacts(dir: &Path) -> Result<ManifestResult, CollectError> {
    let names = eligible_files(dir)?;
    if names.is_empty() {
        debug!(dir = %dir.display(), "no artifacts to hash");
        return Ok(ManifestResult::NothingToHash);
    }

    let mut entries = Vec::with_capacity(names.len());
    for name in names {
        let path = dir.join(&name);
        let digest = sha256_file(&path).map_err(|source| CollectError::Read { path, source })?;
        entries.push(ManifestEntry {
            digest,
            file_name: name,
        });
    }

    let mut body = String::new();
    for entry in &entries {
        body.push_str(&entry.to_line());
        body.push('\n');
    }

    let path = dir.join(MANIFEST_FILE_NAME);
    std::fs::write(&path, body).map_err(|source| CollectError::Write {
        path: path.clone(),
        source,
    })?;
    info!(path = %path.display(), files = entries.len(), "manifest written");

    Ok(ManifestResult::Written { path, entries })
}

/// Re-hash every file listed in `dir/checksums.txt`.
pub fn verify_manifest(dir: &Path) -> Result<Vec<VerifyEntry>, CollectError> {
    let manifest = dir.join(MANIFEST_FILE_NAME);
    let text = std::fs::read_to_string(&manifest).map_err(|source| CollectError::Read {
        path: manifest.clone(),
        source,
    })?;

    let mut results = Vec::new();
    for entry in text.lines().filter_map(parse_manifest_line) {
        let path = dir.join(&entry.file_name);
        let status = match sha256_file(&path) {
            Ok(actual) if actual == entry.digest => VerifyStatus::Ok,
            Ok(actual) => VerifyStatus::Mismatch { actual },
            Err(e) if e.kind() == io::ErrorKind::NotFound => VerifyStatus::Missing,
            Err(source) => return Err(CollectError::Read { path, source }),
        };
        results.push(VerifyEntry {
            file_name: entry.file_name,
            status,
        });
    }
    Ok(results)
}

/// Hash on the blocking pool and report the outcome on the status log.
pub async fn hash_and_report(
    dir: &Path,
    status: &StatusLog,
) -> Result<ManifestResult, CollectError> {
    status.info("Creating SHA-256 hashes...");
    let owned = dir.to_path_buf();
    let result = match tokio::task::spawn_blocking(move || hash_artifacts(&owned)).await {
        Ok(r) => r,
        Err(e) => Err(CollectError::Task(e)),
    };

    match &result {
        Ok(ManifestResult::Written { .. }) => {
            status.ok(format!("Hashes created → {}", MANIFEST_FILE_NAME))
        }
        Ok(ManifestResult::NothingToHash) => status.warn("No files found to hash"),
        Err(e) => status.fail(format!("Error: {}", e)),
    }
    result
}

/// Verify on the blocking pool and report each entry.
pub async fn verify_and_report(
    dir: &Path,
    status: &StatusLog,
) -> Result<Vec<VerifyEntry>, CollectError> {
    status.info(format!("Verifying {}...", MANIFEST_FILE_NAME));
    let owned = dir.to_path_buf();
    let result = match tokio::task::spawn_blocking(move || verify_manifest(&owned)).await {
        Ok(r) => r,
        Err(e) => Err(CollectError::Task(e)),
    };

    match &result {
        Ok(entries) => {
            for entry in entries {
                match &entry.status {
                    VerifyStatus::Ok => status.ok(format!("{}: OK", entry.file_name)),
                    VerifyStatus::Mismatch { .. } => {
                        status.fail(format!("{}: FAILED", entry.file_name))
                    }
                    VerifyStatus::Missing => status.warn(format!("{}: missing", entry.file_name)),
                }
            }
        }
        Err(e) => status.fail(format!("Error: {}", e)),
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    // sha256("hello\n")
    const HELLO_DIGEST: &str = "5891b5b522d5df086d0ff0b110fbd9d21bb4fc7163af34d08286a2e846f6be03";

    #[test]
    fn test_single_known_artifact() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("20240101_120000_processes.txt"), "hello\n").unwrap();

        let result = hash_artifacts(dir.path()).unwrap();
        assert!(matches!(result, ManifestResult::Written { ref entries, .. } if entries.len() == 1));

        let manifest = fs::read_to_string(dir.path().join(MANIFEST_FILE_NAME)).unwrap();
        assert_eq!(
            manifest,
            format!("{}  20240101_120000_processes.txt\n", HELLO_DIGEST)
        );
    }

    #[test]
    fn test_n_files_n_lines_and_reproducible() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a_netstat.txt"), "x").unwrap();
        fs::write(dir.path().join("a_system.log"), "y").unwrap();
        fs::write(dir.path().join("a_Documents_Only.tar.gz"), [0u8, 1, 2]).unwrap();
        fs::write(dir.path().join("set_path.sh"), "#!/bin/bash\n").unwrap();
        fs::create_dir(dir.path().join("nested.txt")).unwrap();

        hash_artifacts(dir.path()).unwrap();
        let first = fs::read_to_string(dir.path().join(MANIFEST_FILE_NAME)).unwrap();
        assert_eq!(first.lines().count(), 3);
        for line in first.lines() {
            assert!(parse_manifest_line(line).is_some(), "bad line {}", line);
        }

        // The manifest itself is never hashed, so a second pass is identical.
        hash_artifacts(dir.path()).unwrap();
        let second = fs::read_to_string(dir.path().join(MANIFEST_FILE_NAME)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_nothing_to_hash_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("start_logging.sh"), "script x\n").unwrap();

        let result = hash_artifacts(dir.path()).unwrap();
        assert!(matches!(result, ManifestResult::NothingToHash));
        assert!(!dir.path().join(MANIFEST_FILE_NAME).exists());
    }

    #[test]
    fn test_parse_line_variants() {
        let ok = parse_manifest_line(&format!("{}  file name.txt", HELLO_DIGEST)).unwrap();
        assert_eq!(ok.file_name, "file name.txt");
        let bin = parse_manifest_line(&format!("{} *file.tar.gz", HELLO_DIGEST)).unwrap();
        assert_eq!(bin.file_name, "file.tar.gz");
        assert!(parse_manifest_line("abc  file.txt").is_none());
        assert!(parse_manifest_line(&format!("{}  ", HELLO_DIGEST)).is_none());
        assert!(parse_manifest_line("").is_none());
    }

    #[test]
    fn test_verify_detects_changes() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "hello\n").unwrap();
        fs::write(dir.path().join("b.txt"), "hello\n").unwrap();
        fs::write(dir.path().join("c.txt"), "hello\n").unwrap();
        hash_artifacts(dir.path()).unwrap();

        fs::write(dir.path().join("b.txt"), "tampered\n").unwrap();
        fs::remove_file(dir.path().join("c.txt")).unwrap();

        let results = verify_manifest(dir.path()).unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].status, VerifyStatus::Ok);
        assert!(matches!(results[1].status, VerifyStatus::Mismatch { .. }));
        assert_eq!(results[2].status, VerifyStatus::Missing);
    }

    #[test]
    fn test_verify_without_manifest_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            verify_manifest(dir.path()),
            Err(CollectError::Read { .. })
        ));
    }

    #[tokio::test]
    async fn test_hash_and_report_status_lines() {
        let dir = tempfile::tempdir().unwrap();
        let (status, mut rx) = StatusLog::channel();

        hash_and_report(dir.path(), &status).await.unwrap();
        let lines = crate::status::drain(&mut rx);
        assert_eq!(lines.last().unwrap().to_string(), "⚠ No files found to hash");

        fs::write(dir.path().join("x.txt"), "1").unwrap();
        hash_and_report(dir.path(), &status).await.unwrap();
        let lines = crate::status::drain(&mut rx);
        assert_eq!(lines.last().unwrap().to_string(), "✓ Hashes created → checksums.txt");
    }
}
