//! Preparing a USB stick with trusted copies of the system binaries.

use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::PrepareConfig;
use crate::runner::{CommandLine, CommandRunner};
use crate::status::StatusLog;

#[derive(Debug, Error)]
pub enum PrepareError {
    #[error("volume '{}' not found, format the USB stick first", .0.display())]
    VolumeMissing(PathBuf),
}

#[derive(Debug, Default, Serialize)]
pub struct CopyReport {
    pub copied: Vec<PathBuf>,
    pub missing: Vec<PathBuf>,
    /// Source path and the error text of each failed copy.
    pub failed: Vec<(PathBuf, String)>,
}

impl CopyReport {
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.failed.is_empty()
    }
}

fn copy_command(cfg: &PrepareConfig, source: &Path, dest: &Path, recursive: bool) -> CommandLine {
    let mut argv = Vec::with_capacity(5);
    if cfg.use_sudo {
        argv.push("sudo".to_string());
    }
    argv.push("cp".to_string());
    if recursive {
        argv.push("-r".to_string());
    }
    argv.push(source.display().to_string());
    argv.push(dest.display().to_string());
    CommandLine::args(argv)
}

fn item_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Copy the configured binary directories, then the extra binaries, onto
/// `volume`. A missing source or failed copy is reported and skipped.
pub async fn copy_binaries(
    runner: &dyn CommandRunner,
    status: &StatusLog,
    cfg: &PrepareConfig,
    volume: &Path,
    name: &str,
) -> Result<CopyReport, PrepareError> {
    if !tokio::fs::metadata(volume).await.map(|m| m.is_dir()).unwrap_or(false) {
        status.fail(format!("Volume '{}' not found!", name));
        return Err(PrepareError::VolumeMissing(volume.to_path_buf()));
    }

    status.info("Starting copy process (sudo required)...");
    let total = cfg.directories.len() + cfg.extra_binaries.len();
    let jobs = cfg
        .directories
        .iter()
        .map(|d| (d, true))
        .chain(cfg.extra_binaries.iter().map(|b| (b, false)));

    let mut report = CopyReport::default();
    for (i, (source, recursive)) in jobs.enumerate() {
        let shown = if recursive {
            source.display().to_string()
        } else {
            item_name(source)
        };
        if tokio::fs::symlink_metadata(source).await.is_err() {
            status.warn(format!("{} not found", shown));
            report.missing.push(source.clone());
            continue;
        }

        status.info(format!("[{}/{}] Copying {}...", i + 1, total, shown));
        let cmd = copy_command(cfg, source, volume, recursive);
        match runner.run(&cmd).await {
            Ok(out) if out.success() => {
                status.ok(format!("{} copied", shown));
                report.copied.push(source.clone());
            }
            Ok(out) => {
                let err = out.stderr_lossy().trim().to_string();
                warn!(source = %source.display(), exit_code = ?out.exit_code, "copy failed");
                status.warn(format!("{}: {}", shown, err));
                report.failed.push((source.clone(), err));
            }
            Err(e) => {
                warn!(source = %source.display(), error = %e, "copy could not start");
                status.warn(format!("{}: {}", shown, e));
                report.failed.push((source.clone(), e.to_string()));
            }
        }
    }

    info!(
        volume = %volume.display(),
        copied = report.copied.len(),
        missing = report.missing.len(),
        failed = report.failed.len(),
        "binary copy finished"
    );
    let rule = "=".repeat(50);
    status.info(rule.clone());
    status.ok("Copy process completed!");
    status.ok(format!("USB stick '{}' is ready for Live Response.", name));
    status.info(rule);
    Ok(report)
}
