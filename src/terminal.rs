//! Trusted terminal setup on a prepared stick: the `Terminal` link to the
//! copied bash, the PATH script, the session logging script, and launching.

use std::fs;
use std::io;
use std::os::unix::fs::{symlink, PermissionsExt};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use thiserror::Error;
use tracing::{debug, info};

use crate::collect::Stamp;
use crate::status::StatusLog;

pub const TERMINAL_LINK: &str = "Terminal";
pub const PATH_SCRIPT: &str = "set_path.sh";
pub const LOGGING_SCRIPT: &str = "start_logging.sh";

/// Binary directories of the stick, in PATH order.
const TRUSTED_DIRS: [&str; 5] = ["usr/bin", "bin", "usr/sbin", "sbin", "usr/X11/bin"];

#[derive(Debug, Error)]
pub enum TerminalError {
    #[error("bash not found in {}, copy binaries first", .0.display())]
    BashMissing(PathBuf),

    #[error("symbolic link {} not found, create the link first", .0.display())]
    LinkMissing(PathBuf),

    #[error("failed to write {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to open Terminal: {0}")]
    Launch(#[source] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum TerminalStep {
    /// Link `<volume>/Terminal` to the copied bash.
    Link,
    /// Write `set_path.sh`.
    Path,
    /// Write `start_logging.sh`.
    Logging,
    /// Launch Terminal.app through the link.
    Open,
}

impl TerminalStep {
    pub const ALL: [TerminalStep; 4] = [
        TerminalStep::Link,
        TerminalStep::Path,
        TerminalStep::Logging,
        TerminalStep::Open,
    ];
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> TerminalError + '_ {
    move |source| TerminalError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn write_executable(path: &Path, body: &str) -> Result<(), TerminalError> {
    fs::write(path, body).map_err(io_err(path))?;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).map_err(io_err(path))
}

/// Point `<volume>/Terminal` at `<volume>/bin/bash`, replacing any old link.
pub fn create_symlink(volume: &Path) -> Result<PathBuf, TerminalError> {
    let bash = volume.join("bin").join("bash");
    if !bash.exists() {
        return Err(TerminalError::BashMissing(bash));
    }
    let link = volume.join(TERMINAL_LINK);
    if fs::symlink_metadata(&link).is_ok() {
        fs::remove_file(&link).map_err(io_err(&link))?;
        debug!(link = %link.display(), "replaced existing link");
    }
    symlink(&bash, &link).map_err(io_err(&link))?;
    Ok(link)
}

/// `PATH=...` assignment putting only the stick's binaries on the path.
pub fn path_export(volume: &Path) -> String {
    let dirs: Vec<String> = TRUSTED_DIRS
        .iter()
        .map(|d| volume.join(d).display().to_string())
        .collect();
    format!("PATH={}", dirs.join(":"))
}

pub fn write_path_script(volume: &Path) -> Result<PathBuf, TerminalError> {
    let script = volume.join(PATH_SCRIPT);
    let body = format!(
        "#!/bin/bash\n\
         export {}\n\
         echo \"✓ PATH set to trusted binaries\"\n\
         echo \"PATH=$PATH\"\n\
         echo \"\"\n\
         echo \"Verification:\"\n\
         which bash\n\
         which ls\n",
        path_export(volume)
    );
    write_executable(&script, &body)?;
    Ok(script)
}

/// Write `start_logging.sh`, which records the session with `script` into
/// `<volume>/liveresponse_<stamp>.txt`. Returns `(script, log file)`.
pub fn write_logging_script(volume: &Path, stamp: &Stamp) -> Result<(PathBuf, PathBuf), TerminalError> {
    let script = volume.join(LOGGING_SCRIPT);
    let log = volume.join(format!("liveresponse_{}.txt", stamp));
    let rule = "=".repeat(40);
    let body = format!(
        "#!/bin/bash\n\
         # Live Response Logging - {stamp}\n\
         echo \"{rule}\"\n\
         echo \"Live Response Session Started\"\n\
         echo \"Timestamp: {stamp}\"\n\
         echo \"Log File: {log}\"\n\
         echo \"{rule}\"\n\
         echo \"\"\n\
         script {log}\n",
        stamp = stamp,
        rule = rule,
        log = log.display(),
    );
    write_executable(&script, &body)?;
    Ok((script, log))
}

/// Launch Terminal.app on the link without waiting for it.
pub fn open_terminal(volume: &Path) -> Result<PathBuf, TerminalError> {
    let link = volume.join(TERMINAL_LINK);
    if fs::symlink_metadata(&link).is_err() {
        return Err(TerminalError::LinkMissing(link));
    }
    Command::new("open")
        .arg("-a")
        .arg("Terminal")
        .arg(&link)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(TerminalError::Launch)?;
    Ok(link)
}

/// Run one step and report it on the status log.
pub fn run_step(step: TerminalStep, volume: &Path, status: &StatusLog) -> Result<(), TerminalError> {
    let res = match step {
        TerminalStep::Link => create_symlink(volume).map(|link| {
            status.ok("Symbolic link created:");
            status.info(format!("  {} → {}", link.display(), volume.join("bin/bash").display()));
        }),
        TerminalStep::Path => write_path_script(volume).map(|script| {
            status.ok(format!("PATH script created: {}", script.display()));
            status.info("➜ Execute in Terminal:");
            status.info(format!("  source {}", script.display()));
        }),
        TerminalStep::Logging => write_logging_script(volume, &Stamp::now()).map(|(script, log)| {
            status.ok(format!("Logging script created: {}", script.display()));
            status.info(format!("  Log file: {}", log.display()));
            status.info("➜ Execute in Terminal:");
            status.info(format!("  source {}", script.display()));
        }),
        TerminalStep::Open => open_terminal(volume).map(|link| {
            status.ok("Trusted Terminal opened from:");
            status.info(format!("  {}", link.display()));
        }),
    };
    if let Err(e) = &res {
        status.fail(format!("Error: {}", e));
    }
    res
}

/// Every step in order; a failing step does not stop the later ones.
pub fn prepare_all(volume: &Path, status: &StatusLog) -> Vec<(TerminalStep, Result<(), TerminalError>)> {
    status.banner("Automatic execution of all steps");
    let mut results = Vec::with_capacity(TerminalStep::ALL.len());
    for step in TerminalStep::ALL {
        if step == TerminalStep::Open {
            status.banner_ok("All steps completed");
            status.info("Opening Terminal...");
        }
        results.push((step, run_step(step, volume, status)));
    }
    info!(
        volume = %volume.display(),
        failed = results.iter().filter(|(_, r)| r.is_err()).count(),
        "terminal setup finished"
    );
    results
}
