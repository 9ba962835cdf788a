//! External volume discovery via the mount root and `diskutil`.

use std::io;
use std::path::{Component, Path, PathBuf};
use std::process::Command;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::collect::CollectError;

#[derive(Debug, Error)]
pub enum VolumeError {
    #[error("failed to list volumes in {}: {source}", .path.display())]
    List {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to run diskutil: {0}")]
    Diskutil(#[source] io::Error),
}

#[derive(Debug, Clone, Serialize)]
pub struct VolumeInfo {
    pub name: String,
    pub path: PathBuf,
    /// Whole physical disk backing the volume, e.g. `disk4`.
    pub disk: Option<String>,
}

/// Names of mounted volumes under `root`, minus hidden and excluded ones, sorted.
pub fn list_external_volumes(root: &Path, excluded: &[String]) -> Result<Vec<String>, VolumeError> {
    let entries = std::fs::read_dir(root).map_err(|source| VolumeError::List {
        path: root.to_path_buf(),
        source,
    })?;

    let mut names: Vec<String> = entries
        .flatten()
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| !n.is_empty() && !n.starts_with('.'))
        .filter(|n| !excluded.iter().any(|x| x == n))
        .collect();
    names.sort();
    Ok(names)
}

/// Find the first `disk<N>` token in `line`.
/// Returns `(whole, slice)` where slice is the `s<M>` part if present.
fn disk_token(line: &str) -> Option<(&str, Option<&str>)> {
    for (start, _) in line.match_indices("disk") {
        let rest = &line[start + 4..];
        let digits = rest.bytes().take_while(|b| b.is_ascii_digit()).count();
        if digits == 0 {
            continue;
        }
        let whole = &line[start..start + 4 + digits];
        let after = &rest[digits..];
        let slice = after.strip_prefix('s').and_then(|s| {
            let n = s.bytes().take_while(|b| b.is_ascii_digit()).count();
            (n > 0).then(|| &after[..1 + n])
        });
        return Some((whole, slice));
    }
    None
}

/// Resolve the whole physical disk from `diskutil info` output.
///
/// The first "APFS Physical Store" or "Part of Whole" line decides. Without
/// either, the device identifier is used with any slice suffix removed.
pub fn parse_physical_disk(info: &str) -> Option<String> {
    let mut device_id = None;
    for line in info.lines() {
        if line.contains("APFS Physical Store") {
            if let Some((whole, Some(_))) = disk_token(line) {
                return Some(whole.to_string());
            }
        } else if line.contains("Part of Whole") {
            if let Some((whole, _)) = disk_token(line) {
                return Some(whole.to_string());
            }
        } else if line.contains("Device Identifier") {
            if let Some((whole, _)) = disk_token(line) {
                device_id = Some(whole.to_string());
            }
        }
    }
    device_id
}

/// Run `diskutil info` for a mounted volume and resolve its physical disk.
pub fn physical_disk(volume_path: &Path) -> Result<Option<String>, VolumeError> {
    let output = Command::new("diskutil")
        .arg("info")
        .arg(volume_path)
        .output()
        .map_err(VolumeError::Diskutil)?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(parse_physical_disk(&stdout))
}

/// List external volumes together with their physical disks.
/// A failing `diskutil` leaves `disk` unset rather than failing the scan.
pub fn scan(root: &Path, excluded: &[String]) -> Result<Vec<VolumeInfo>, VolumeError> {
    let names = list_external_volumes(root, excluded)?;
    let mut volumes = Vec::with_capacity(names.len());
    for name in names {
        let path = root.join(&name);
        let disk = match physical_disk(&path) {
            Ok(d) => d,
            Err(e) => {
                warn!(volume = %name, error = %e, "could not resolve physical disk");
                None
            }
        };
        debug!(volume = %name, ?disk, "volume found");
        volumes.push(VolumeInfo { name, path, disk });
    }
    Ok(volumes)
}

/// Path of a named volume directly under `root`, which must exist.
/// Names that are empty or that are not a single plain path component are refused.
pub fn resolve_destination(root: &Path, name: &str) -> Result<PathBuf, CollectError> {
    let path = root.join(name);
    let mut parts = Path::new(name).components();
    let plain = matches!((parts.next(), parts.next()), (Some(Component::Normal(_)), None));
    if !plain || !path.is_dir() {
        return Err(CollectError::TargetUnavailable { path });
    }
    Ok(path)
}
