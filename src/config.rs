//! TOML configuration for forensic-usb.
//!
//! A layered configuration model with sensible defaults: an explicit `--config`
//! path, then the `FORENSIC_USB_CONFIG` environment variable, then the standard
//! system location, then compiled-in defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub const CONFIG_ENV: &str = "FORENSIC_USB_CONFIG";
pub const SYSTEM_CONFIG_PATH: &str = "/etc/forensic-usb/forensic-usb.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub volumes: VolumesConfig,
    #[serde(default)]
    pub collection: CollectionConfig,
    #[serde(default)]
    pub prepare: PrepareConfig,
    #[serde(default)]
    pub workers: WorkersConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Resolve the configuration.
    ///
    /// An explicit path must load; it is the operator asking for that file.
    /// The env var and system locations fall through to defaults on error.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "{} set but file could not be loaded, trying fallback",
                        CONFIG_ENV
                    );
                }
            }
        }

        let system_path = Path::new(SYSTEM_CONFIG_PATH);
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "system config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Ok(Self::default())
    }
}

// ---------------------------------------------------------------------------
// Volumes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumesConfig {
    /// Directory where external volumes are mounted.
    pub root: PathBuf,
    /// Volume names never offered as a USB target (the boot volume).
    pub excluded: Vec<String>,
}

impl Default for VolumesConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/Volumes"),
            excluded: vec!["Macintosh HD".to_string()],
        }
    }
}

// ---------------------------------------------------------------------------
// Collection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionConfig {
    /// Parent of the per-user home directories scanned for shell history.
    pub users_root: PathBuf,
    /// Log file copied verbatim by the Logs category.
    pub system_log: PathBuf,
    /// Pause between categories of a full run.
    pub inter_category_delay_ms: u64,
    /// Pause after the last category, before hashing.
    pub pre_hash_delay_ms: u64,
    /// Longest error excerpt reported for a failed archive.
    pub error_excerpt_chars: usize,
    /// Shell used for string command lines.
    pub shell: String,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            users_root: PathBuf::from("/Users"),
            system_log: PathBuf::from("/var/log/system.log"),
            inter_category_delay_ms: 2000,
            pre_hash_delay_ms: 5000,
            error_excerpt_chars: 200,
            shell: "/bin/sh".to_string(),
        }
    }
}

impl CollectionConfig {
    pub fn inter_category_delay(&self) -> Duration {
        Duration::from_millis(self.inter_category_delay_ms)
    }

    pub fn pre_hash_delay(&self) -> Duration {
        Duration::from_millis(self.pre_hash_delay_ms)
    }
}

// ---------------------------------------------------------------------------
// Prepare
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrepareConfig {
    /// Binary directories copied recursively onto the stick, in order.
    pub directories: Vec<PathBuf>,
    /// Individual binaries copied after the directories.
    pub extra_binaries: Vec<PathBuf>,
    /// Prefix copies with `sudo`.
    pub use_sudo: bool,
}

impl Default for PrepareConfig {
    fn default() -> Self {
        Self {
            directories: ["/usr/bin", "/bin", "/usr/sbin", "/sbin", "/usr/X11/bin"]
                .into_iter()
                .map(PathBuf::from)
                .collect(),
            extra_binaries: vec![PathBuf::from("/usr/sbin/system_profiler")],
            use_sudo: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Workers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkersConfig {
    /// Upper bound on background jobs running at once.
    pub max_concurrent: usize,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self { max_concurrent: 4 }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum tracing level (`trace`, `debug`, `info`, `warn`, `error`).
    pub level: String,
    /// Emit tracing output as JSON lines.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
