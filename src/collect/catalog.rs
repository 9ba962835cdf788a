//! The fixed live-response command catalog.
//!
//! Command lines and file suffixes are part of the forensic record format;
//! documentation and playbooks refer to them verbatim.

use std::path::PathBuf;

use serde::Serialize;

use super::{CommandSpec, Step};
use crate::config::CollectionConfig;

/// Named, ordered group of steps.
#[derive(Debug, Clone)]
pub struct Category {
    pub name: String,
    pub steps: Vec<Step>,
}

/// Target-system paths some steps read from.
#[derive(Debug, Clone)]
pub struct CatalogPaths {
    pub users_root: PathBuf,
    pub system_log: PathBuf,
}

impl From<&CollectionConfig> for CatalogPaths {
    fn from(cfg: &CollectionConfig) -> Self {
        Self {
            users_root: cfg.users_root.clone(),
            system_log: cfg.system_log.clone(),
        }
    }
}

impl Default for CatalogPaths {
    fn default() -> Self {
        Self::from(&CollectionConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum CategoryKind {
    SystemInfo,
    #[value(name = "filevault")]
    #[serde(rename = "filevault")]
    FileVault,
    Processes,
    Network,
    Users,
    Logs,
}

impl CategoryKind {
    /// Full-run order.
    pub const ALL: [CategoryKind; 6] = [
        CategoryKind::SystemInfo,
        CategoryKind::FileVault,
        CategoryKind::Processes,
        CategoryKind::Network,
        CategoryKind::Users,
        CategoryKind::Logs,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            CategoryKind::SystemInfo => "System Info",
            CategoryKind::FileVault => "FileVault",
            CategoryKind::Processes => "Processes",
            CategoryKind::Network => "Network Info",
            CategoryKind::Users => "Users",
            CategoryKind::Logs => "Logs",
        }
    }

    pub fn build(&self, paths: &CatalogPaths) -> Category {
        let steps: Vec<Step> = match self {
            CategoryKind::SystemInfo => vec![
                CommandSpec::shell("system_profiler", "system.txt", "System Profiler").into(),
                CommandSpec::shell(
                    "system_profiler SPHardwareDataType",
                    "hardware.txt",
                    "Hardware Details",
                )
                .into(),
                CommandSpec::shell("nvram -xp", "nvram.txt", "NVRAM").into(),
                CommandSpec::shell("kextstat", "kextstat.txt", "Kernel Extensions").into(),
            ],
            CategoryKind::FileVault => vec![
                CommandSpec::shell("sudo fdesetup status", "fv.txt", "FileVault Status").into(),
                CommandSpec::shell("diskutil apfs list", "apfs.txt", "APFS Container").into(),
                CommandSpec::shell("sudo fdesetup list", "fv_users.txt", "FileVault Users").into(),
            ],
            CategoryKind::Processes => vec![
                CommandSpec::shell("ps aux", "processes.txt", "Process List").into(),
                CommandSpec::shell("launchctl list", "services.txt", "Services").into(),
                CommandSpec::shell("lsof", "open_files.txt", "Open Files").into(),
                CommandSpec::shell("lsof -i", "network_connections.txt", "Network Connections")
                    .into(),
            ],
            CategoryKind::Network => vec![
                CommandSpec::shell("netstat -an", "netstat.txt", "Network Status").into(),
                CommandSpec::shell("netstat -r", "routing.txt", "Routing Table").into(),
                CommandSpec::shell("sharing -l", "sharing.txt", "Sharing Services").into(),
            ],
            CategoryKind::Users => vec![
                CommandSpec::shell("who", "active_users.txt", "Active Users").into(),
                CommandSpec::shell("last", "login_history.txt", "Login History").into(),
                Step::ShellHistory {
                    users_root: paths.users_root.clone(),
                    label: "shell_history.txt".to_string(),
                },
            ],
            CategoryKind::Logs => vec![
                Step::CopyFile {
                    source: paths.system_log.clone(),
                    label: "system.log".to_string(),
                    description: "system.log".to_string(),
                },
                CommandSpec::shell(
                    "log show --last 24h",
                    "unified_logs_24h.txt",
                    "Unified Logs (24h)",
                )
                .into(),
                CommandSpec::shell(
                    r#"log show --predicate 'subsystem == "com.apple.security"' --last 24h"#,
                    "security_logs.txt",
                    "Security Logs",
                )
                .into(),
            ],
        };

        Category {
            name: self.name().to_string(),
            steps,
        }
    }
}

/// Every category, in full-run order.
pub fn full_run(paths: &CatalogPaths) -> Vec<Category> {
    CategoryKind::ALL.iter().map(|k| k.build(paths)).collect()
}
