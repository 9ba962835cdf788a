//! Live-response collection pipeline.
//!
//! A `Collector` runs command specs through a `CommandRunner` and persists each
//! result as a flat `<stamp>_<label>` artifact in the destination directory.
//! Failures are captured per step and reported on the status log; nothing
//! propagates across step, category or run boundaries.

pub mod catalog;
pub mod history;
pub mod run;

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::runner::{CommandLine, CommandOutput, CommandRunner};
use crate::status::StatusLog;

pub use self::catalog::{CatalogPaths, Category, CategoryKind};
pub use self::run::{abort_run, execute_full_run, RunOptions, RunResult, RunState};

/// `chrono` format of the per-run timestamp.
pub const STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Separator written between captured stdout and stderr.
pub const STDERR_MARKER: &str = "\n\n--- STDERR ---\n";

#[derive(Debug, Error)]
pub enum CollectError {
    #[error("no output medium selected")]
    NoDestination,

    #[error("output location {} is not available", .path.display())]
    TargetUnavailable { path: PathBuf },

    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("`{command}` exited with {}: {stderr}", exit_label(.code))]
    ProcessFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("code {}", c),
        None => "a signal".to_string(),
    }
}

/// Check that `dir` is an existing directory before any work is started.
pub fn require_destination(dir: Option<&Path>) -> Result<&Path, CollectError> {
    let dir = dir.ok_or(CollectError::NoDestination)?;
    if dir.is_dir() {
        Ok(dir)
    } else {
        Err(CollectError::TargetUnavailable {
            path: dir.to_path_buf(),
        })
    }
}

// ---------------------------------------------------------------------------
// Stamp
// ---------------------------------------------------------------------------

/// `YYYYMMDD_HHMMSS` timestamp shared by every artifact of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Stamp(String);

impl Stamp {
    pub fn now() -> Self {
        Self::at(&Local::now())
    }

    pub fn at<Tz: TimeZone>(dt: &DateTime<Tz>) -> Self
    where
        Tz::Offset: fmt::Display,
    {
        Stamp(dt.format(STAMP_FORMAT).to_string())
    }

    /// Accepts only well-formed stamps.
    pub fn parse(s: &str) -> Option<Self> {
        NaiveDateTime::parse_from_str(s, STAMP_FORMAT)
            .ok()
            .map(|_| Stamp(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Artifact file name for `label` under this stamp.
    pub fn file_name(&self, label: &str) -> String {
        format!("{}_{}", self.0, label)
    }
}

impl fmt::Display for Stamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Specs and artifacts
// ---------------------------------------------------------------------------

/// One external command of a category.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub command: CommandLine,
    /// File name suffix, e.g. `processes.txt`.
    pub label: String,
    pub description: String,
}

impl CommandSpec {
    pub fn shell(cmd: &str, label: &str, description: &str) -> Self {
        Self {
            command: CommandLine::shell(cmd),
            label: label.to_string(),
            description: description.to_string(),
        }
    }
}

/// A unit of work inside a category.
#[derive(Debug, Clone)]
pub enum Step {
    Command(CommandSpec),
    /// Concatenated shell histories of every account under `users_root`.
    ShellHistory { users_root: PathBuf, label: String },
    /// Verbatim copy of a file from the target system.
    CopyFile {
        source: PathBuf,
        label: String,
        description: String,
    },
}

impl Step {
    pub fn label(&self) -> &str {
        match self {
            Step::Command(spec) => &spec.label,
            Step::ShellHistory { label, .. } | Step::CopyFile { label, .. } => label,
        }
    }

    pub fn description(&self) -> &str {
        match self {
            Step::Command(spec) => &spec.description,
            Step::ShellHistory { .. } => "Shell Histories",
            Step::CopyFile { description, .. } => description,
        }
    }
}

impl From<CommandSpec> for Step {
    fn from(spec: CommandSpec) -> Self {
        Step::Command(spec)
    }
}

/// A file written by the pipeline. Never modified afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct Artifact {
    pub category: String,
    pub label: String,
    pub timestamp: String,
    pub file_name: String,
    pub path: PathBuf,
    pub bytes: u64,
    /// Exit code of the producing process, when there was one.
    pub exit_code: Option<i32>,
}

/// Every step's result for one category, in step order.
#[derive(Debug)]
pub struct CategoryOutcome {
    pub name: String,
    pub results: Vec<Result<Artifact, CollectError>>,
}

impl CategoryOutcome {
    pub fn artifacts(&self) -> impl Iterator<Item = &Artifact> {
        self.results.iter().filter_map(|r| r.as_ref().ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = &CollectError> {
        self.results.iter().filter_map(|r| r.as_ref().err())
    }
}

/// Artifact body: stdout, then the stderr block iff stderr is non-empty.
pub fn render_output(output: &CommandOutput) -> Vec<u8> {
    let mut content = Vec::with_capacity(output.stdout.len() + output.stderr.len() + 16);
    content.extend_from_slice(&output.stdout);
    if !output.stderr.is_empty() {
        content.extend_from_slice(STDERR_MARKER.as_bytes());
        content.extend_from_slice(&output.stderr);
    }
    content
}

// ---------------------------------------------------------------------------
// Collector
// ---------------------------------------------------------------------------

/// Executes steps and writes artifacts.
#[derive(Clone)]
pub struct Collector {
    runner: Arc<dyn CommandRunner>,
    status: StatusLog,
}

impl Collector {
    pub fn new(runner: Arc<dyn CommandRunner>, status: StatusLog) -> Self {
        Self { runner, status }
    }

    pub fn runner(&self) -> &dyn CommandRunner {
        self.runner.as_ref()
    }

    pub fn status(&self) -> &StatusLog {
        &self.status
    }

    /// Run one command and write its output to `out_dir/<stamp>_<label>`.
    pub async fn execute(
        &self,
        category: &str,
        spec: &CommandSpec,
        out_dir: &Path,
        stamp: &Stamp,
    ) -> Result<Artifact, CollectError> {
        self.status.info(format!("Executing: {}...", spec.description));

        let result = self.execute_inner(category, spec, out_dir, stamp).await;
        match &result {
            Ok(artifact) if artifact.exit_code == Some(0) => {
                self.status
                    .ok(format!("{} → {}", spec.description, artifact.file_name));
            }
            Ok(artifact) => {
                let exit = match artifact.exit_code {
                    Some(code) => format!("exit code {}", code),
                    None => "killed by signal".to_string(),
                };
                self.status.warn(format!(
                    "{} → {} ({})",
                    spec.description, artifact.file_name, exit
                ));
            }
            Err(e) => {
                self.status
                    .fail(format!("Error in {}: {}", spec.description, e));
            }
        }
        result
    }

    async fn execute_inner(
        &self,
        category: &str,
        spec: &CommandSpec,
        out_dir: &Path,
        stamp: &Stamp,
    ) -> Result<Artifact, CollectError> {
        let output = self
            .runner
            .run(&spec.command)
            .await
            .map_err(|source| CollectError::Spawn {
                command: spec.command.to_string(),
                source,
            })?;

        let content = render_output(&output);
        let file_name = stamp.file_name(&spec.label);
        let path = out_dir.join(&file_name);
        write_artifact(&path, &content).await?;

        debug!(
            category,
            label = %spec.label,
            path = %path.display(),
            exit_code = ?output.exit_code,
            bytes = content.len(),
            "artifact written"
        );

        Ok(Artifact {
            category: category.to_string(),
            label: spec.label.clone(),
            timestamp: stamp.to_string(),
            file_name,
            path,
            bytes: content.len() as u64,
            exit_code: output.exit_code,
        })
    }

    /// Run every step of `category` in order. One result per step, no short-circuit.
    pub async fn execute_category(
        &self,
        category: &Category,
        out_dir: &Path,
        stamp: &Stamp,
    ) -> CategoryOutcome {
        info!(category = %category.name, steps = category.steps.len(), "collecting category");

        let mut results = Vec::with_capacity(category.steps.len());
        for step in &category.steps {
            let res = match step {
                Step::Command(spec) => self.execute(&category.name, spec, out_dir, stamp).await,
                Step::ShellHistory { users_root, label } => {
                    self.collect_history(&category.name, users_root, label, out_dir, stamp)
                        .await
                }
                Step::CopyFile {
                    source,
                    label,
                    description,
                } => {
                    self.copy_file(&category.name, source, label, description, out_dir, stamp)
                        .await
                }
            };
            results.push(res);
        }

        CategoryOutcome {
            name: category.name.clone(),
            results,
        }
    }

    async fn collect_history(
        &self,
        category: &str,
        users_root: &Path,
        label: &str,
        out_dir: &Path,
        stamp: &Stamp,
    ) -> Result<Artifact, CollectError> {
        self.status.info("Collecting shell histories...");

        let result = async {
            let report = history::aggregate(users_root).await?;
            let file_name = stamp.file_name(label);
            let path = out_dir.join(&file_name);
            write_artifact(&path, &report.content).await?;
            debug!(
                included = report.included.len(),
                skipped = report.skipped,
                "shell histories aggregated"
            );
            Ok::<_, CollectError>(Artifact {
                category: category.to_string(),
                label: label.to_string(),
                timestamp: stamp.to_string(),
                file_name,
                path,
                bytes: report.content.len() as u64,
                exit_code: None,
            })
        }
        .await;

        match &result {
            Ok(artifact) => self
                .status
                .ok(format!("Shell Histories → {}", artifact.file_name)),
            Err(e) => self.status.fail(format!("Shell history error: {}", e)),
        }
        result
    }

    async fn copy_file(
        &self,
        category: &str,
        source: &Path,
        label: &str,
        description: &str,
        out_dir: &Path,
        stamp: &Stamp,
    ) -> Result<Artifact, CollectError> {
        self.status.info(format!("Copying {}...", description));

        let file_name = stamp.file_name(label);
        let path = out_dir.join(&file_name);
        let cmd = CommandLine::args([
            "cp".to_string(),
            source.display().to_string(),
            path.display().to_string(),
        ]);

        let result = async {
            let output = self
                .runner
                .run(&cmd)
                .await
                .map_err(|source| CollectError::Spawn {
                    command: cmd.to_string(),
                    source,
                })?;
            if !output.success() {
                return Err(CollectError::ProcessFailed {
                    command: cmd.to_string(),
                    code: output.exit_code,
                    stderr: output.stderr_lossy().trim().to_string(),
                });
            }
            let bytes = tokio::fs::metadata(&path)
                .await
                .map(|m| m.len())
                .unwrap_or(0);
            Ok::<_, CollectError>(Artifact {
                category: category.to_string(),
                label: label.to_string(),
                timestamp: stamp.to_string(),
                file_name: file_name.clone(),
                path: path.clone(),
                bytes,
                exit_code: output.exit_code,
            })
        }
        .await;

        match &result {
            Ok(_) => self.status.ok(format!("{} copied", description)),
            Err(e) => self.status.fail(format!("Error: {}", e)),
        }
        result
    }
}

/// Whole-file write of an artifact.
pub(crate) async fn write_artifact(path: &Path, content: &[u8]) -> Result<(), CollectError> {
    tokio::fs::write(path, content)
        .await
        .map_err(|source| CollectError::Write {
            path: path.to_path_buf(),
            source,
        })
}
