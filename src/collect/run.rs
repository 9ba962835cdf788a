//! Full live-response run: every category in order, paced, then hashed.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use super::{require_destination, Category, CategoryOutcome, CollectError, Collector, Stamp};
use crate::manifest::{self, ManifestResult};
use crate::status::StatusLog;

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Pause between two categories.
    pub inter_category_delay: Duration,
    /// Pause after the last category, before hashing.
    pub pre_hash_delay: Duration,
    /// Observed only between categories; a started category always finishes.
    pub cancel: CancellationToken,
}

impl RunOptions {
    pub fn new(inter_category_delay: Duration, pre_hash_delay: Duration) -> Self {
        Self {
            inter_category_delay,
            pre_hash_delay,
            cancel: CancellationToken::new(),
        }
    }

    /// No pacing at all.
    pub fn immediate() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Completed,
    Aborted,
    Cancelled,
}

#[derive(Debug)]
pub struct RunResult {
    pub run_id: Uuid,
    pub stamp: Option<Stamp>,
    pub state: RunState,
    pub categories: Vec<CategoryOutcome>,
    pub manifest: Option<Result<ManifestResult, CollectError>>,
    /// Why the run never started, for `Aborted`.
    pub abort_reason: Option<String>,
}

impl RunResult {
    pub fn artifact_count(&self) -> usize {
        self.categories.iter().map(|c| c.artifacts().count()).sum()
    }

    pub fn failure_count(&self) -> usize {
        self.categories.iter().map(|c| c.failures().count()).sum()
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            run_id: self.run_id,
            stamp: self.stamp.clone(),
            state: self.state,
            abort_reason: self.abort_reason.clone(),
            categories: self
                .categories
                .iter()
                .map(|c| CategorySummary {
                    name: c.name.clone(),
                    artifacts: c.artifacts().map(|a| a.file_name.clone()).collect(),
                    failures: c.failures().map(|e| e.to_string()).collect(),
                })
                .collect(),
            manifest: match &self.manifest {
                None => None,
                Some(Ok(ManifestResult::Written { path, entries })) => Some(format!(
                    "{} ({} files)",
                    path.display(),
                    entries.len()
                )),
                Some(Ok(ManifestResult::NothingToHash)) => Some("nothing to hash".to_string()),
                Some(Err(e)) => Some(format!("error: {}", e)),
            },
        }
    }
}

/// Serializable view of a `RunResult`, for `--json` output.
#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub stamp: Option<Stamp>,
    pub state: RunState,
    pub abort_reason: Option<String>,
    pub categories: Vec<CategorySummary>,
    pub manifest: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CategorySummary {
    pub name: String,
    pub artifacts: Vec<String>,
    pub failures: Vec<String>,
}

/// Sleep for `delay`, returning early on cancellation.
async fn pause(delay: Duration, cancel: &CancellationToken) {
    if delay.is_zero() {
        return;
    }
    tokio::select! {
        _ = tokio::time::sleep(delay) => {}
        _ = cancel.cancelled() => {}
    }
}

/// A run refused before any work because the destination is unusable.
pub fn abort_run(status: &StatusLog, error: CollectError) -> RunResult {
    let run_id = Uuid::new_v4();
    warn!(%run_id, error = %error, "run aborted before start");
    status.fail(match &error {
        CollectError::NoDestination => "Please select an output USB medium first".to_string(),
        other => other.to_string(),
    });
    RunResult {
        run_id,
        stamp: None,
        state: RunState::Aborted,
        categories: Vec::new(),
        manifest: None,
        abort_reason: Some(error.to_string()),
    }
}

/// Run `categories` in order into `out_dir`, then hash the directory.
///
/// With no usable destination nothing is executed and the run is `Aborted`.
/// Hashing happens after the last executed category regardless of failures.
pub async fn execute_full_run(
    collector: &Collector,
    categories: &[Category],
    out_dir: Option<&Path>,
    opts: &RunOptions,
) -> RunResult {
    let status = collector.status();

    let out_dir: PathBuf = match require_destination(out_dir) {
        Ok(dir) => dir.to_path_buf(),
        Err(e) => return abort_run(status, e),
    };

    let run_id = Uuid::new_v4();
    let stamp = Stamp::now();
    info!(%run_id, %stamp, dir = %out_dir.display(), categories = categories.len(), "run started");
    status.banner("Starting complete live response collection");

    let mut state = RunState::Completed;
    let mut outcomes = Vec::with_capacity(categories.len());
    for (i, category) in categories.iter().enumerate() {
        if i > 0 {
            pause(opts.inter_category_delay, &opts.cancel).await;
        }
        if opts.cancel.is_cancelled() {
            status.warn(format!(
                "Run cancelled before {} ({} of {} categories done)",
                category.name,
                i,
                categories.len()
            ));
            state = RunState::Cancelled;
            break;
        }
        outcomes.push(collector.execute_category(category, &out_dir, &stamp).await);
    }

    if state == RunState::Completed {
        pause(opts.pre_hash_delay, &opts.cancel).await;
    }
    let manifest = manifest::hash_and_report(&out_dir, status).await;

    match state {
        RunState::Cancelled => status.banner("Collection cancelled"),
        _ => status.banner_ok("Collection completed"),
    }

    let result = RunResult {
        run_id,
        stamp: Some(stamp),
        state,
        categories: outcomes,
        manifest: Some(manifest),
        abort_reason: None,
    };
    info!(
        %run_id,
        state = ?result.state,
        artifacts = result.artifact_count(),
        failures = result.failure_count(),
        "run finished"
    );
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collect::{CommandSpec, Step};
    use crate::runner::testing::FakeRunner;
    use crate::status::{drain, Level, StatusLog};
    use std::sync::Arc;

    fn two_categories() -> Vec<Category> {
        vec![
            Category {
                name: "Processes".to_string(),
                steps: vec![
                    CommandSpec::shell("ps aux", "processes.txt", "Process List").into(),
                    CommandSpec::shell("launchctl list", "services.txt", "Services").into(),
                ],
            },
            Category {
                name: "Network Info".to_string(),
                steps: vec![
                    CommandSpec::shell("netstat -an", "netstat.txt", "Network Status").into(),
                ],
            },
        ]
    }

    #[tokio::test]
    async fn test_unset_destination_runs_nothing() {
        let runner = Arc::new(FakeRunner::new());
        let (status, mut rx) = StatusLog::channel();
        let collector = Collector::new(runner.clone(), status);

        let result = execute_full_run(&collector, &two_categories(), None, &RunOptions::immediate()).await;

        assert_eq!(result.state, RunState::Aborted);
        assert_eq!(runner.call_count(), 0);
        assert!(result.manifest.is_none());
        let lines = drain(&mut rx);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].level, Level::Fail);
    }

    #[tokio::test]
    async fn test_missing_destination_runs_nothing() {
        let runner = Arc::new(FakeRunner::new());
        let collector = Collector::new(runner.clone(), StatusLog::sink());

        let result = execute_full_run(
            &collector,
            &two_categories(),
            Some(Path::new("/nonexistent/Volumes/evidence")),
            &RunOptions::immediate(),
        )
        .await;

        assert_eq!(result.state, RunState::Aborted);
        assert_eq!(runner.call_count(), 0);
    }

    #[tokio::test]
    async fn test_categories_in_order_then_hashed() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(
            FakeRunner::new()
                .respond("ps aux", "1 launchd\n", "", 0)
                .fail_spawn("launchctl list")
                .respond("netstat -an", "tcp4\n", "", 0),
        );
        let collector = Collector::new(runner.clone(), StatusLog::sink());

        let result = execute_full_run(
            &collector,
            &two_categories(),
            Some(dir.path()),
            &RunOptions::immediate(),
        )
        .await;

        assert_eq!(result.state, RunState::Completed);
        assert_eq!(runner.recorded(), vec!["ps aux", "launchctl list", "netstat -an"]);
        assert_eq!(result.categories.len(), 2);
        assert_eq!(result.artifact_count(), 2);
        assert_eq!(result.failure_count(), 1);

        // Partial failure still proceeds to hashing.
        match result.manifest {
            Some(Ok(ManifestResult::Written { entries, .. })) => assert_eq!(entries.len(), 2),
            other => panic!("unexpected manifest result {:?}", other),
        }

        let stamp = result.stamp.unwrap();
        assert!(dir.path().join(stamp.file_name("processes.txt")).exists());
        assert!(dir.path().join(stamp.file_name("netstat.txt")).exists());
    }

    #[tokio::test]
    async fn test_cancelled_before_start_still_hashes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("earlier.txt"), "x").unwrap();
        let runner = Arc::new(FakeRunner::new());
        let collector = Collector::new(runner.clone(), StatusLog::sink());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let opts = RunOptions::immediate().with_cancel(cancel);
        let result = execute_full_run(&collector, &two_categories(), Some(dir.path()), &opts).await;

        assert_eq!(result.state, RunState::Cancelled);
        assert_eq!(runner.call_count(), 0);
        assert!(matches!(result.manifest, Some(Ok(ManifestResult::Written { .. }))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_inter_category_delay_is_applied() {
        let dir = tempfile::tempdir().unwrap();
        let collector = Collector::new(Arc::new(FakeRunner::new()), StatusLog::sink());
        let opts = RunOptions::new(Duration::from_secs(2), Duration::from_secs(5));

        let start = tokio::time::Instant::now();
        let result = execute_full_run(&collector, &two_categories(), Some(dir.path()), &opts).await;

        assert_eq!(result.state, RunState::Completed);
        assert!(start.elapsed() >= Duration::from_secs(7));
    }

    #[tokio::test]
    async fn test_summary_serializes() {
        let dir = tempfile::tempdir().unwrap();
        let collector = Collector::new(Arc::new(FakeRunner::new()), StatusLog::sink());
        let categories = vec![Category {
            name: "Users".to_string(),
            steps: vec![Step::ShellHistory {
                users_root: dir.path().join("no-users"),
                label: "shell_history.txt".to_string(),
            }],
        }];

        let result =
            execute_full_run(&collector, &categories, Some(dir.path()), &RunOptions::immediate()).await;
        let json = serde_json::to_value(result.summary()).unwrap();

        assert_eq!(json["state"], "completed");
        assert_eq!(json["categories"][0]["name"], "Users");
        assert_eq!(json["categories"][0]["failures"].as_array().unwrap().len(), 1);
        assert_eq!(json["manifest"], "nothing to hash");
    }
}
