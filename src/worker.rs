//! Background job pool.
//!
//! Long-running batches (a category, an acquisition, a full run) are submitted
//! as independent tasks so the foreground stays free to print status lines.
//! A semaphore bounds how many run at once.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl WorkerPool {
    /// A pool running at most `max_concurrent` jobs (at least one).
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            cancel: CancellationToken::new(),
        }
    }

    /// Token shared with the jobs; jobs decide where they observe it.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        if !self.cancel.is_cancelled() {
            warn!("cancellation requested");
        }
        self.cancel.cancel();
    }

    /// Spawn `job` once a slot is free.
    pub fn submit<F, T>(&self, name: &str, job: F) -> JoinHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let permits = self.permits.clone();
        let name = name.to_string();
        let id = Uuid::new_v4();
        debug!(%id, job = %name, "job queued");
        tokio::spawn(async move {
            // The semaphore is never closed, so acquiring only fails after a drop.
            let _permit = permits.acquire_owned().await.ok();
            info!(%id, job = %name, "job started");
            let out = job.await;
            info!(%id, job = %name, "job finished");
            out
        })
    }
}
