//! Timeout handling for cascade workers.
//!
//! When a worker's deadline elapses the handler marks it `timed_out` and
//! tears down the whole cascade. The report is parked until the cascade's
//! driver collects it. An optional observer hears about the expiry first,
//! while the worker is still active.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use cascade_core::WorkerId;
use tokio::sync::Mutex;
use tracing::warn;

use crate::cleanup::{CleanupManager, CleanupReport};
use crate::persistence::{WorkerStatus, WorkerStore};
use crate::timers::TimeoutHandler;

/// Marks timed out workers and runs cleanup for their cascade.
pub struct CascadeTimeoutHandler {
    workers: WorkerStore,
    cleanup: Arc<CleanupManager>,
    observer: Option<Arc<dyn TimeoutHandler>>,
    reports: Mutex<HashMap<WorkerId, CleanupReport>>,
}

impl std::fmt::Debug for CascadeTimeoutHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CascadeTimeoutHandler").finish_non_exhaustive()
    }
}

impl CascadeTimeoutHandler {
    #[must_use]
    pub fn new(workers: WorkerStore, cleanup: Arc<CleanupManager>) -> Self {
        Self {
            workers,
            cleanup,
            observer: None,
            reports: Mutex::new(HashMap::new()),
        }
    }

    /// Run `observer` on every expiry before the worker is torn down.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn TimeoutHandler>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Take the cleanup report of a timed out worker.
    pub async fn take_report(&self, worker_id: &WorkerId) -> Option<CleanupReport> {
        self.reports.lock().await.remove(worker_id)
    }
}

#[async_trait]
impl TimeoutHandler for CascadeTimeoutHandler {
    async fn on_timeout(&self, worker_id: &WorkerId) {
        if let Some(observer) = &self.observer {
            observer.on_timeout(worker_id).await;
        }

        if let Err(e) = self
            .workers
            .update_status(
                worker_id,
                WorkerStatus::TimedOut,
                Some("deadline elapsed".to_string()),
            )
            .await
        {
            warn!(worker_id = %worker_id, error = %e, "could not mark worker timed out");
        }

        let report = self.cleanup.cleanup(worker_id).await;
        self.reports.lock().await.insert(worker_id.clone(), report);
    }
}
