//! Cascade teardown.
//!
//! Given any worker of a cascade, the cleanup manager discovers every worker
//! of that cascade, then for each one (leaf first) removes its worktree and
//! branch, deletes its workspace directory, and deletes its record.
//!
//! Resource failures are collected as warnings and logged; cleanup never
//! fails. Running it on an already-cleaned cascade is a no-op.
//!
//! A completed cascade keeps its records but not its resources: `release`
//! frees worktrees, branches and workspaces and leaves the records to expire.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use cascade_core::{CascadeId, Tier, WorkerId};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::collaborators::WorktreeManager;
use crate::persistence::{WorkerRecord, WorkerStatus, WorkerStore};

/// Resource a cleanup step acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupResource {
    Record,
    Workspace,
    Worktree,
    Branch,
}

impl std::fmt::Display for CleanupResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Record => write!(f, "record"),
            Self::Workspace => write!(f, "workspace"),
            Self::Worktree => write!(f, "worktree"),
            Self::Branch => write!(f, "branch"),
        }
    }
}

/// A resource that could not be released.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupWarning {
    pub worker_id: WorkerId,
    pub resource: CleanupResource,
    pub reason: String,
}

/// A worker whose record was removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanedWorker {
    pub worker_id: WorkerId,
    /// Status the record held when it was removed
    pub final_status: WorkerStatus,
}

/// What one cleanup pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    /// Removed workers, leaf first
    pub removed: Vec<CleanedWorker>,
    /// Workers whose resources were freed while their records were kept
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub released: Vec<WorkerId>,
    pub warnings: Vec<CleanupWarning>,
}

impl CleanupReport {
    /// Whether nothing was left behind.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }

    /// Final status of a removed worker.
    #[must_use]
    pub fn final_status(&self, worker_id: &WorkerId) -> Option<WorkerStatus> {
        self.removed
            .iter()
            .find(|w| &w.worker_id == worker_id)
            .map(|w| w.final_status)
    }

    fn warn(&mut self, worker_id: &WorkerId, resource: CleanupResource, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(worker_id = %worker_id, %resource, reason = %reason, "cleanup left a resource behind");
        self.warnings.push(CleanupWarning {
            worker_id: worker_id.clone(),
            resource,
            reason,
        });
    }
}

/// Tears down whole cascades.
pub struct CleanupManager {
    workers: WorkerStore,
    worktrees: Option<Arc<dyn WorktreeManager>>,
    runs: AtomicUsize,
}

impl std::fmt::Debug for CleanupManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupManager")
            .field("worktrees", &self.worktrees.is_some())
            .field("runs", &self.runs.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl CleanupManager {
    /// Create a cleanup manager.
    #[must_use]
    pub fn new(workers: WorkerStore, worktrees: Option<Arc<dyn WorktreeManager>>) -> Self {
        Self {
            workers,
            worktrees,
            runs: AtomicUsize::new(0),
        }
    }

    /// Number of cleanup passes run so far.
    #[must_use]
    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    /// Every worker of the cascade `worker_id` belongs to, leaf first.
    ///
    /// Ancestors are found by following recorded parent links up to tier 0;
    /// descendants by deriving the ids of the later tiers.
    async fn discover(&self, worker_id: &WorkerId, report: &mut CleanupReport) -> Vec<WorkerId> {
        let mut found = BTreeSet::new();
        found.insert(worker_id.clone());

        let mut current = worker_id.clone();
        loop {
            let recorded_parent = match self.workers.get(&current).await {
                Ok(record) => record.and_then(|r| r.parent_worker_id),
                Err(e) => {
                    report.warn(&current, CleanupResource::Record, e.to_string());
                    None
                }
            };
            let Some(parent) = recorded_parent.or_else(|| current.parent()) else {
                break;
            };
            if !found.insert(parent.clone()) {
                break;
            }
            current = parent;
        }

        let cascade_id = worker_id.cascade_id();
        for tier in Tier::ALL.iter().filter(|t| **t > worker_id.tier()) {
            found.insert(cascade_id.worker(*tier));
        }

        // Ordered by tier descending.
        let mut ordered: Vec<WorkerId> = found.into_iter().collect();
        ordered.sort_by_key(|id| std::cmp::Reverse(id.tier()));
        ordered
    }

    /// Tear down the cascade containing `worker_id`.
    pub async fn cleanup(&self, worker_id: &WorkerId) -> CleanupReport {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let mut report = CleanupReport::default();

        for id in self.discover(worker_id, &mut report).await {
            let record = match self.workers.get(&id).await {
                Ok(Some(record)) => record,
                Ok(None) => continue,
                Err(e) => {
                    report.warn(&id, CleanupResource::Record, e.to_string());
                    continue;
                }
            };

            self.release_resources(&record, &mut report).await;

            match self.workers.delete(&id).await {
                Ok(_) => {
                    debug!(worker_id = %id, status = %record.status, "removed worker");
                    report.removed.push(CleanedWorker {
                        worker_id: id,
                        final_status: record.status,
                    });
                }
                Err(e) => report.warn(&id, CleanupResource::Record, e.to_string()),
            }
        }

        info!(
            worker_id = %worker_id,
            removed = report.removed.len(),
            warnings = report.warnings.len(),
            "cascade cleanup finished"
        );
        report
    }

    /// Free the worktrees, branches and workspaces of every worker of
    /// `cascade_id`, keeping their records.
    ///
    /// Not counted in [`runs`](Self::runs): nothing is torn down.
    pub async fn release(&self, cascade_id: &CascadeId) -> CleanupReport {
        let mut report = CleanupReport::default();

        for tier in Tier::ALL.iter().rev() {
            let id = cascade_id.worker(*tier);
            let record = match self.workers.get(&id).await {
                Ok(Some(record)) => record,
                Ok(None) => continue,
                Err(e) => {
                    report.warn(&id, CleanupResource::Record, e.to_string());
                    continue;
                }
            };
            self.release_resources(&record, &mut report).await;
            report.released.push(id);
        }

        debug!(
            cascade_id = %cascade_id,
            released = report.released.len(),
            warnings = report.warnings.len(),
            "cascade resources released"
        );
        report
    }

    async fn release_resources(&self, record: &WorkerRecord, report: &mut CleanupReport) {
        let id = &record.worker_id;
        if let (Some(worktrees), Some(path)) = (&self.worktrees, &record.worktree_path) {
            if let Err(e) = worktrees.remove_worktree(path).await {
                report.warn(id, CleanupResource::Worktree, e.to_string());
            }
            if let Some(branch) = &record.worktree_branch {
                if let Err(e) = worktrees.delete_branch(branch).await {
                    report.warn(id, CleanupResource::Branch, e.to_string());
                }
            }
        }

        if let Err(reason) = remove_workspace(&record.workspace_path).await {
            report.warn(id, CleanupResource::Workspace, reason);
        }
    }
}

/// Delete a workspace directory. A missing directory is not an error.
async fn remove_workspace(path: &Path) -> Result<(), String> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(format!("{}: {e}", path.display())),
    }
}
