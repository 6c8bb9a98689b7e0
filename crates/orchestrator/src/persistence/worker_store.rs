//! Worker record persistence.
//!
//! Worker records live under `worker:{worker_id}` with an expiration that is
//! refreshed on every write, so abandoned cascades age out of the store even
//! if cleanup never runs.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use cascade_core::{CascadeId, Tier, Validation, WorkerId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::{PersistenceError, PersistenceResult};
use super::store::StateStore;

/// Key prefix for worker records.
pub const WORKER_PREFIX: &str = "worker:";

/// Worker status in the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    /// Record written, processor not yet invoked
    #[default]
    Pending,
    /// Processor is running
    Active,
    /// Tier produced output that passed its gate
    Succeeded,
    /// Processor error or validation rejection
    Failed,
    /// Deadline elapsed before the processor answered
    TimedOut,
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Active => write!(f, "active"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::TimedOut => write!(f, "timed_out"),
        }
    }
}

impl WorkerStatus {
    /// Check if the status is terminal.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::TimedOut)
    }

    /// Whether a worker may move from this status to `next`.
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Active | Self::Failed | Self::TimedOut)
                | (Self::Active, Self::Succeeded | Self::Failed | Self::TimedOut)
        )
    }
}

/// One worker: a single tier invocation of a cascade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRecord {
    /// `{cascade_id}-tier{n}`
    pub worker_id: WorkerId,
    /// Tier index
    pub tier: Tier,
    /// Current status
    pub status: WorkerStatus,
    /// Previous tier's worker; `None` for tier 0
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub parent_worker_id: Option<WorkerId>,
    /// Workspace directory owned by this worker alone
    pub workspace_path: PathBuf,
    /// Worktree created for this worker, if any
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub worktree_path: Option<PathBuf>,
    /// Branch the worktree was created on
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub worktree_branch: Option<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// `created_at + timeout`
    pub deadline_at: DateTime<Utc>,
    /// Last status change
    pub updated_at: DateTime<Utc>,
    /// Correlates every worker and work item of one request
    pub cascade_key: String,
    /// Gate result, for tiers 0 and 3
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub validation: Option<Validation>,
    /// Reason for a failed or timed out worker
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub failure_reason: Option<String>,
}

impl WorkerRecord {
    /// Create a pending record whose deadline is `timeout` from now.
    #[must_use]
    pub fn new(
        worker_id: WorkerId,
        cascade_key: impl Into<String>,
        workspace_path: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Self {
        let now = Utc::now();
        let timeout = chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::MAX);
        Self {
            tier: worker_id.tier(),
            parent_worker_id: worker_id.parent(),
            worker_id,
            status: WorkerStatus::Pending,
            workspace_path: workspace_path.into(),
            worktree_path: None,
            worktree_branch: None,
            created_at: now,
            deadline_at: now.checked_add_signed(timeout).unwrap_or(DateTime::<Utc>::MAX_UTC),
            updated_at: now,
            cascade_key: cascade_key.into(),
            validation: None,
            failure_reason: None,
        }
    }

    /// Attach a worktree.
    #[must_use]
    pub fn with_worktree(mut self, path: impl Into<PathBuf>, branch: impl Into<String>) -> Self {
        self.worktree_path = Some(path.into());
        self.worktree_branch = Some(branch.into());
        self
    }

    /// The cascade this worker belongs to.
    #[must_use]
    pub const fn cascade_id(&self) -> &CascadeId {
        self.worker_id.cascade_id()
    }

    /// Time left before the deadline, zero if already passed.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.deadline_at
            .signed_duration_since(Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

/// Store key for a worker.
#[must_use]
pub fn worker_key(worker_id: &WorkerId) -> String {
    format!("{WORKER_PREFIX}{worker_id}")
}

/// Typed access to worker records.
#[derive(Clone)]
pub struct WorkerStore {
    store: Arc<dyn StateStore>,
    ttl: Duration,
}

impl std::fmt::Debug for WorkerStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerStore").field("ttl", &self.ttl).finish_non_exhaustive()
    }
}

impl WorkerStore {
    /// Create a worker store whose records expire `ttl` after each write.
    #[must_use]
    pub fn new(store: Arc<dyn StateStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// The TTL applied on every write.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Save a worker record, refreshing its expiration.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be serialized or written.
    pub async fn save(&self, record: &WorkerRecord) -> PersistenceResult<()> {
        let value = serde_json::to_value(record)?;
        self.store
            .put(&worker_key(&record.worker_id), &value, Some(self.ttl))
            .await?;
        debug!(worker_id = %record.worker_id, status = %record.status, "saved worker record");
        Ok(())
    }

    /// Get a worker record.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails or the stored value is malformed.
    pub async fn get(&self, worker_id: &WorkerId) -> PersistenceResult<Option<WorkerRecord>> {
        self.store
            .get(&worker_key(worker_id))
            .await?
            .map(serde_json::from_value)
            .transpose()
            .map_err(PersistenceError::from)
    }

    /// Delete a worker record. Returns whether a record was removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub async fn delete(&self, worker_id: &WorkerId) -> PersistenceResult<bool> {
        self.store.delete(&worker_key(worker_id)).await
    }

    /// Move a worker to a new status and refresh its expiration.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the record is gone, or `InvalidTransition` if the
    /// current status cannot move to `status`.
    pub async fn update_status(
        &self,
        worker_id: &WorkerId,
        status: WorkerStatus,
        failure_reason: Option<String>,
    ) -> PersistenceResult<WorkerRecord> {
        self.transition(worker_id, status, |record| {
            if failure_reason.is_some() {
                record.failure_reason = failure_reason;
            }
        })
        .await
    }

    /// Move a worker to a new status, applying `update` to the record in the
    /// same write.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the record is gone, or `InvalidTransition` if the
    /// current status cannot move to `status`.
    pub async fn transition<F>(
        &self,
        worker_id: &WorkerId,
        status: WorkerStatus,
        update: F,
    ) -> PersistenceResult<WorkerRecord>
    where
        F: FnOnce(&mut WorkerRecord) + Send,
    {
        let mut record = self
            .get(worker_id)
            .await?
            .ok_or_else(|| PersistenceError::not_found("worker", worker_id.to_string()))?;

        if !record.status.can_transition_to(status) {
            return Err(PersistenceError::invalid_transition(
                worker_id.to_string(),
                record.status,
                status,
            ));
        }

        record.status = status;
        record.updated_at = Utc::now();
        update(&mut record);
        self.save(&record).await?;
        Ok(record)
    }

    /// Records of every tier of a cascade that still exist, root first.
    ///
    /// # Errors
    ///
    /// Returns an error if any read fails.
    pub async fn list_cascade(&self, cascade_id: &CascadeId) -> PersistenceResult<Vec<WorkerRecord>> {
        let mut records = Vec::with_capacity(Tier::ALL.len());
        for worker_id in cascade_id.all_workers() {
            if let Some(record) = self.get(&worker_id).await? {
                records.push(record);
            }
        }
        Ok(records)
    }
}
