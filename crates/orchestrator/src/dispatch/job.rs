//! Persisted job tracking for dispatched cascades.

use std::sync::Arc;
use std::time::Duration;

use cascade_core::CascadeId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cascade::CascadeOutcome;
use crate::persistence::{PersistenceError, PersistenceResult, StateStore};

/// Key prefix for job records.
pub const JOB_PREFIX: &str = "job:";

/// Lifecycle of a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    /// Waiting out a backoff before the next attempt
    Retrying,
    Completed,
    Failed,
}

impl JobStatus {
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Retrying => "retrying",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One submission and everything known about its progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub cascade_id: CascadeId,
    /// Empty when the request's identifiers do not form a key
    pub cascade_key: String,
    pub status: JobStatus,
    /// Attempts started so far
    pub attempts: u32,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set once the job finishes
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub outcome: Option<CascadeOutcome>,
}

impl JobRecord {
    #[must_use]
    pub fn queued(cascade_id: CascadeId, cascade_key: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            cascade_id,
            cascade_key: cascade_key.into(),
            status: JobStatus::Queued,
            attempts: 0,
            submitted_at: now,
            updated_at: now,
            outcome: None,
        }
    }

    /// Record the final outcome.
    pub fn finish(&mut self, outcome: CascadeOutcome) {
        self.status = if outcome.is_completed() {
            JobStatus::Completed
        } else {
            JobStatus::Failed
        };
        self.outcome = Some(outcome);
        self.updated_at = Utc::now();
    }

    pub fn set_status(&mut self, status: JobStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

#[must_use]
pub fn job_key(cascade_id: &CascadeId) -> String {
    format!("{JOB_PREFIX}{cascade_id}")
}

/// Job records over a [`StateStore`], all written with the result TTL.
#[derive(Clone)]
pub struct JobStore {
    store: Arc<dyn StateStore>,
    ttl: Duration,
}

impl std::fmt::Debug for JobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobStore").field("ttl", &self.ttl).finish_non_exhaustive()
    }
}

impl JobStore {
    #[must_use]
    pub fn new(store: Arc<dyn StateStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub async fn save(&self, record: &JobRecord) -> PersistenceResult<()> {
        let value = serde_json::to_value(record)
            .map_err(|e| PersistenceError::serialization_error(e.to_string()))?;
        self.store
            .put(&job_key(&record.cascade_id), &value, Some(self.ttl))
            .await?;
        debug!(cascade_id = %record.cascade_id, status = %record.status, "job saved");
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if the read fails or the stored value is malformed.
    pub async fn get(&self, cascade_id: &CascadeId) -> PersistenceResult<Option<JobRecord>> {
        let Some(value) = self.store.get(&job_key(cascade_id)).await? else {
            return Ok(None);
        };
        serde_json::from_value(value)
            .map(Some)
            .map_err(|e| PersistenceError::serialization_error(e.to_string()))
    }
}
