//! External issue tracker interface.
//!
//! Tracked issues carry the cascade key as metadata, which makes the
//! synchronization sweep an idempotent upsert.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

/// Issue tracker failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackerError {
    /// The tracker could not be reached or rejected the call
    #[error("issue tracker request failed: {reason}")]
    RequestFailed { reason: String },

    /// Update of an issue that does not exist
    #[error("issue '{id}' not found")]
    NotFound { id: String },
}

/// Fields written to a tracked issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueDraft {
    /// Issue title
    pub title: String,
    /// Cascade key stored as metadata; the upsert identity
    pub cascade_key: String,
    /// Structured issue body
    pub body: serde_json::Value,
}

/// An issue as stored in the tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedIssue {
    /// Tracker-assigned id
    pub id: String,
    pub title: String,
    pub cascade_key: String,
    pub body: serde_json::Value,
}

impl TrackedIssue {
    /// Whether the issue already holds exactly `draft`.
    #[must_use]
    pub fn matches(&self, draft: &IssueDraft) -> bool {
        self.title == draft.title
            && self.cascade_key == draft.cascade_key
            && self.body == draft.body
    }
}

/// An external issue tracker.
#[async_trait]
pub trait IssueTracker: Send + Sync {
    /// The issue whose metadata carries `cascade_key`, if any.
    async fn find_by_cascade_key(&self, cascade_key: &str)
    -> Result<Option<TrackedIssue>, TrackerError>;

    /// Create an issue.
    async fn create(&self, draft: &IssueDraft) -> Result<TrackedIssue, TrackerError>;

    /// Overwrite an existing issue.
    async fn update(&self, id: &str, draft: &IssueDraft) -> Result<TrackedIssue, TrackerError>;
}

#[derive(Debug, Default)]
struct TrackerState {
    next_id: u64,
    issues: BTreeMap<String, TrackedIssue>,
}

/// In-process issue tracker.
#[derive(Debug, Clone, Default)]
pub struct MemoryIssueTracker {
    state: Arc<Mutex<TrackerState>>,
}

impl MemoryIssueTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every issue, ordered by id.
    pub async fn issues(&self) -> Vec<TrackedIssue> {
        self.state.lock().await.issues.values().cloned().collect()
    }
}

#[async_trait]
impl IssueTracker for MemoryIssueTracker {
    async fn find_by_cascade_key(
        &self,
        cascade_key: &str,
    ) -> Result<Option<TrackedIssue>, TrackerError> {
        let state = self.state.lock().await;
        Ok(state
            .issues
            .values()
            .find(|issue| issue.cascade_key == cascade_key)
            .cloned())
    }

    async fn create(&self, draft: &IssueDraft) -> Result<TrackedIssue, TrackerError> {
        let mut state = self.state.lock().await;
        state.next_id = state.next_id.saturating_add(1);
        let issue = TrackedIssue {
            id: format!("ISSUE-{:04}", state.next_id),
            title: draft.title.clone(),
            cascade_key: draft.cascade_key.clone(),
            body: draft.body.clone(),
        };
        state.issues.insert(issue.id.clone(), issue.clone());
        Ok(issue)
    }

    async fn update(&self, id: &str, draft: &IssueDraft) -> Result<TrackedIssue, TrackerError> {
        let mut state = self.state.lock().await;
        let issue = state.issues.get_mut(id).ok_or_else(|| TrackerError::NotFound {
            id: id.to_string(),
        })?;
        issue.title = draft.title.clone();
        issue.cascade_key = draft.cascade_key.clone();
        issue.body = draft.body.clone();
        Ok(issue.clone())
    }
}
