//! External synchronization.
//!
//! Mirrors every indexed work item into the issue tracker, using the cascade
//! key as the upsert identity. Running the sweep twice over unchanged items
//! writes nothing the second time.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::cascade::CascadeCompletion;
use crate::collaborators::{CompletionNotifier, IssueDraft, IssueTracker, NotifyError, TrackerError};
use crate::persistence::{PersistenceResult, WorkItemRecord, WorkItemStore};

/// What one upsert did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    Created,
    Updated,
    Unchanged,
}

/// Counts from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub created: usize,
    pub updated: usize,
    /// Unchanged issues and index entries without a record
    pub skipped: usize,
    pub failed: usize,
}

impl SyncReport {
    #[must_use]
    pub const fn total(&self) -> usize {
        self.created
            .saturating_add(self.updated)
            .saturating_add(self.skipped)
            .saturating_add(self.failed)
    }

    fn record(&mut self, action: SyncAction) {
        let counter = match action {
            SyncAction::Created => &mut self.created,
            SyncAction::Updated => &mut self.updated,
            SyncAction::Unchanged => &mut self.skipped,
        };
        *counter = counter.saturating_add(1);
    }
}

/// The issue a work item should be mirrored as.
#[must_use]
pub fn issue_draft(record: &WorkItemRecord) -> IssueDraft {
    IssueDraft {
        title: record.title.clone(),
        cascade_key: record.key.to_string(),
        body: json!({
            "kind": record.kind,
            "repo": record.repo,
            "branch": record.branch,
            "payload": record.payload,
            "validations": record.validations,
            "concern": record.has_concern(),
        }),
    }
}

/// Create or update the issue for one work item.
///
/// # Errors
///
/// Returns the tracker's error if the lookup or write fails.
pub async fn upsert_issue(
    tracker: &dyn IssueTracker,
    record: &WorkItemRecord,
) -> Result<SyncAction, TrackerError> {
    let draft = issue_draft(record);
    match tracker.find_by_cascade_key(&draft.cascade_key).await? {
        Some(issue) if issue.matches(&draft) => Ok(SyncAction::Unchanged),
        Some(issue) => {
            tracker.update(&issue.id, &draft).await?;
            Ok(SyncAction::Updated)
        }
        None => {
            tracker.create(&draft).await?;
            Ok(SyncAction::Created)
        }
    }
}

/// One pass over the `repo-keys` index.
pub struct SyncSweep {
    items: WorkItemStore,
    tracker: Arc<dyn IssueTracker>,
}

impl SyncSweep {
    #[must_use]
    pub fn new(items: WorkItemStore, tracker: Arc<dyn IssueTracker>) -> Self {
        Self { items, tracker }
    }

    /// Upsert an issue for every indexed work item.
    ///
    /// Failures on single items are counted, not returned.
    ///
    /// # Errors
    ///
    /// Returns an error only if the index itself cannot be read.
    pub async fn run(&self) -> PersistenceResult<SyncReport> {
        let mut report = SyncReport::default();

        for key in self.items.list_keys().await? {
            let record = match self.items.get(&key).await {
                Ok(Some(record)) => record,
                Ok(None) => {
                    warn!(cascade_key = %key, "indexed key has no work item");
                    report.skipped = report.skipped.saturating_add(1);
                    continue;
                }
                Err(e) => {
                    warn!(cascade_key = %key, error = %e, "could not read work item");
                    report.failed = report.failed.saturating_add(1);
                    continue;
                }
            };

            match upsert_issue(self.tracker.as_ref(), &record).await {
                Ok(action) => {
                    debug!(cascade_key = %key, ?action, "work item synced");
                    report.record(action);
                }
                Err(e) => {
                    warn!(cascade_key = %key, error = %e, "could not sync work item");
                    report.failed = report.failed.saturating_add(1);
                }
            }
        }

        info!(
            created = report.created,
            updated = report.updated,
            skipped = report.skipped,
            failed = report.failed,
            "sync sweep finished"
        );
        Ok(report)
    }
}

/// Mirrors a completed cascade's work items into the tracker right away.
pub struct TrackerNotifier {
    items: WorkItemStore,
    tracker: Arc<dyn IssueTracker>,
}

impl TrackerNotifier {
    #[must_use]
    pub fn new(items: WorkItemStore, tracker: Arc<dyn IssueTracker>) -> Self {
        Self { items, tracker }
    }
}

#[async_trait]
impl CompletionNotifier for TrackerNotifier {
    async fn notify(&self, completion: &CascadeCompletion) -> Result<(), NotifyError> {
        for key in &completion.work_items {
            let record = self
                .items
                .get(key)
                .await
                .map_err(|e| NotifyError::new(format!("could not read {key}: {e}")))?
                .ok_or_else(|| NotifyError::new(format!("work item {key} is missing")))?;
            upsert_issue(self.tracker.as_ref(), &record)
                .await
                .map_err(|e| NotifyError::new(e.to_string()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::MemoryIssueTracker;
    use crate::persistence::MemoryStateStore;
    use cascade_core::{CascadeId, WorkItemKey};

    async fn seeded() -> (WorkItemStore, Option<WorkItemKey>) {
        let items = WorkItemStore::new(Arc::new(MemoryStateStore::new()));
        let key = WorkItemKey::epic("acme", "main", "EP1", "login").ok();
        if let Some(key) = &key {
            let record = WorkItemRecord::new(key.clone(), CascadeId::generate(), json!({"v": 1}));
            assert!(items.upsert(record).await.is_ok());
        }
        (items, key)
    }

    #[tokio::test]
    async fn test_sweep_creates_then_skips() {
        let (items, _) = seeded().await;
        let tracker = Arc::new(MemoryIssueTracker::new());
        let sweep = SyncSweep::new(items, tracker.clone());

        let first = sweep.run().await.ok();
        assert_eq!(
            first,
            Some(SyncReport {
                created: 1,
                ..SyncReport::default()
            })
        );

        let second = sweep.run().await.ok();
        assert_eq!(
            second,
            Some(SyncReport {
                skipped: 1,
                ..SyncReport::default()
            })
        );
        assert_eq!(tracker.issues().await.len(), 1);
    }

    #[tokio::test]
    async fn test_sweep_updates_changed_item() {
        let (items, key) = seeded().await;
        let Some(key) = key else { return };
        let tracker = Arc::new(MemoryIssueTracker::new());
        let sweep = SyncSweep::new(items.clone(), tracker.clone());
        assert!(sweep.run().await.is_ok());

        let changed = WorkItemRecord::new(key, CascadeId::generate(), json!({"v": 2}));
        assert!(items.upsert(changed).await.is_ok());

        let report = sweep.run().await.ok();
        assert_eq!(report.map(|r| r.updated), Some(1));
        let issues = tracker.issues().await;
        assert_eq!(issues.len(), 1);
        assert_eq!(
            issues.first().and_then(|i| i.body.get("payload")).cloned(),
            Some(json!({"v": 2}))
        );
    }

    #[tokio::test]
    async fn test_draft_uses_cascade_key_and_title() {
        let (items, key) = seeded().await;
        let Some(key) = key else { return };
        let record = items.get(&key).await.ok().flatten();
        let draft = record.as_ref().map(issue_draft);
        assert_eq!(
            draft.as_ref().map(|d| d.cascade_key.as_str()),
            Some("repo-acme_branch-main_epics-EP1-login")
        );
        assert_eq!(draft.map(|d| d.title), Some("login".to_string()));
    }
}
