//! Issue tracker mirroring of completed cascades.

mod common;

use std::sync::Arc;

use cascade_orchestrator::collaborators::MemoryIssueTracker;
use cascade_orchestrator::persistence::WorkItemStore;
use cascade_orchestrator::{
    CascadeOrchestrator, MemoryStateStore, StateStore, SyncReport, SyncSweep, TrackerNotifier,
};
use common::{DEMO_KEY, Script, demo_request};
use serde_json::json;

#[tokio::test]
async fn test_completion_notifier_creates_issue_and_sweep_skips_it() {
    let Some(processors) = Script::scoring(2.0).processors() else {
        return;
    };
    let Ok(workspace) = tempfile::tempdir() else {
        return;
    };
    let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
    let tracker = Arc::new(MemoryIssueTracker::new());
    let items = WorkItemStore::new(Arc::clone(&store));

    let orchestrator = CascadeOrchestrator::builder(Arc::clone(&store), processors)
        .workspace_root(workspace.path())
        .notifier(Arc::new(TrackerNotifier::new(items.clone(), tracker.clone())))
        .build();

    let outcome = orchestrator
        .execute_cascade(&demo_request(json!({"task": "t"})))
        .await;
    assert!(outcome.is_completed(), "unexpected outcome: {outcome}");

    let issues = tracker.issues().await;
    assert_eq!(issues.len(), 1);
    assert_eq!(issues.first().map(|i| i.cascade_key.as_str()), Some(DEMO_KEY));

    let report = SyncSweep::new(items, tracker.clone()).run().await.ok();
    assert_eq!(
        report,
        Some(SyncReport {
            skipped: 1,
            ..SyncReport::default()
        })
    );
}

#[tokio::test]
async fn test_sweep_counts_dangling_index_entries_as_skipped() {
    let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
    let _ = store
        .add_to_index(cascade_core::REPO_KEYS_INDEX, DEMO_KEY)
        .await;
    let tracker = Arc::new(MemoryIssueTracker::new());

    let report = SyncSweep::new(WorkItemStore::new(store), tracker.clone())
        .run()
        .await
        .ok();
    assert_eq!(report.map(|r| r.skipped), Some(1));
    assert!(tracker.issues().await.is_empty());
}
