//! End-to-end cascades against the in-memory store.

mod common;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cascade_core::{REPO_KEYS_INDEX, Tier, WorkItemKey};
use cascade_orchestrator::collaborators::{WorktreeError, WorktreeManager};
use cascade_orchestrator::persistence::WorkerStatus;
use cascade_orchestrator::tier::FailureKind;
use cascade_orchestrator::{
    CascadeOrchestrator, CascadeOutcome, CascadeRequest, MemoryStateStore, StateStore,
};
use common::{
    DEMO_KEY, HarnessOptions, LateAnswer, Script, ScriptedCollaborator, demo_request, harness,
    harness_with,
};
use serde_json::json;

#[tokio::test]
async fn test_completed_cascade_keeps_four_succeeded_workers() {
    let Some(h) = harness(Script::scoring(4.0)) else {
        return;
    };

    let outcome = h
        .orchestrator
        .execute_cascade(&demo_request(json!({"task": "add login", "risk_score": 2})))
        .await;

    let Some(completion) = outcome.completion() else {
        assert!(outcome.is_completed(), "unexpected outcome: {outcome}");
        return;
    };
    assert_eq!(completion.cascade_key, DEMO_KEY);
    assert!(!completion.concern);

    let records = h
        .orchestrator
        .workers()
        .list_cascade(&completion.cascade_id)
        .await
        .unwrap_or_default();
    assert_eq!(records.len(), 4);
    assert!(records.iter().all(|r| r.status == WorkerStatus::Succeeded));

    // Each worker's parent is the previous tier's worker.
    let ids: Vec<_> = records.iter().map(|r| r.worker_id.clone()).collect();
    let parents: Vec<_> = records.iter().map(|r| r.parent_worker_id.clone()).collect();
    assert_eq!(parents.first().cloned().flatten(), None);
    for (parent, id) in parents.iter().skip(1).zip(ids.iter()) {
        assert_eq!(parent.as_ref(), Some(id));
    }
    assert!(records.iter().all(|r| r.cascade_key == DEMO_KEY));

    // Records stay; the workspaces they point at are already released.
    assert_eq!(completion.release.released.len(), 4);
    assert!(completion.release.is_clean());
    assert!(records.iter().all(|r| !r.workspace_path.exists()));
}

#[tokio::test]
async fn test_intake_score_below_concern_completes_and_indexes_key() {
    let Some(h) = harness(Script::scoring(4.0)) else {
        return;
    };

    let outcome = h
        .orchestrator
        .execute_cascade(&demo_request(json!({"task": "add login", "risk_score": 4})))
        .await;

    let Some(completion) = outcome.completion() else {
        assert!(outcome.is_completed(), "unexpected outcome: {outcome}");
        return;
    };
    assert!(!completion.concern);
    assert_eq!(
        completion.validations.first().map(|v| v.tier),
        Some(Tier::Intake)
    );
    assert_eq!(completion.validations.first().map(|v| v.score), Some(4.0));

    let indexed = h.store.list_index(REPO_KEYS_INDEX).await.unwrap_or_default();
    assert!(indexed.iter().any(|k| k == DEMO_KEY));
}

#[tokio::test]
async fn test_completed_cascade_leaves_nothing_behind_after_expiry() {
    let options = HarnessOptions {
        worker_ttl: Duration::from_millis(50),
        worktrees: true,
        ..HarnessOptions::default()
    };
    let Some(h) = harness_with(Script::scoring(1.0), options) else {
        return;
    };

    let outcome = h
        .orchestrator
        .execute_cascade(&demo_request(json!({"task": "t"})))
        .await;
    assert!(outcome.is_completed(), "unexpected outcome: {outcome}");

    tokio::time::sleep(Duration::from_millis(100)).await;
    let _ = h.store.purge_expired().await;

    let entries = |dir: std::path::PathBuf| std::fs::read_dir(dir).map(Iterator::count).unwrap_or(0);
    assert_eq!(entries(h.workspace.path().join("workers")), 0);
    assert_eq!(entries(h.workspace.path().join("worktrees")), 0);
    let branches = match &h.worktrees {
        Some(worktrees) => worktrees.branches().await,
        None => Vec::new(),
    };
    assert!(branches.is_empty());

    let records = h
        .orchestrator
        .workers()
        .list_cascade(outcome.cascade_id())
        .await
        .unwrap_or_default();
    assert!(records.is_empty());
    // Work items never expire.
    assert!(h.orchestrator.items().get_by_str(DEMO_KEY).await.ok().flatten().is_some());
}

#[tokio::test]
async fn test_completed_cascade_indexes_its_work_item() {
    let Some(h) = harness(Script::scoring(4.0)) else {
        return;
    };

    let outcome = h
        .orchestrator
        .execute_cascade(&demo_request(json!({"task": "add login"})))
        .await;
    assert!(outcome.is_completed(), "unexpected outcome: {outcome}");

    let indexed = h.store.list_index(REPO_KEYS_INDEX).await.unwrap_or_default();
    assert_eq!(indexed, vec![DEMO_KEY.to_string()]);

    let record = h
        .orchestrator
        .items()
        .get_by_str(DEMO_KEY)
        .await
        .ok()
        .flatten();
    assert!(record.is_some(), "work item missing");
    let Some(record) = record else {
        return;
    };
    assert_eq!(record.title, "demo");
    assert_eq!(record.payload.get("summary"), Some(&json!("done")));
    let artifact_tiers: Vec<_> = record.artifacts.keys().cloned().collect();
    assert_eq!(artifact_tiers, vec!["tier0", "tier1", "tier2", "tier3"]);
    assert_eq!(
        record.artifacts.get("tier1"),
        Some(&json!({"spec": "requirements"}))
    );
    assert_eq!(record.validations.len(), 2);
}

#[tokio::test]
async fn test_intake_rejection_leaves_no_workers() {
    let Some(h) = harness(Script::scoring(1.0)) else {
        return;
    };

    let outcome = h
        .orchestrator
        .execute_cascade(&demo_request(json!({"task": "drop prod db", "risk_score": 9})))
        .await;

    let Some(failure) = outcome.failure() else {
        assert!(!outcome.is_completed(), "unexpected outcome: {outcome}");
        return;
    };
    assert_eq!(failure.tier, Tier::Intake);
    assert_eq!(failure.kind, FailureKind::Validation);
    assert!(!outcome.is_retryable());
    assert_eq!(
        failure.cleanup.final_status(&failure.cascade_id.worker(Tier::Intake)),
        Some(WorkerStatus::Failed)
    );

    let records = h
        .orchestrator
        .workers()
        .list_cascade(&failure.cascade_id)
        .await
        .unwrap_or_default();
    assert!(records.is_empty());
    assert_eq!(h.script.specification.calls(), 0);
    assert!(h.orchestrator.items().list_keys().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn test_execution_rejection_leaves_no_workers_or_items() {
    let Some(h) = harness(Script::scoring(9.0)) else {
        return;
    };

    let outcome = h
        .orchestrator
        .execute_cascade(&demo_request(json!({"task": "add login"})))
        .await;

    let Some(failure) = outcome.failure() else {
        assert!(!outcome.is_completed(), "unexpected outcome: {outcome}");
        return;
    };
    assert_eq!(failure.tier, Tier::Execution);
    assert_eq!(failure.kind, FailureKind::Validation);
    assert_eq!(failure.cleanup.removed.len(), 4);
    assert!(failure.cleanup.is_clean());

    let records = h
        .orchestrator
        .workers()
        .list_cascade(&failure.cascade_id)
        .await
        .unwrap_or_default();
    assert!(records.is_empty());
    assert!(h.store.list_index(REPO_KEYS_INDEX).await.unwrap_or_default().is_empty());
    assert!(
        !h.workspace.path().join("workers").join(failure.cascade_id.worker(Tier::Intake).to_string()).exists()
    );
}

#[tokio::test]
async fn test_concern_score_completes_flagged() {
    let Some(h) = harness(Script::scoring(7.0)) else {
        return;
    };

    let outcome = h
        .orchestrator
        .execute_cascade(&demo_request(json!({"task": "migrate schema"})))
        .await;

    assert_eq!(outcome.completion().map(|c| c.concern), Some(true));
    let record = h.orchestrator.items().get_by_str(DEMO_KEY).await.ok().flatten();
    assert_eq!(record.map(|r| r.has_concern()), Some(true));
}

#[tokio::test]
async fn test_processor_failure_is_retryable_and_cleaned() {
    let script = Script::scoring(1.0);
    let script = Script {
        specification: Arc::new(
            ScriptedCollaborator::returning("semantic", json!({})).failing_first(1),
        ),
        ..script
    };
    let Some(h) = harness(script) else {
        return;
    };

    let outcome = h
        .orchestrator
        .execute_cascade(&demo_request(json!({"task": "t"})))
        .await;

    let Some(failure) = outcome.failure() else {
        assert!(!outcome.is_completed(), "unexpected outcome: {outcome}");
        return;
    };
    assert_eq!(failure.tier, Tier::Specification);
    assert_eq!(failure.kind, FailureKind::Processor);
    assert!(outcome.is_retryable());
    assert_eq!(failure.cleanup.removed.len(), 2);
    assert_eq!(h.script.synthesis.calls(), 0);
}

#[tokio::test]
async fn test_timeout_marks_worker_and_cleans_up_once() {
    let script = Script::scoring(1.0);
    let script = Script {
        synthesis: Arc::new(
            ScriptedCollaborator::returning("synthesis", json!({}))
                .delayed(Duration::from_secs(30)),
        ),
        ..script
    };
    let options = HarnessOptions {
        worker_timeout: Duration::from_millis(200),
        ..HarnessOptions::default()
    };
    let Some(h) = harness_with(script, options) else {
        return;
    };

    let outcome = h
        .orchestrator
        .execute_cascade(&demo_request(json!({"task": "t"})))
        .await;

    let Some(failure) = outcome.failure() else {
        assert!(!outcome.is_completed(), "unexpected outcome: {outcome}");
        return;
    };
    assert_eq!(failure.tier, Tier::Synthesis);
    assert_eq!(failure.kind, FailureKind::Timeout);
    assert!(!outcome.is_retryable());
    assert_eq!(
        failure.cleanup.final_status(&failure.cascade_id.worker(Tier::Synthesis)),
        Some(WorkerStatus::TimedOut)
    );
    assert_eq!(h.orchestrator.cleanup_manager().runs(), 1);
    assert_eq!(h.orchestrator.timeouts().armed_count().await, 0);
    assert_eq!(h.script.execution.calls(), 0);

    // Nothing comes back once the abandoned attempt would have finished.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let records = h
        .orchestrator
        .workers()
        .list_cascade(&failure.cascade_id)
        .await
        .unwrap_or_default();
    assert!(records.is_empty());
}

#[tokio::test]
async fn test_timeout_racing_completion_resolves_one_way() {
    for _ in 0..5 {
        let script = Script::scoring(1.0);
        let script = Script {
            synthesis: Arc::new(
                ScriptedCollaborator::returning("synthesis", json!({}))
                    .delayed(Duration::from_millis(40)),
            ),
            ..script
        };
        let options = HarnessOptions {
            worker_timeout: Duration::from_millis(40),
            ..HarnessOptions::default()
        };
        let Some(h) = harness_with(script, options) else {
            return;
        };

        let outcome = h
            .orchestrator
            .execute_cascade(&demo_request(json!({"task": "t"})))
            .await;
        let records = h
            .orchestrator
            .workers()
            .list_cascade(outcome.cascade_id())
            .await
            .unwrap_or_default();

        match &outcome {
            CascadeOutcome::Completed(_) => {
                assert_eq!(records.len(), 4);
                assert!(records.iter().all(|r| r.status == WorkerStatus::Succeeded));
                assert_eq!(h.orchestrator.cleanup_manager().runs(), 0);
            }
            CascadeOutcome::Failed(failure) => {
                assert_eq!(failure.kind, FailureKind::Timeout);
                assert!(records.is_empty());
                assert_eq!(h.orchestrator.cleanup_manager().runs(), 1);
                assert!(h.orchestrator.items().list_keys().await.unwrap_or_default().is_empty());
            }
        }
    }
}

#[tokio::test]
async fn test_success_after_fired_deadline_is_discarded() {
    let gate = Arc::new(LateAnswer::default());
    let script = Script {
        synthesis: Arc::new(
            ScriptedCollaborator::returning("synthesis", json!({"plan": ["late"]}))
                .gated(gate.clone()),
        ),
        ..Script::scoring(1.0)
    };
    let options = HarnessOptions {
        worker_timeout: Duration::from_millis(200),
        timeout_observer: Some(gate.clone()),
        ..HarnessOptions::default()
    };
    let Some(h) = harness_with(script, options) else {
        return;
    };

    let outcome = h
        .orchestrator
        .execute_cascade(&demo_request(json!({"task": "t"})))
        .await;

    // The answer was produced, but only after the timer fired.
    assert_eq!(gate.answers(), 1);
    let Some(failure) = outcome.failure() else {
        assert!(!outcome.is_completed(), "unexpected outcome: {outcome}");
        return;
    };
    assert_eq!(failure.tier, Tier::Synthesis);
    assert_eq!(failure.kind, FailureKind::Timeout);
    assert_eq!(
        failure.cleanup.final_status(&failure.cascade_id.worker(Tier::Synthesis)),
        Some(WorkerStatus::TimedOut)
    );
    assert_eq!(h.orchestrator.cleanup_manager().runs(), 1);
    assert_eq!(h.orchestrator.timeouts().armed_count().await, 0);
    assert_eq!(h.script.execution.calls(), 0);
    assert!(h.orchestrator.items().list_keys().await.unwrap_or_default().is_empty());
    let records = h
        .orchestrator
        .workers()
        .list_cascade(&failure.cascade_id)
        .await
        .unwrap_or_default();
    assert!(records.is_empty());
}

/// Worktree creation that never returns.
struct StuckWorktrees;

#[async_trait]
impl WorktreeManager for StuckWorktrees {
    async fn create_worktree(&self, _branch_name: &str) -> Result<PathBuf, WorktreeError> {
        std::future::pending().await
    }

    async fn assign_files(&self, _branch_name: &str, _paths: &[PathBuf]) -> Result<(), WorktreeError> {
        Ok(())
    }

    async fn remove_worktree(&self, _path: &Path) -> Result<(), WorktreeError> {
        Ok(())
    }
}

#[tokio::test]
async fn test_stuck_worktree_creation_times_out() {
    let Some(processors) = Script::scoring(1.0).processors() else {
        return;
    };
    let Ok(workspace) = tempfile::tempdir() else {
        return;
    };
    let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
    let orchestrator = CascadeOrchestrator::builder(store, processors)
        .worker_timeout(Duration::from_millis(100))
        .workspace_root(workspace.path())
        .worktrees(Arc::new(StuckWorktrees))
        .build();

    let outcome = orchestrator
        .execute_cascade(&demo_request(json!({"task": "t"})))
        .await;

    let Some(failure) = outcome.failure() else {
        assert!(!outcome.is_completed(), "unexpected outcome: {outcome}");
        return;
    };
    assert_eq!(failure.tier, Tier::Intake);
    assert_eq!(failure.kind, FailureKind::Timeout);
    assert_eq!(
        failure.cleanup.final_status(&failure.cascade_id.worker(Tier::Intake)),
        Some(WorkerStatus::TimedOut)
    );
    assert!(!workspace.path().join(failure.cascade_id.worker(Tier::Intake).to_string()).exists());
}

#[tokio::test]
async fn test_cleanup_is_idempotent() {
    let Some(h) = harness(Script::scoring(9.5)) else {
        return;
    };

    let outcome = h
        .orchestrator
        .execute_cascade(&demo_request(json!({"task": "t"})))
        .await;
    let Some(failure) = outcome.failure() else {
        assert!(!outcome.is_completed());
        return;
    };

    let again = h
        .orchestrator
        .cleanup_manager()
        .cleanup(&failure.cascade_id.worker(Tier::Intake))
        .await;
    assert!(again.removed.is_empty());
    assert!(again.warnings.is_empty());
}

#[tokio::test]
async fn test_invalid_identifiers_fail_before_any_worker() {
    let Some(h) = harness(Script::scoring(1.0)) else {
        return;
    };

    let request = CascadeRequest::epic("acme", "feature-x", "EP-001", "demo", json!({}));
    let outcome = h.orchestrator.execute_cascade(&request).await;

    let Some(failure) = outcome.failure() else {
        assert!(!outcome.is_completed());
        return;
    };
    assert_eq!(failure.tier, Tier::Intake);
    assert_eq!(failure.kind, FailureKind::Validation);
    assert!(failure.cascade_key.is_empty());
    assert!(failure.cleanup.removed.is_empty());
    assert_eq!(h.orchestrator.cleanup_manager().runs(), 0);
    assert_eq!(h.script.specification.calls(), 0);
}

#[tokio::test]
async fn test_epic_output_stories_become_child_items() {
    let Some(h) = harness(Script::with_execution(json!({
        "risk_score": 3,
        "stories": [
            {"id": "S1", "name": "login form"},
            {"id": "S-2", "name": "bad id"},
            {"id": "S3"},
        ],
    }))) else {
        return;
    };

    let outcome = h
        .orchestrator
        .execute_cascade(&demo_request(json!({"task": "t"})))
        .await;

    let keys: Vec<String> = outcome
        .completion()
        .map(|c| c.work_items.iter().map(ToString::to_string).collect())
        .unwrap_or_default();
    let story_key = format!("{DEMO_KEY}_stories-S1-login form");
    assert_eq!(keys, vec![DEMO_KEY.to_string(), story_key.clone()]);

    let indexed = h.store.list_index(REPO_KEYS_INDEX).await.unwrap_or_default();
    assert_eq!(indexed.len(), 2);

    let story = h.orchestrator.items().get_by_str(&story_key).await.ok().flatten();
    let parent = story.as_ref().and_then(|s| s.key.parent_epic());
    assert_eq!(parent.map(|k| k.to_string()).as_deref(), Some(DEMO_KEY));
}

#[tokio::test]
async fn test_rerun_overwrites_item_but_keeps_created_at() {
    let Some(h) = harness(Script::scoring(2.0)) else {
        return;
    };
    let request = demo_request(json!({"task": "t"}));

    let first = h.orchestrator.execute_cascade(&request).await;
    let before = h.orchestrator.items().get_by_str(DEMO_KEY).await.ok().flatten();
    let second = h.orchestrator.execute_cascade(&request).await;
    let after = h.orchestrator.items().get_by_str(DEMO_KEY).await.ok().flatten();

    assert!(first.is_completed() && second.is_completed());
    assert_ne!(first.cascade_id(), second.cascade_id());
    assert_eq!(
        before.as_ref().map(|r| r.created_at),
        after.as_ref().map(|r| r.created_at)
    );
    assert_eq!(after.map(|r| r.cascade_id), Some(second.cascade_id().clone()));
    assert_eq!(h.orchestrator.items().list_keys().await.unwrap_or_default().len(), 1);
}

#[tokio::test]
async fn test_worktrees_follow_worker_lifecycle() {
    let options = HarnessOptions {
        worktrees: true,
        ..HarnessOptions::default()
    };
    let Some(h) = harness_with(
        Script::with_execution(json!({"risk_score": 1, "files": ["src/login.rs"]})),
        options,
    ) else {
        return;
    };
    let Some(worktrees) = h.worktrees.clone() else {
        return;
    };

    let outcome = h
        .orchestrator
        .execute_cascade(&demo_request(json!({"task": "t"})))
        .await;
    let cascade_id = outcome.cascade_id().clone();
    assert!(outcome.is_completed(), "unexpected outcome: {outcome}");

    let branch = format!("cascade/{}", cascade_id.worker(Tier::Execution));
    assert_eq!(
        worktrees.assigned(&branch).await,
        vec![std::path::PathBuf::from("src/login.rs")]
    );
    // Released on completion, while the records remain.
    assert!(worktrees.branches().await.is_empty());
    assert_eq!(worktrees.removed().await.len(), 4);
    assert_eq!(
        outcome.completion().map(|c| c.release.released.len()),
        Some(4)
    );

    let report = h
        .orchestrator
        .cleanup_manager()
        .cleanup(&cascade_id.worker(Tier::Execution))
        .await;
    assert_eq!(report.removed.len(), 4);
    assert!(report.is_clean());
    assert!(worktrees.branches().await.is_empty());
    assert_eq!(worktrees.removed().await.len(), 4);
}

#[test]
fn test_keys_are_deterministic_and_round_trip() {
    let a = demo_request(json!({"a": 1})).key().ok();
    let b = demo_request(json!({"b": 2})).key().ok();
    assert_eq!(a, b);

    let parsed = DEMO_KEY.parse::<WorkItemKey>().ok();
    assert_eq!(parsed, a);
    assert_eq!(parsed.map(|k| k.to_string()).as_deref(), Some(DEMO_KEY));
}
