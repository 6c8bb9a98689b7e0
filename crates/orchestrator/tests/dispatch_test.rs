//! Queued execution with retries.

mod common;

use std::sync::Arc;

use cascade_core::{CascadeId, Tier};
use cascade_orchestrator::config::DispatchConfig;
use cascade_orchestrator::dispatch::job_key;
use cascade_orchestrator::tier::FailureKind;
use cascade_orchestrator::{DispatchError, Dispatcher, JobStatus, StateStore};
use common::{Harness, Script, ScriptedCollaborator, demo_request, harness};
use serde_json::json;

fn fast_retries(max_retries: u32) -> DispatchConfig {
    DispatchConfig {
        max_retries,
        base_backoff_ms: 5,
        max_backoff_ms: 20,
        ..DispatchConfig::default()
    }
}

fn dispatcher(h: &Harness, config: &DispatchConfig) -> Dispatcher {
    let store: Arc<dyn StateStore> = h.store.clone();
    Dispatcher::start(h.orchestrator.clone(), store, config)
}

fn flaky_specification(failures: usize) -> Script {
    Script {
        specification: Arc::new(
            ScriptedCollaborator::returning("semantic", json!({"spec": "s"}))
                .failing_first(failures),
        ),
        ..Script::scoring(2.0)
    }
}

#[tokio::test]
async fn test_processor_failures_are_retried_to_completion() {
    let Some(h) = harness(flaky_specification(2)) else {
        return;
    };
    let dispatcher = dispatcher(&h, &fast_retries(3));

    let Ok(cascade_id) = dispatcher.submit(demo_request(json!({"task": "t"}))).await else {
        return;
    };
    let outcome = dispatcher.wait(&cascade_id).await.ok();
    assert_eq!(outcome.as_ref().map(|o| o.is_completed()), Some(true));
    assert_eq!(outcome.as_ref().map(|o| o.cascade_id()), Some(&cascade_id));

    let job = dispatcher.status(&cascade_id).await.ok().flatten();
    assert_eq!(job.as_ref().map(|j| j.status), Some(JobStatus::Completed));
    assert_eq!(job.as_ref().map(|j| j.attempts), Some(3));
    assert_eq!(h.script.specification.calls(), 3);

    // Retries reuse the cascade id, so only one set of workers exists.
    let records = h
        .orchestrator
        .workers()
        .list_cascade(&cascade_id)
        .await
        .unwrap_or_default();
    assert_eq!(records.len(), 4);
    dispatcher.shutdown().await;
}

#[tokio::test]
async fn test_retries_stop_at_bound() {
    let Some(h) = harness(flaky_specification(10)) else {
        return;
    };
    let dispatcher = dispatcher(&h, &fast_retries(2));

    let outcome = dispatcher.run(demo_request(json!({"task": "t"}))).await.ok();
    let failure = outcome.as_ref().and_then(|o| o.failure());
    assert_eq!(failure.map(|f| f.kind), Some(FailureKind::Processor));
    assert_eq!(failure.map(|f| f.tier), Some(Tier::Specification));
    assert_eq!(h.script.specification.calls(), 3);

    let job = match outcome.as_ref() {
        Some(o) => dispatcher.status(o.cascade_id()).await.ok().flatten(),
        None => None,
    };
    assert_eq!(job.as_ref().map(|j| j.status), Some(JobStatus::Failed));
    assert_eq!(job.map(|j| j.attempts), Some(3));
    dispatcher.shutdown().await;
}

#[tokio::test]
async fn test_validation_failures_are_not_retried() {
    let Some(h) = harness(Script::scoring(9.0)) else {
        return;
    };
    let dispatcher = dispatcher(&h, &fast_retries(3));

    let outcome = dispatcher.run(demo_request(json!({"task": "t"}))).await.ok();
    assert_eq!(
        outcome.as_ref().and_then(|o| o.failure()).map(|f| f.kind),
        Some(FailureKind::Validation)
    );
    assert_eq!(h.script.execution.calls(), 1);
    dispatcher.shutdown().await;
}

#[tokio::test]
async fn test_job_record_is_persisted_with_prefix() {
    let Some(h) = harness(Script::scoring(1.0)) else {
        return;
    };
    let dispatcher = dispatcher(&h, &DispatchConfig::default());

    let Ok(cascade_id) = dispatcher.submit(demo_request(json!({"task": "t"}))).await else {
        return;
    };
    let _ = dispatcher.wait(&cascade_id).await;

    let stored = h.store.get(&job_key(&cascade_id)).await.ok().flatten();
    assert_eq!(
        stored.as_ref().and_then(|v| v.get("status")).and_then(|v| v.as_str()),
        Some("completed")
    );
    assert_eq!(
        stored.as_ref().and_then(|v| v.get("cascade_key")).and_then(|v| v.as_str()),
        Some(common::DEMO_KEY)
    );
    dispatcher.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_drains_queue_then_refuses_work() {
    let Some(h) = harness(Script::scoring(1.0)) else {
        return;
    };
    let config = DispatchConfig {
        concurrency: 2,
        ..DispatchConfig::default()
    };
    let dispatcher = dispatcher(&h, &config);

    let mut submitted = Vec::new();
    for i in 0..5 {
        let request = cascade_orchestrator::CascadeRequest::epic(
            "acme",
            "main",
            format!("EP{i}"),
            "batch",
            json!({"task": i}),
        );
        if let Ok(id) = dispatcher.submit(request).await {
            submitted.push(id);
        }
    }
    assert_eq!(submitted.len(), 5);

    dispatcher.shutdown().await;

    for id in &submitted {
        let job = dispatcher.status(id).await.ok().flatten();
        assert_eq!(job.map(|j| j.status), Some(JobStatus::Completed));
    }
    assert_eq!(h.orchestrator.items().list_keys().await.unwrap_or_default().len(), 5);

    let refused = dispatcher.submit(demo_request(json!({}))).await;
    assert!(matches!(refused, Err(DispatchError::ShuttingDown)));
}

#[tokio::test]
async fn test_waiting_on_unknown_job() {
    let Some(h) = harness(Script::scoring(1.0)) else {
        return;
    };
    let dispatcher = dispatcher(&h, &DispatchConfig::default());

    let result = dispatcher.wait(&CascadeId::generate()).await;
    assert!(matches!(result, Err(DispatchError::UnknownJob { .. })));
    dispatcher.shutdown().await;
}
