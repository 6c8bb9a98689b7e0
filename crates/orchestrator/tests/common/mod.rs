//! Shared fixtures: scripted collaborators and an orchestrator over an
//! in-memory store.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use cascade_core::Tier;
use cascade_core::WorkerId;
use cascade_orchestrator::collaborators::MemoryWorktrees;
use cascade_orchestrator::tier::{
    Collaborator, CollaboratorError, CollaboratorProcessor, ExecutionProcessor, IntakeProcessor,
    ReportedRiskScorer, TierRequest,
};
use cascade_orchestrator::timers::TimeoutHandler;
use cascade_orchestrator::{
    CascadeOrchestrator, CascadeRequest, MemoryStateStore, StateStore, TierProcessors,
    ValidationGate,
};
use serde_json::json;
use tempfile::TempDir;
use tokio::sync::Notify;

/// Holds a collaborator's answer until a deadline elapses, and holds the
/// timeout handler until the answer is in.
///
/// Installed as both the collaborator's gate and the orchestrator's timeout
/// observer, it forces a success to arrive after the timer fired but before
/// teardown finished.
#[derive(Default)]
pub struct LateAnswer {
    release: Notify,
    answered: Notify,
    answers: AtomicUsize,
}

impl LateAnswer {
    /// Answers produced after the deadline elapsed.
    pub fn answers(&self) -> usize {
        self.answers.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TimeoutHandler for LateAnswer {
    async fn on_timeout(&self, _worker_id: &WorkerId) {
        self.release.notify_one();
        self.answered.notified().await;
    }
}

/// A collaborator that answers from a script.
pub struct ScriptedCollaborator {
    name: String,
    output: serde_json::Value,
    failures_left: AtomicUsize,
    delay: Duration,
    gate: Option<Arc<LateAnswer>>,
    calls: AtomicUsize,
}

impl ScriptedCollaborator {
    pub fn returning(name: &str, output: serde_json::Value) -> Self {
        Self {
            name: name.to_string(),
            output,
            failures_left: AtomicUsize::new(0),
            delay: Duration::ZERO,
            gate: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Answer only once `gate` is released by an elapsed deadline.
    pub fn gated(mut self, gate: Arc<LateAnswer>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Fail the first `n` calls.
    pub fn failing_first(self, n: usize) -> Self {
        self.failures_left.store(n, Ordering::SeqCst);
        self
    }

    /// Sleep before every answer.
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Collaborator for ScriptedCollaborator {
    fn name(&self) -> &str {
        &self.name
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(3600)
    }

    async fn call(&self, _request: &TierRequest) -> Result<serde_json::Value, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(gate) = &self.gate {
            gate.release.notified().await;
        }
        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(CollaboratorError::failed(&self.name, "scripted failure"));
        }
        if let Some(gate) = &self.gate {
            gate.answers.fetch_add(1, Ordering::SeqCst);
            gate.answered.notify_one();
        }
        Ok(self.output.clone())
    }
}

/// Collaborators for tiers 1 to 3.
pub struct Script {
    pub specification: Arc<ScriptedCollaborator>,
    pub synthesis: Arc<ScriptedCollaborator>,
    pub execution: Arc<ScriptedCollaborator>,
}

impl Script {
    /// Every collaborator succeeds; execution reports `score`.
    pub fn scoring(score: f64) -> Self {
        Self::with_execution(json!({"risk_score": score, "summary": "done"}))
    }

    pub fn with_execution(output: serde_json::Value) -> Self {
        Self {
            specification: Arc::new(ScriptedCollaborator::returning(
                "semantic",
                json!({"spec": "requirements"}),
            )),
            synthesis: Arc::new(ScriptedCollaborator::returning(
                "synthesis",
                json!({"plan": ["step one"]}),
            )),
            execution: Arc::new(ScriptedCollaborator::returning("execution", output)),
        }
    }

    pub fn processors(&self) -> Option<TierProcessors> {
        let gate = ValidationGate::default();
        let intake = Arc::new(IntakeProcessor::new(
            gate,
            Arc::new(ReportedRiskScorer::default().or_default(0.0)),
        ));
        let specification = Arc::new(CollaboratorProcessor::new(
            Tier::Specification,
            self.specification.clone(),
        ));
        let synthesis = Arc::new(CollaboratorProcessor::new(
            Tier::Synthesis,
            self.synthesis.clone(),
        ));
        let execution = Arc::new(ExecutionProcessor::new(
            self.execution.clone(),
            gate,
            Arc::new(ReportedRiskScorer::default()),
        ));
        TierProcessors::new(intake, specification, synthesis, execution).ok()
    }
}

/// An orchestrator with its store, workspace root, and script.
pub struct Harness {
    pub store: Arc<MemoryStateStore>,
    pub orchestrator: CascadeOrchestrator,
    pub script: Script,
    pub worktrees: Option<Arc<MemoryWorktrees>>,
    pub workspace: TempDir,
}

pub struct HarnessOptions {
    pub worker_timeout: Duration,
    pub worker_ttl: Duration,
    pub worktrees: bool,
    pub timeout_observer: Option<Arc<dyn TimeoutHandler>>,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            worker_timeout: Duration::from_secs(3600),
            worker_ttl: Duration::from_secs(3600),
            worktrees: false,
            timeout_observer: None,
        }
    }
}

pub fn harness(script: Script) -> Option<Harness> {
    harness_with(script, HarnessOptions::default())
}

pub fn harness_with(script: Script, options: HarnessOptions) -> Option<Harness> {
    let workspace = tempfile::tempdir().ok()?;
    let store = Arc::new(MemoryStateStore::new());
    let shared: Arc<dyn StateStore> = store.clone();

    let mut builder = CascadeOrchestrator::builder(shared, script.processors()?)
        .worker_timeout(options.worker_timeout)
        .worker_ttl(options.worker_ttl)
        .workspace_root(workspace.path().join("workers"));
    if let Some(observer) = options.timeout_observer {
        builder = builder.timeout_observer(observer);
    }

    let worktrees = options
        .worktrees
        .then(|| Arc::new(MemoryWorktrees::new(workspace.path().join("worktrees"))));
    if let Some(worktrees) = &worktrees {
        builder = builder.worktrees(worktrees.clone());
    }

    Some(Harness {
        store,
        orchestrator: builder.build(),
        script,
        worktrees,
        workspace,
    })
}

/// The acme/feature-x/EP001/demo epic request.
pub fn demo_request(payload: serde_json::Value) -> CascadeRequest {
    CascadeRequest::epic("acme", "feature-x", "EP001", "demo", payload)
}

pub const DEMO_KEY: &str = "repo-acme_branch-feature-x_epics-EP001-demo";
