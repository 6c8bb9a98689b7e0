//! Drives one cascade through its four tiers.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use cascade_core::{CascadeId, Tier, Validation, WorkItemKey, WorkItemKind, WorkerId};
use tracing::{error, info, warn};

use super::outcome::{CascadeCompletion, CascadeFailure, CascadeOutcome};
use super::request::CascadeRequest;
use super::teardown::CascadeTimeoutHandler;
use crate::cleanup::{CleanupManager, CleanupReport};
use crate::collaborators::{CompletionNotifier, LoggingNotifier, WorktreeManager};
use crate::persistence::{
    PersistenceResult, StateStore, WorkItemRecord, WorkItemStore, WorkerRecord, WorkerStatus,
    WorkerStore,
};
use crate::tier::{FailureKind, TierOutput, TierProcessors, TierRequest};
use crate::timers::{Disarm, TimeoutHandler, TimeoutManager};

const DEFAULT_WORKER_TIMEOUT: Duration = Duration::from_secs(3600);
const DEFAULT_WORKER_TTL: Duration = Duration::from_secs(3600);

/// How a single tier ended, when it did not succeed.
struct TierFailure {
    kind: FailureKind,
    reason: String,
    cleanup: CleanupReport,
}

/// Builder for [`CascadeOrchestrator`].
pub struct CascadeOrchestratorBuilder {
    store: Arc<dyn StateStore>,
    processors: TierProcessors,
    worker_timeout: Duration,
    worker_ttl: Duration,
    workspace_root: PathBuf,
    worktrees: Option<Arc<dyn WorktreeManager>>,
    notifier: Arc<dyn CompletionNotifier>,
    timeout_observer: Option<Arc<dyn TimeoutHandler>>,
}

impl CascadeOrchestratorBuilder {
    /// Per-worker deadline (default 1 hour).
    #[must_use]
    pub const fn worker_timeout(mut self, timeout: Duration) -> Self {
        self.worker_timeout = timeout;
        self
    }

    /// Worker record expiration, refreshed on every write (default 1 hour).
    #[must_use]
    pub const fn worker_ttl(mut self, ttl: Duration) -> Self {
        self.worker_ttl = ttl;
        self
    }

    /// Directory under which per-worker workspaces are created.
    #[must_use]
    pub fn workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace_root = root.into();
        self
    }

    /// Create a worktree for every worker.
    #[must_use]
    pub fn worktrees(mut self, worktrees: Arc<dyn WorktreeManager>) -> Self {
        self.worktrees = Some(worktrees);
        self
    }

    /// Notified after every completed cascade.
    #[must_use]
    pub fn notifier(mut self, notifier: Arc<dyn CompletionNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Told about every elapsed deadline before the cascade is torn down.
    #[must_use]
    pub fn timeout_observer(mut self, observer: Arc<dyn TimeoutHandler>) -> Self {
        self.timeout_observer = Some(observer);
        self
    }

    #[must_use]
    pub fn build(self) -> CascadeOrchestrator {
        let workers = WorkerStore::new(Arc::clone(&self.store), self.worker_ttl);
        let items = WorkItemStore::new(self.store);
        let cleanup = Arc::new(CleanupManager::new(workers.clone(), self.worktrees.clone()));
        let mut handler = CascadeTimeoutHandler::new(workers.clone(), Arc::clone(&cleanup));
        if let Some(observer) = self.timeout_observer {
            handler = handler.with_observer(observer);
        }
        let timeout_handler = Arc::new(handler);
        let timeouts = TimeoutManager::new(timeout_handler.clone());

        CascadeOrchestrator {
            workers,
            items,
            processors: self.processors,
            timeouts,
            timeout_handler,
            cleanup,
            notifier: self.notifier,
            worktrees: self.worktrees,
            worker_timeout: self.worker_timeout,
            workspace_root: self.workspace_root,
        }
    }
}

/// Drives cascades: one worker per tier, strictly in order.
///
/// Cheap to clone; clones share stores, timers, and cleanup.
#[derive(Clone)]
pub struct CascadeOrchestrator {
    workers: WorkerStore,
    items: WorkItemStore,
    processors: TierProcessors,
    timeouts: TimeoutManager,
    timeout_handler: Arc<CascadeTimeoutHandler>,
    cleanup: Arc<CleanupManager>,
    notifier: Arc<dyn CompletionNotifier>,
    worktrees: Option<Arc<dyn WorktreeManager>>,
    worker_timeout: Duration,
    workspace_root: PathBuf,
}

impl std::fmt::Debug for CascadeOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CascadeOrchestrator")
            .field("worker_timeout", &self.worker_timeout)
            .field("workspace_root", &self.workspace_root)
            .field("worktrees", &self.worktrees.is_some())
            .finish_non_exhaustive()
    }
}

impl CascadeOrchestrator {
    /// Start building an orchestrator over `store`.
    #[must_use]
    pub fn builder(store: Arc<dyn StateStore>, processors: TierProcessors) -> CascadeOrchestratorBuilder {
        CascadeOrchestratorBuilder {
            store,
            processors,
            worker_timeout: DEFAULT_WORKER_TIMEOUT,
            worker_ttl: DEFAULT_WORKER_TTL,
            workspace_root: std::env::temp_dir().join("cascade-workspaces"),
            worktrees: None,
            notifier: Arc::new(LoggingNotifier),
            timeout_observer: None,
        }
    }

    #[must_use]
    pub const fn workers(&self) -> &WorkerStore {
        &self.workers
    }

    #[must_use]
    pub const fn items(&self) -> &WorkItemStore {
        &self.items
    }

    #[must_use]
    pub fn cleanup_manager(&self) -> &CleanupManager {
        &self.cleanup
    }

    #[must_use]
    pub const fn timeouts(&self) -> &TimeoutManager {
        &self.timeouts
    }

    #[must_use]
    pub const fn worker_timeout(&self) -> Duration {
        self.worker_timeout
    }

    /// Run a new cascade for `request`.
    pub async fn execute_cascade(&self, request: &CascadeRequest) -> CascadeOutcome {
        self.execute_with_id(CascadeId::generate(), request).await
    }

    /// Run a cascade under a caller-chosen id.
    ///
    /// Retries reuse the id, so worker ids and their timers stay stable.
    pub async fn execute_with_id(
        &self,
        cascade_id: CascadeId,
        request: &CascadeRequest,
    ) -> CascadeOutcome {
        let key = match request.key() {
            Ok(key) => key,
            Err(e) => {
                error!(cascade_id = %cascade_id, error = %e, "invalid routing identifiers");
                return CascadeOutcome::Failed(CascadeFailure {
                    cascade_id,
                    cascade_key: String::new(),
                    tier: Tier::Intake,
                    kind: FailureKind::Validation,
                    reason: e.to_string(),
                    cleanup: CleanupReport::default(),
                });
            }
        };
        let cascade_key = key.to_string();
        info!(cascade_id = %cascade_id, cascade_key = %cascade_key, "cascade started");

        let mut input = request.payload.clone();
        let mut artifacts = BTreeMap::new();
        let mut validations: Vec<Validation> = Vec::new();

        for tier in Tier::ALL {
            let worker_id = cascade_id.worker(tier);
            match self.run_tier(&worker_id, &cascade_key, input).await {
                Ok(output) => {
                    validations.extend(output.validation);
                    artifacts.insert(tier.to_string(), output.output.clone());
                    input = output.output;
                }
                Err(failure) => {
                    error!(
                        cascade_id = %cascade_id,
                        cascade_key = %cascade_key,
                        %tier,
                        kind = %failure.kind,
                        reason = %failure.reason,
                        "cascade failed"
                    );
                    return CascadeOutcome::Failed(CascadeFailure {
                        cascade_id,
                        cascade_key,
                        tier,
                        kind: failure.kind,
                        reason: failure.reason,
                        cleanup: failure.cleanup,
                    });
                }
            }
        }

        let work_items = match self
            .persist_work_items(&cascade_id, &key, &input, artifacts, &validations)
            .await
        {
            Ok(keys) => keys,
            Err(e) => {
                let reason = format!("could not persist work items: {e}");
                error!(cascade_id = %cascade_id, cascade_key = %cascade_key, reason = %reason, "cascade failed");
                let cleanup = self.cleanup.cleanup(&cascade_id.worker(Tier::Execution)).await;
                return CascadeOutcome::Failed(CascadeFailure {
                    cascade_id,
                    cascade_key,
                    tier: Tier::Execution,
                    kind: FailureKind::Processor,
                    reason,
                    cleanup,
                });
            }
        };

        // Records stay as the success trail until they expire; nothing else
        // of the cascade is kept.
        let release = self.cleanup.release(&cascade_id).await;

        let completion = CascadeCompletion {
            concern: validations.iter().any(Validation::concern),
            cascade_id,
            cascade_key,
            result: input,
            work_items,
            validations,
            release,
        };

        if let Err(e) = self.notifier.notify(&completion).await {
            warn!(cascade_id = %completion.cascade_id, error = %e, "completion notification failed");
        }
        info!(
            cascade_id = %completion.cascade_id,
            cascade_key = %completion.cascade_key,
            concern = completion.concern,
            "cascade completed"
        );
        CascadeOutcome::Completed(completion)
    }

    /// Run one tier: create its worker, invoke its processor under a
    /// deadline, and record the result. Every failure path has already torn
    /// the cascade down when it returns.
    async fn run_tier(
        &self,
        worker_id: &WorkerId,
        cascade_key: &str,
        input: serde_json::Value,
    ) -> Result<TierOutput, TierFailure> {
        let tier = worker_id.tier();

        let record = match self.start_worker(worker_id, cascade_key).await {
            Ok(record) => record,
            Err((kind, reason)) => {
                return Err(self.abort(worker_id, kind, reason, None).await);
            }
        };

        // Armed after the worker is active, so only the timer can write the
        // record until it is disarmed.
        let mut expiry = self.timeouts.arm_after(worker_id, record.remaining()).await;

        let processor = Arc::clone(self.processors.get(tier));
        let request = TierRequest::new(input, cascade_key);

        let result = tokio::select! {
            result = processor.process(request) => result,
            () = expiry.fired() => {
                return Err(self.timed_out(worker_id).await);
            }
        };

        if self.timeouts.disarm(worker_id).await == Disarm::AlreadyFired {
            // The timer won the race; its handler owns teardown.
            expiry.fired().await;
            return Err(self.timed_out(worker_id).await);
        }

        match result {
            Ok(output) => {
                let validation = output.validation.clone();
                if let Err(e) = self
                    .workers
                    .transition(worker_id, WorkerStatus::Succeeded, |r| r.validation = validation)
                    .await
                {
                    let reason = format!("could not record success: {e}");
                    return Err(self.abort(worker_id, FailureKind::Processor, reason, None).await);
                }
                self.assign_produced_files(&record, &output.output).await;
                info!(worker_id = %worker_id, %tier, "worker succeeded");
                Ok(output)
            }
            Err(e) => {
                let validation = e.validation().cloned();
                Err(self.abort(worker_id, e.kind(), e.to_string(), validation).await)
            }
        }
    }

    /// Write the pending record, create the workspace and worktree, and
    /// mark the worker active.
    ///
    /// Worktree creation runs against the worker's deadline.
    async fn start_worker(
        &self,
        worker_id: &WorkerId,
        cascade_key: &str,
    ) -> Result<WorkerRecord, (FailureKind, String)> {
        let processor_error = |e: String| (FailureKind::Processor, e);
        let workspace = self.workspace_root.join(worker_id.to_string());
        let mut record = WorkerRecord::new(
            worker_id.clone(),
            cascade_key,
            workspace.clone(),
            self.worker_timeout,
        );
        self.workers
            .save(&record)
            .await
            .map_err(|e| processor_error(format!("could not write worker record: {e}")))?;

        tokio::fs::create_dir_all(&workspace).await.map_err(|e| {
            processor_error(format!("could not create workspace {}: {e}", workspace.display()))
        })?;

        if let Some(worktrees) = &self.worktrees {
            let branch = format!("cascade/{worker_id}");
            let path = tokio::time::timeout(record.remaining(), worktrees.create_worktree(&branch))
                .await
                .map_err(|_| {
                    (
                        FailureKind::Timeout,
                        format!("{worker_id} exceeded its deadline creating a worktree"),
                    )
                })?
                .map_err(|e| processor_error(format!("could not create worktree: {e}")))?;
            record = record.with_worktree(path, branch);
            self.workers
                .save(&record)
                .await
                .map_err(|e| processor_error(format!("could not write worker record: {e}")))?;
        }

        let record = self
            .workers
            .update_status(worker_id, WorkerStatus::Active, None)
            .await
            .map_err(|e| processor_error(format!("could not activate worker: {e}")))?;
        info!(worker_id = %worker_id, tier = %worker_id.tier(), cascade_key, "worker active");
        Ok(record)
    }

    /// Persist a terminal failure and tear down the cascade. Timeouts end
    /// the worker as `timed_out`, everything else as `failed`.
    async fn abort(
        &self,
        worker_id: &WorkerId,
        kind: FailureKind,
        reason: String,
        validation: Option<Validation>,
    ) -> TierFailure {
        let failure_reason = reason.clone();
        let status = if kind == FailureKind::Timeout {
            WorkerStatus::TimedOut
        } else {
            WorkerStatus::Failed
        };
        if let Err(e) = self
            .workers
            .transition(worker_id, status, |r| {
                r.failure_reason = Some(failure_reason);
                if validation.is_some() {
                    r.validation = validation;
                }
            })
            .await
        {
            warn!(worker_id = %worker_id, error = %e, "could not record failure");
        }

        let cleanup = self.cleanup.cleanup(worker_id).await;
        TierFailure {
            kind,
            reason,
            cleanup,
        }
    }

    /// Collect the outcome of a fired timer. The timeout handler has already
    /// marked the worker and cleaned up.
    async fn timed_out(&self, worker_id: &WorkerId) -> TierFailure {
        let _ = self.timeouts.disarm(worker_id).await;
        let cleanup = self
            .timeout_handler
            .take_report(worker_id)
            .await
            .unwrap_or_default();
        TierFailure {
            kind: FailureKind::Timeout,
            reason: format!(
                "{worker_id} exceeded its {}s deadline",
                self.worker_timeout.as_secs()
            ),
            cleanup,
        }
    }

    /// Record the files a worker reported in its output's `files` array.
    async fn assign_produced_files(&self, record: &WorkerRecord, output: &serde_json::Value) {
        let (Some(worktrees), Some(branch)) = (&self.worktrees, &record.worktree_branch) else {
            return;
        };
        let Some(files) = output.get("files").and_then(serde_json::Value::as_array) else {
            return;
        };
        let paths: Vec<PathBuf> = files
            .iter()
            .filter_map(serde_json::Value::as_str)
            .map(PathBuf::from)
            .collect();
        if let Err(e) = worktrees.assign_files(branch, &paths).await {
            warn!(worker_id = %record.worker_id, error = %e, "could not assign files");
        }
    }

    /// Write the primary work item and any child stories. Returns their keys,
    /// primary first.
    async fn persist_work_items(
        &self,
        cascade_id: &CascadeId,
        key: &WorkItemKey,
        result: &serde_json::Value,
        artifacts: BTreeMap<String, serde_json::Value>,
        validations: &[Validation],
    ) -> PersistenceResult<Vec<WorkItemKey>> {
        let primary = WorkItemRecord::new(key.clone(), cascade_id.clone(), result.clone())
            .with_artifacts(artifacts)
            .with_validations(validations.to_vec());
        self.items.upsert(primary).await?;
        let mut keys = vec![key.clone()];

        if key.kind() != WorkItemKind::Epic {
            return Ok(keys);
        }
        let stories = result
            .get("stories")
            .and_then(serde_json::Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        for story in stories {
            let id = story.get("id").and_then(serde_json::Value::as_str);
            let name = story.get("name").and_then(serde_json::Value::as_str);
            let (Some(id), Some(name)) = (id, name) else {
                warn!(cascade_key = %key, "skipping story without id and name");
                continue;
            };
            let child = match key.child_story(id, name) {
                Ok(child) => child,
                Err(e) => {
                    warn!(cascade_key = %key, error = %e, "skipping story with invalid key");
                    continue;
                }
            };
            self.items
                .upsert(WorkItemRecord::new(child.clone(), cascade_id.clone(), story.clone()))
                .await?;
            keys.push(child);
        }
        Ok(keys)
    }
}
