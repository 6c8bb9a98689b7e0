//! Bounded queue plus worker pool running cascades in the background.

use std::collections::HashMap;
use std::sync::Arc;

use cascade_core::CascadeId;
use tokio::sync::{Mutex, Semaphore, mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{error, info, warn};

use super::job::{JobRecord, JobStatus, JobStore};
use super::retry::RetryPolicy;
use super::{DispatchError, DispatchResult};
use crate::cascade::{CascadeOrchestrator, CascadeOutcome, CascadeRequest};
use crate::config::DispatchConfig;
use crate::persistence::StateStore;

type OutcomeSender = watch::Sender<Option<CascadeOutcome>>;
type OutcomeReceiver = watch::Receiver<Option<CascadeOutcome>>;
type Waiters = Arc<Mutex<HashMap<CascadeId, OutcomeReceiver>>>;

struct Job {
    record: JobRecord,
    request: CascadeRequest,
    outcome_tx: OutcomeSender,
}

/// Runs jobs: one cascade per job, re-run on retryable failures.
struct JobRunner {
    orchestrator: CascadeOrchestrator,
    jobs: JobStore,
    policy: RetryPolicy,
    waiters: Waiters,
}

impl JobRunner {
    async fn run(&self, job: Job) {
        let Job {
            mut record,
            request,
            outcome_tx,
        } = job;
        let cascade_id = record.cascade_id.clone();
        let mut retries: u32 = 0;

        let outcome = loop {
            record.attempts = record.attempts.saturating_add(1);
            record.set_status(JobStatus::Running);
            self.persist(&record).await;

            let outcome = self
                .orchestrator
                .execute_with_id(cascade_id.clone(), &request)
                .await;

            if !outcome.is_retryable() || !self.policy.allows_retry(retries) {
                break outcome;
            }

            let delay = self.policy.backoff_with_jitter(retries);
            retries = retries.saturating_add(1);
            warn!(
                cascade_id = %cascade_id,
                attempt = record.attempts,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                %outcome,
                "cascade failed, retrying"
            );
            record.set_status(JobStatus::Retrying);
            self.persist(&record).await;
            tokio::time::sleep(delay).await;
        };

        info!(
            cascade_id = %cascade_id,
            attempts = record.attempts,
            %outcome,
            "job finished"
        );
        record.finish(outcome.clone());
        self.persist(&record).await;
        outcome_tx.send_replace(Some(outcome));
        self.waiters.lock().await.remove(&cascade_id);
    }

    async fn persist(&self, record: &JobRecord) {
        if let Err(e) = self.jobs.save(record).await {
            warn!(cascade_id = %record.cascade_id, error = %e, "could not save job record");
        }
    }
}

/// Accepts cascade submissions and runs them on a bounded worker pool.
///
/// Submissions queue up to the configured capacity; `submit` waits for room
/// once the queue is full.
pub struct Dispatcher {
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    jobs: JobStore,
    waiters: Waiters,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("jobs", &self.jobs)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Start a dispatcher. Must be called inside a tokio runtime.
    #[must_use]
    pub fn start(
        orchestrator: CascadeOrchestrator,
        store: Arc<dyn StateStore>,
        config: &DispatchConfig,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let jobs = JobStore::new(store, config.result_ttl());
        let waiters: Waiters = Arc::new(Mutex::new(HashMap::new()));
        let runner = Arc::new(JobRunner {
            orchestrator,
            jobs: jobs.clone(),
            policy: config.retry_policy(),
            waiters: Arc::clone(&waiters),
        });
        let pool = Arc::new(Semaphore::new(config.concurrency.max(1)));
        let worker = tokio::spawn(run_queue(receiver, pool, runner));
        info!(
            concurrency = config.concurrency,
            queue_capacity = config.queue_capacity,
            "dispatcher started"
        );

        Self {
            sender: Mutex::new(Some(sender)),
            jobs,
            waiters,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Enqueue a cascade and return its id without waiting for it to run.
    ///
    /// # Errors
    ///
    /// Returns `ShuttingDown` once [`Dispatcher::shutdown`] has been called, or
    /// a persistence error if the job record cannot be written.
    pub async fn submit(&self, request: CascadeRequest) -> DispatchResult<CascadeId> {
        let sender = self
            .sender
            .lock()
            .await
            .clone()
            .ok_or(DispatchError::ShuttingDown)?;

        let cascade_id = CascadeId::generate();
        let cascade_key = request.key().map(|k| k.to_string()).unwrap_or_default();
        let record = JobRecord::queued(cascade_id.clone(), cascade_key);
        self.jobs.save(&record).await?;

        let (outcome_tx, outcome_rx) = watch::channel(None);
        self.waiters
            .lock()
            .await
            .insert(cascade_id.clone(), outcome_rx);

        let job = Job {
            record,
            request,
            outcome_tx,
        };
        if sender.send(job).await.is_err() {
            self.waiters.lock().await.remove(&cascade_id);
            return Err(DispatchError::ShuttingDown);
        }
        info!(cascade_id = %cascade_id, "cascade submitted");
        Ok(cascade_id)
    }

    /// Current record of a job.
    ///
    /// # Errors
    ///
    /// Returns an error if the job store cannot be read.
    pub async fn status(&self, cascade_id: &CascadeId) -> DispatchResult<Option<JobRecord>> {
        Ok(self.jobs.get(cascade_id).await?)
    }

    /// Wait for a job to finish and return its outcome.
    ///
    /// # Errors
    ///
    /// Returns `UnknownJob` if no such job exists, or `Abandoned` if the job
    /// was dropped before finishing.
    pub async fn wait(&self, cascade_id: &CascadeId) -> DispatchResult<CascadeOutcome> {
        let receiver = self.waiters.lock().await.get(cascade_id).cloned();

        if let Some(mut receiver) = receiver {
            let outcome = receiver
                .wait_for(Option::is_some)
                .await
                .ok()
                .and_then(|outcome| outcome.clone());
            if let Some(outcome) = outcome {
                return Ok(outcome);
            }
        }

        match self.jobs.get(cascade_id).await? {
            Some(JobRecord {
                outcome: Some(outcome),
                ..
            }) => Ok(outcome),
            Some(_) => Err(DispatchError::Abandoned {
                cascade_id: cascade_id.clone(),
            }),
            None => Err(DispatchError::UnknownJob {
                cascade_id: cascade_id.clone(),
            }),
        }
    }

    /// Submit and wait in one call.
    ///
    /// # Errors
    ///
    /// See [`Dispatcher::submit`] and [`Dispatcher::wait`].
    pub async fn run(&self, request: CascadeRequest) -> DispatchResult<CascadeOutcome> {
        let cascade_id = self.submit(request).await?;
        self.wait(&cascade_id).await
    }

    /// Stop accepting work, then wait for queued and running jobs to finish.
    pub async fn shutdown(&self) {
        drop(self.sender.lock().await.take());
        let worker = self.worker.lock().await.take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                error!(error = %e, "dispatcher worker panicked");
            }
        }
        info!("dispatcher stopped");
    }
}

async fn run_queue(
    mut receiver: mpsc::Receiver<Job>,
    pool: Arc<Semaphore>,
    runner: Arc<JobRunner>,
) {
    let mut running = JoinSet::new();

    while let Some(job) = receiver.recv().await {
        let Ok(permit) = Arc::clone(&pool).acquire_owned().await else {
            break;
        };
        let runner = Arc::clone(&runner);
        running.spawn(async move {
            runner.run(job).await;
            drop(permit);
        });

        while let Some(joined) = running.try_join_next() {
            if let Err(e) = joined {
                error!(error = %e, "job task failed");
            }
        }
    }

    while let Some(joined) = running.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "job task failed");
        }
    }
}
