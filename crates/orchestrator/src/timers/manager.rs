//! Per-worker deadline tracking.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cascade_core::WorkerId;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Invoked once when a worker's deadline elapses without a disarm.
#[async_trait]
pub trait TimeoutHandler: Send + Sync {
    /// Tear down the timed out worker.
    async fn on_timeout(&self, worker_id: &WorkerId);
}

/// Result of [`TimeoutManager::disarm`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disarm {
    /// The timer was cancelled before it fired.
    Disarmed,
    /// The timer already fired; the timeout is the authoritative outcome.
    AlreadyFired,
    /// Nothing was armed for this worker.
    NotArmed,
}

/// Resolves once the timer's handler has finished running.
#[derive(Debug, Clone)]
pub struct Expiry {
    rx: watch::Receiver<bool>,
}

impl Expiry {
    /// Wait for the timeout handler to complete.
    ///
    /// Never resolves if the timer is disarmed or replaced.
    pub async fn fired(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                // Sender dropped without firing: disarmed or replaced.
                std::future::pending::<()>().await;
            }
        }
    }

    /// Whether the handler has already completed.
    #[must_use]
    pub fn has_fired(&self) -> bool {
        *self.rx.borrow()
    }
}

#[derive(Debug)]
struct ArmedTimer {
    generation: u64,
    task: JoinHandle<()>,
    done: watch::Sender<bool>,
}

#[derive(Debug, Default)]
struct TimerTable {
    next_generation: u64,
    armed: HashMap<WorkerId, ArmedTimer>,
    fired: HashSet<WorkerId>,
}

/// Attaches a deadline to every in-flight worker.
///
/// Expiry and disarm are decided under one lock, so each timer ends exactly
/// one way: disarmed, or fired with the handler invoked once.
#[derive(Clone)]
pub struct TimeoutManager {
    table: Arc<Mutex<TimerTable>>,
    handler: Arc<dyn TimeoutHandler>,
}

impl std::fmt::Debug for TimeoutManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeoutManager").finish_non_exhaustive()
    }
}

impl TimeoutManager {
    /// Create a manager that reports expiries to `handler`.
    #[must_use]
    pub fn new(handler: Arc<dyn TimeoutHandler>) -> Self {
        Self {
            table: Arc::new(Mutex::new(TimerTable::default())),
            handler,
        }
    }

    /// Start a countdown for `worker_id` ending at `deadline`.
    ///
    /// Re-arming an armed worker replaces its previous timer.
    pub async fn arm(&self, worker_id: &WorkerId, deadline: Instant) -> Expiry {
        let (done, rx) = watch::channel(false);
        let mut table = self.table.lock().await;

        let generation = table.next_generation;
        table.next_generation = generation.wrapping_add(1);
        table.fired.remove(worker_id);

        let task = tokio::spawn(run_timer(
            Arc::clone(&self.table),
            Arc::clone(&self.handler),
            worker_id.clone(),
            generation,
            deadline,
        ));

        if let Some(previous) = table.armed.insert(
            worker_id.clone(),
            ArmedTimer {
                generation,
                task,
                done,
            },
        ) {
            previous.task.abort();
            debug!(worker_id = %worker_id, "replaced armed timer");
        }

        Expiry { rx }
    }

    /// Start a countdown of `timeout` from now.
    pub async fn arm_after(&self, worker_id: &WorkerId, timeout: Duration) -> Expiry {
        let deadline = Instant::now()
            .checked_add(timeout)
            .unwrap_or_else(far_future);
        self.arm(worker_id, deadline).await
    }

    /// Cancel the countdown for `worker_id`.
    ///
    /// Also consumes the fired marker, so a later call reports `NotArmed`.
    pub async fn disarm(&self, worker_id: &WorkerId) -> Disarm {
        let mut table = self.table.lock().await;
        if let Some(timer) = table.armed.remove(worker_id) {
            timer.task.abort();
            return Disarm::Disarmed;
        }
        if table.fired.remove(worker_id) {
            return Disarm::AlreadyFired;
        }
        Disarm::NotArmed
    }

    /// Cancel every armed timer. Returns how many were cancelled.
    pub async fn disarm_all(&self) -> usize {
        let mut table = self.table.lock().await;
        let count = table.armed.len();
        for (_, timer) in table.armed.drain() {
            timer.task.abort();
        }
        count
    }

    /// Whether a timer is currently armed for `worker_id`.
    pub async fn is_armed(&self, worker_id: &WorkerId) -> bool {
        self.table.lock().await.armed.contains_key(worker_id)
    }

    /// Number of armed timers.
    pub async fn armed_count(&self) -> usize {
        self.table.lock().await.armed.len()
    }
}

fn far_future() -> Instant {
    // About 30 years.
    Instant::now()
        .checked_add(Duration::from_secs(946_080_000))
        .unwrap_or_else(Instant::now)
}

async fn run_timer(
    table: Arc<Mutex<TimerTable>>,
    handler: Arc<dyn TimeoutHandler>,
    worker_id: WorkerId,
    generation: u64,
    deadline: Instant,
) {
    tokio::time::sleep_until(deadline).await;

    let done = {
        let mut table = table.lock().await;
        let current = table
            .armed
            .get(&worker_id)
            .is_some_and(|timer| timer.generation == generation);
        if !current {
            return;
        }
        let Some(timer) = table.armed.remove(&worker_id) else {
            return;
        };
        table.fired.insert(worker_id.clone());
        timer.done
    };

    warn!(worker_id = %worker_id, "worker deadline elapsed");
    handler.on_timeout(&worker_id).await;
    let _ = done.send(true);
}
