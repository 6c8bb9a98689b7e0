//! # Cascade Orchestrator
//!
//! Runs four-tier cascades: intake, specification, synthesis, execution.
//! Each tier runs in its own short-lived worker with a deadline; validation
//! gates after tiers 0 and 3 stop risky output, and any failure tears down
//! every worker of the cascade. Completed cascades leave work items keyed by
//! a deterministic cascade key.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![deny(clippy::expect_used)]

pub use cascade_core::{Error, Result};

/// Cascade orchestration across the four tiers
pub mod cascade;

/// Teardown of a cascade's workers
pub mod cleanup;

/// Worktree, issue tracker, and notification interfaces
pub mod collaborators;

/// TOML configuration
pub mod config;

/// Queued, retried background execution
pub mod dispatch;

/// Key-value state store and typed record stores
pub mod persistence;

/// Issue tracker synchronization
pub mod sync;

/// Tier processors and validation gates
pub mod tier;

/// Per-worker deadlines
pub mod timers;

pub use cascade::{
    CascadeCompletion, CascadeFailure, CascadeOrchestrator, CascadeOrchestratorBuilder,
    CascadeOutcome, CascadeRequest,
};
pub use cleanup::{CleanupManager, CleanupReport};
pub use config::{CascadeConfig, ConfigError};
pub use dispatch::{DispatchError, DispatchResult, Dispatcher, JobRecord, JobStatus, RetryPolicy};
pub use persistence::{
    MemoryStateStore, PersistenceError, PersistenceResult, StateStore, SurrealStateStore,
};
pub use sync::{SyncReport, SyncSweep, TrackerNotifier};
pub use tier::{FailureKind, TierProcessor, TierProcessors, ValidationGate};
pub use timers::TimeoutManager;
