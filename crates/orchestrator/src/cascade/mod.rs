//! Cascade orchestration.
//!
//! A cascade runs one worker per tier, intake through execution. Each worker
//! gets a record, a workspace, and a deadline. The first failure or timeout
//! tears down every worker of the cascade; a run that clears tier 3 writes
//! its work items under the cascade key.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

mod engine;
mod outcome;
mod request;
mod teardown;

pub use engine::{CascadeOrchestrator, CascadeOrchestratorBuilder};
pub use outcome::{CascadeCompletion, CascadeFailure, CascadeOutcome};
pub use request::CascadeRequest;
pub use teardown::CascadeTimeoutHandler;
