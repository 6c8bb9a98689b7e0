//! Distributed dispatch.
//!
//! Submissions go into a bounded queue and run on a fixed-size pool. A
//! cascade that fails with a processor error is re-run under the same
//! cascade id after an exponential backoff; validation failures and
//! timeouts are final. Every submission is tracked as a job record.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

mod dispatcher;
mod job;
mod retry;

use cascade_core::CascadeId;
use thiserror::Error;

use crate::persistence::PersistenceError;

pub use dispatcher::Dispatcher;
pub use job::{JOB_PREFIX, JobRecord, JobStatus, JobStore, job_key};
pub use retry::RetryPolicy;

/// Errors from the dispatch layer.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("dispatcher is shutting down")]
    ShuttingDown,

    #[error("unknown job: {cascade_id}")]
    UnknownJob { cascade_id: CascadeId },

    #[error("job {cascade_id} was dropped before finishing")]
    Abandoned { cascade_id: CascadeId },

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

pub type DispatchResult<T> = std::result::Result<T, DispatchError>;
