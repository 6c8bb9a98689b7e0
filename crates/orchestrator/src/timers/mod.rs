//! Worker deadlines.
//!
//! Every in-flight worker gets a timer. If the worker completes first the
//! timer is disarmed; otherwise the timeout handler runs exactly once and
//! the timeout wins over any later success.
//!
//! # Key Types
//!
//! - `TimeoutManager`: arms, replaces, and disarms per-worker timers
//! - `TimeoutHandler`: callback invoked on expiry
//! - `Expiry`: resolves once the handler for a fired timer has finished

mod manager;

pub use manager::{Disarm, Expiry, TimeoutHandler, TimeoutManager};
