//! # Cascade Core
//!
//! Pure domain types shared by the cascading task orchestrator: tier
//! ordering, cascade and worker identities, and the work-item key format used
//! for interoperability with external issue sync.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![deny(clippy::expect_used)]

pub mod error;
pub mod ids;
pub mod key;
pub mod result;
pub mod tier;
pub mod validation;

pub use error::Error;
pub use ids::{CascadeId, WorkerId};
pub use key::{REPO_KEYS_INDEX, WorkItemKey, WorkItemKind, WorkItemTarget};
pub use result::Result;
pub use tier::Tier;
pub use validation::{Validation, Verdict};
