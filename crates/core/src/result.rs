//! Result type definition for cascade domain operations.

use crate::error::Error;

/// The standard Result type for cascade domain operations.
///
/// Use the `?` operator, `match`, or combinator methods to handle results.
///
/// # Examples
///
/// ```
/// use cascade_core::{Result, WorkItemKey};
///
/// fn epic_key() -> Result<String> {
///     let key = WorkItemKey::epic("acme", "feature-x", "EP001", "demo")?;
///     Ok(key.to_string())
/// }
///
/// assert_eq!(
///     epic_key().ok().as_deref(),
///     Some("repo-acme_branch-feature-x_epics-EP001-demo")
/// );
/// ```
pub type Result<T> = std::result::Result<T, Error>;
