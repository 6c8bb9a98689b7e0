//! Core error types for cascade domain values.
//!
//! All errors are explicit, typed, and recoverable - no panics allowed.

use thiserror::Error;

/// Core error type for cascade domain operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    // Cascade key errors
    #[error("invalid cascade key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("invalid {field} '{value}': {reason}")]
    InvalidComponent {
        field: &'static str,
        value: String,
        reason: String,
    },

    // Identity errors
    #[error("tier {0} is out of range (expected 0-3)")]
    InvalidTier(u8),

    #[error("malformed worker id '{id}': expected '<cascade_id>-tier<n>'")]
    InvalidWorkerId { id: String },

    #[error("malformed cascade id '{id}': {reason}")]
    InvalidCascadeId { id: String, reason: String },

    // Parsing errors
    #[error("JSON parse error: {reason}")]
    JsonParseFailed { reason: String },
}

impl Error {
    /// Create an invalid key error.
    pub fn invalid_key(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid key component error.
    pub fn invalid_component(
        field: &'static str,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidComponent {
            field,
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Create a malformed worker id error.
    pub fn invalid_worker_id(id: impl Into<String>) -> Self {
        Self::InvalidWorkerId { id: id.into() }
    }

    /// Create a malformed cascade id error.
    pub fn invalid_cascade_id(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidCascadeId {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Create a JSON parse error.
    pub fn json_parse_failed(reason: impl Into<String>) -> Self {
        Self::JsonParseFailed {
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::json_parse_failed(err.to_string())
    }
}
