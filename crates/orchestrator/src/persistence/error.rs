//! State store error types.
//!
//! All errors are explicit, typed, and recoverable - no panics allowed.

use std::fmt;

use thiserror::Error;

/// Errors that can occur while talking to the state store.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Failed to connect to the store
    #[error("connection failed: {reason}")]
    ConnectionFailed { reason: String },

    /// Query execution failed
    #[error("query failed: {reason}")]
    QueryFailed { reason: String },

    /// Record not found
    #[error("record not found: {entity_type} with id '{id}'")]
    NotFound { entity_type: String, id: String },

    /// A stored value could not be encoded or decoded
    #[error("serialization error: {reason}")]
    SerializationError { reason: String },

    /// Multi-statement write was rolled back
    #[error("transaction failed: {reason}")]
    TransactionFailed { reason: String },

    /// Record cannot move from its current status to the requested one
    #[error("invalid transition for {id}: {from} -> {to}")]
    InvalidTransition { id: String, from: String, to: String },

    /// Timeout waiting for the store
    #[error("operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// A key read back from the store no longer parses
    #[error("invalid key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    /// Schema initialization failed
    #[error("schema error: {reason}")]
    SchemaError { reason: String },
}

impl PersistenceError {
    /// Create a connection failed error.
    pub fn connection_failed(reason: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            reason: reason.into(),
        }
    }

    /// Create a query failed error.
    pub fn query_failed(reason: impl Into<String>) -> Self {
        Self::QueryFailed {
            reason: reason.into(),
        }
    }

    /// Create a not found error.
    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    /// Create a serialization error.
    pub fn serialization_error(reason: impl Into<String>) -> Self {
        Self::SerializationError {
            reason: reason.into(),
        }
    }

    /// Create a transaction failed error.
    pub fn transaction_failed(reason: impl Into<String>) -> Self {
        Self::TransactionFailed {
            reason: reason.into(),
        }
    }

    /// Create a timeout error.
    #[must_use]
    pub const fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    /// Create an invalid transition error.
    pub fn invalid_transition(
        id: impl Into<String>,
        from: impl fmt::Display,
        to: impl fmt::Display,
    ) -> Self {
        Self::InvalidTransition {
            id: id.into(),
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Create an invalid key error.
    pub fn invalid_key(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Create a schema error.
    pub fn schema_error(reason: impl Into<String>) -> Self {
        Self::SchemaError {
            reason: reason.into(),
        }
    }

    /// Check if error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed { .. } | Self::Timeout { .. } | Self::TransactionFailed { .. }
        )
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization_error(err.to_string())
    }
}

/// Result type for state store operations.
pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// Helper to convert SurrealDB errors to `PersistenceError`.
pub fn from_surrealdb_error(err: impl fmt::Display) -> PersistenceError {
    let msg = err.to_string();

    if msg.contains("timeout") || msg.contains("Timeout") {
        PersistenceError::timeout(0)
    } else if msg.contains("connection") || msg.contains("Connection") || msg.contains("connect") {
        PersistenceError::connection_failed(msg)
    } else if msg.contains("transaction") || msg.contains("Transaction") {
        PersistenceError::transaction_failed(msg)
    } else if msg.contains("not found") || msg.contains("does not exist") {
        PersistenceError::not_found("unknown", msg)
    } else {
        PersistenceError::query_failed(msg)
    }
}
