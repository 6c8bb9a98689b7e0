//! Adapter from an external collaborator to a tier processor.
//!
//! Tiers 1 and 2 are nothing but this adapter. The orchestrator never sees
//! a collaborator's own types: requests and responses are JSON.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cascade_core::Tier;
use thiserror::Error;
use tracing::debug;

use super::{ProcessorError, TierOutput, TierProcessor, TierRequest};

/// Failure reported by a collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollaboratorError {
    /// The collaborator answered with an error
    #[error("{collaborator} failed: {reason}")]
    Failed { collaborator: String, reason: String },

    /// The answer did not match the `{output: object}` contract
    #[error("{collaborator} returned malformed output: {reason}")]
    Malformed { collaborator: String, reason: String },

    /// The collaborator could not be reached
    #[error("{collaborator} unreachable: {reason}")]
    Unreachable { collaborator: String, reason: String },
}

impl CollaboratorError {
    /// Create a failed error.
    pub fn failed(collaborator: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Failed {
            collaborator: collaborator.into(),
            reason: reason.into(),
        }
    }

    /// Create a malformed output error.
    pub fn malformed(collaborator: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Malformed {
            collaborator: collaborator.into(),
            reason: reason.into(),
        }
    }

    /// Create an unreachable error.
    pub fn unreachable(collaborator: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unreachable {
            collaborator: collaborator.into(),
            reason: reason.into(),
        }
    }
}

/// An opaque asynchronous request/response step with a declared timeout.
#[async_trait]
pub trait Collaborator: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// How long a call may take before it counts as failed.
    fn timeout(&self) -> Duration;

    /// Send `request` and return the `output` object of the response.
    async fn call(&self, request: &TierRequest) -> Result<serde_json::Value, CollaboratorError>;
}

/// Call a collaborator, enforcing its declared timeout and the output shape.
///
/// # Errors
///
/// Every collaborator problem, including its declared timeout, is a
/// `ProcessorError::Failed` for `tier`.
pub async fn invoke(
    collaborator: &dyn Collaborator,
    tier: Tier,
    request: &TierRequest,
) -> Result<serde_json::Value, ProcessorError> {
    let declared = collaborator.timeout();
    debug!(collaborator = collaborator.name(), %tier, "calling collaborator");

    let output = tokio::time::timeout(declared, collaborator.call(request))
        .await
        .map_err(|_| {
            ProcessorError::failed(
                tier,
                format!(
                    "{} did not answer within its declared {}ms",
                    collaborator.name(),
                    declared.as_millis()
                ),
            )
        })?
        .map_err(|e| ProcessorError::failed(tier, e.to_string()))?;

    if !output.is_object() {
        return Err(ProcessorError::failed(
            tier,
            format!("{} returned a non-object output", collaborator.name()),
        ));
    }
    Ok(output)
}

/// Tier processor that forwards to a collaborator and returns its output.
#[derive(Clone)]
pub struct CollaboratorProcessor {
    tier: Tier,
    collaborator: Arc<dyn Collaborator>,
}

impl std::fmt::Debug for CollaboratorProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollaboratorProcessor")
            .field("tier", &self.tier)
            .field("collaborator", &self.collaborator.name())
            .finish()
    }
}

impl CollaboratorProcessor {
    /// Create an adapter for `tier`.
    #[must_use]
    pub fn new(tier: Tier, collaborator: Arc<dyn Collaborator>) -> Self {
        Self { tier, collaborator }
    }
}

#[async_trait]
impl TierProcessor for CollaboratorProcessor {
    fn tier(&self) -> Tier {
        self.tier
    }

    async fn process(&self, request: TierRequest) -> Result<TierOutput, ProcessorError> {
        let output = invoke(self.collaborator.as_ref(), self.tier, &request).await?;
        Ok(TierOutput::new(output))
    }
}
