//! Tier processors.
//!
//! Each of the four tiers is a [`TierProcessor`]: it takes the previous
//! tier's output (the original request for tier 0) and returns its own
//! output or a typed failure. Tiers 1 and 2 forward to external
//! collaborators; tiers 0 and 3 also run a [`ValidationGate`].

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod collaborator;
pub mod gate;
pub mod processors;

use std::sync::Arc;

use async_trait::async_trait;
use cascade_core::{Tier, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use collaborator::{Collaborator, CollaboratorError, CollaboratorProcessor};
pub use gate::{FixedRiskScorer, GateError, ReportedRiskScorer, RiskScorer, ValidationGate};
pub use processors::{ExecutionProcessor, IntakeProcessor};

/// Failure taxonomy for a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Output scored at or above the fail threshold. Never retried.
    Validation,
    /// A collaborator errored or returned malformed output. Retried by dispatch.
    Processor,
    /// No answer before the worker's deadline. Never retried.
    Timeout,
}

impl FailureKind {
    /// Whether the dispatch layer may retry a cascade that failed this way.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Processor)
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::Processor => write!(f, "processor"),
            Self::Timeout => write!(f, "timeout"),
        }
    }
}

/// Input handed to a tier processor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierRequest {
    /// Previous tier's output, or the original request for tier 0
    pub tier_input: serde_json::Value,
    /// Key correlating the cascade's workers and work items
    pub cascade_key: String,
}

impl TierRequest {
    /// Create a tier request.
    pub fn new(tier_input: serde_json::Value, cascade_key: impl Into<String>) -> Self {
        Self {
            tier_input,
            cascade_key: cascade_key.into(),
        }
    }
}

/// Successful tier output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierOutput {
    /// Payload handed to the next tier
    pub output: serde_json::Value,
    /// Gate result, for gated tiers
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub validation: Option<Validation>,
}

impl TierOutput {
    /// Output without a gate result.
    #[must_use]
    pub const fn new(output: serde_json::Value) -> Self {
        Self {
            output,
            validation: None,
        }
    }

    /// Output with a passing or concern-flagged gate result.
    #[must_use]
    pub const fn validated(output: serde_json::Value, validation: Validation) -> Self {
        Self {
            output,
            validation: Some(validation),
        }
    }
}

/// Typed tier failure.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProcessorError {
    /// Output scored at or above the fail threshold
    #[error("{} rejected by validation gate (score {})", .validation.tier, .validation.score)]
    Rejected { validation: Validation },

    /// Collaborator failure or malformed output
    #[error("{tier} failed: {reason}")]
    Failed { tier: Tier, reason: String },
}

impl ProcessorError {
    /// Create a processor failure.
    pub fn failed(tier: Tier, reason: impl Into<String>) -> Self {
        Self::Failed {
            tier,
            reason: reason.into(),
        }
    }

    /// Create a validation rejection.
    #[must_use]
    pub const fn rejected(validation: Validation) -> Self {
        Self::Rejected { validation }
    }

    /// The failure kind.
    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::Rejected { .. } => FailureKind::Validation,
            Self::Failed { .. } => FailureKind::Processor,
        }
    }

    /// The gate result of a rejection.
    #[must_use]
    pub const fn validation(&self) -> Option<&Validation> {
        match self {
            Self::Rejected { validation } => Some(validation),
            Self::Failed { .. } => None,
        }
    }
}

/// One tier's unit of work.
#[async_trait]
pub trait TierProcessor: Send + Sync {
    /// The tier this processor serves.
    fn tier(&self) -> Tier;

    /// Turn the tier input into output.
    ///
    /// # Errors
    ///
    /// `ProcessorError::Rejected` for a validation failure,
    /// `ProcessorError::Failed` for anything else.
    async fn process(&self, request: TierRequest) -> Result<TierOutput, ProcessorError>;
}

/// Error building a [`TierProcessors`] set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("processor for {found} registered as {expected}")]
pub struct TierMismatch {
    pub expected: Tier,
    pub found: Tier,
}

/// The four processors of a cascade, one per tier.
#[derive(Clone)]
pub struct TierProcessors {
    processors: [Arc<dyn TierProcessor>; 4],
}

impl std::fmt::Debug for TierProcessors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TierProcessors").finish_non_exhaustive()
    }
}

impl TierProcessors {
    /// Assemble the set, checking each processor serves its slot's tier.
    ///
    /// # Errors
    ///
    /// Returns `TierMismatch` if a processor reports a different tier.
    pub fn new(
        intake: Arc<dyn TierProcessor>,
        specification: Arc<dyn TierProcessor>,
        synthesis: Arc<dyn TierProcessor>,
        execution: Arc<dyn TierProcessor>,
    ) -> Result<Self, TierMismatch> {
        let processors = [intake, specification, synthesis, execution];
        for (expected, processor) in Tier::ALL.iter().zip(processors.iter()) {
            if processor.tier() != *expected {
                return Err(TierMismatch {
                    expected: *expected,
                    found: processor.tier(),
                });
            }
        }
        Ok(Self { processors })
    }

    /// The processor for `tier`.
    #[must_use]
    pub fn get(&self, tier: Tier) -> &Arc<dyn TierProcessor> {
        let [intake, specification, synthesis, execution] = &self.processors;
        match tier {
            Tier::Intake => intake,
            Tier::Specification => specification,
            Tier::Synthesis => synthesis,
            Tier::Execution => execution,
        }
    }
}
