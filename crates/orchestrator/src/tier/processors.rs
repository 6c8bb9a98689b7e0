//! Gated tier processors.

use std::sync::Arc;

use async_trait::async_trait;
use cascade_core::Tier;
use tracing::{info, warn};

use super::collaborator::{Collaborator, invoke};
use super::gate::{RiskScorer, ValidationGate};
use super::{ProcessorError, TierOutput, TierProcessor, TierRequest};

/// Score `output` and turn the verdict into a tier result.
fn gate_output(
    tier: Tier,
    gate: &ValidationGate,
    scorer: &dyn RiskScorer,
    cascade_key: &str,
    output: serde_json::Value,
) -> Result<TierOutput, ProcessorError> {
    let score = scorer
        .score(tier, &output)
        .map_err(|reason| ProcessorError::failed(tier, reason))?;
    let validation = gate
        .evaluate(tier, score)
        .map_err(|e| ProcessorError::failed(tier, e.to_string()))?;

    if !validation.verdict.proceeds() {
        info!(%tier, cascade_key, score, "validation gate rejected output");
        return Err(ProcessorError::rejected(validation));
    }
    if validation.concern() {
        warn!(%tier, cascade_key, score, "validation gate raised a concern");
    }
    Ok(TierOutput::validated(output, validation))
}

/// Tier 0: checks the incoming request and scores its risk.
///
/// The request itself becomes the tier's output.
#[derive(Clone)]
pub struct IntakeProcessor {
    gate: ValidationGate,
    scorer: Arc<dyn RiskScorer>,
}

impl std::fmt::Debug for IntakeProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntakeProcessor")
            .field("gate", &self.gate)
            .finish_non_exhaustive()
    }
}

impl IntakeProcessor {
    #[must_use]
    pub fn new(gate: ValidationGate, scorer: Arc<dyn RiskScorer>) -> Self {
        Self { gate, scorer }
    }
}

#[async_trait]
impl TierProcessor for IntakeProcessor {
    fn tier(&self) -> Tier {
        Tier::Intake
    }

    async fn process(&self, request: TierRequest) -> Result<TierOutput, ProcessorError> {
        if !request.tier_input.is_object() {
            return Err(ProcessorError::failed(
                Tier::Intake,
                "request payload must be a JSON object",
            ));
        }
        gate_output(
            Tier::Intake,
            &self.gate,
            self.scorer.as_ref(),
            &request.cascade_key,
            request.tier_input,
        )
    }
}

/// Tier 3: runs the program through the execution collaborator, then gates
/// the result.
#[derive(Clone)]
pub struct ExecutionProcessor {
    collaborator: Arc<dyn Collaborator>,
    gate: ValidationGate,
    scorer: Arc<dyn RiskScorer>,
}

impl std::fmt::Debug for ExecutionProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionProcessor")
            .field("collaborator", &self.collaborator.name())
            .field("gate", &self.gate)
            .finish_non_exhaustive()
    }
}

impl ExecutionProcessor {
    #[must_use]
    pub fn new(
        collaborator: Arc<dyn Collaborator>,
        gate: ValidationGate,
        scorer: Arc<dyn RiskScorer>,
    ) -> Self {
        Self {
            collaborator,
            gate,
            scorer,
        }
    }
}

#[async_trait]
impl TierProcessor for ExecutionProcessor {
    fn tier(&self) -> Tier {
        Tier::Execution
    }

    async fn process(&self, request: TierRequest) -> Result<TierOutput, ProcessorError> {
        let output = invoke(self.collaborator.as_ref(), Tier::Execution, &request).await?;
        gate_output(
            Tier::Execution,
            &self.gate,
            self.scorer.as_ref(),
            &request.cascade_key,
            output,
        )
    }
}
