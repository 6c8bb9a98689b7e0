//! Validation gate for tiers 0 and 3.
//!
//! A risk score on a 0-10 scale is computed for the tier's output and
//! compared against two thresholds: at or above `fail` rejects the tier, at
//! or above `concern` lets it proceed with a flag.

use cascade_core::{Tier, Validation, Verdict};
use thiserror::Error;

/// Upper bound of the risk scale.
pub const MAX_SCORE: f64 = 10.0;

/// Invalid gate configuration or score.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GateError {
    /// Thresholds must satisfy `0 <= concern < fail <= 10`
    #[error("invalid thresholds: concern {concern} must be >= 0 and < fail {fail} <= {MAX_SCORE}")]
    InvalidThresholds { fail: f64, concern: f64 },

    /// Score is not a number in `0..=10`
    #[error("score {score} is outside 0..={MAX_SCORE}")]
    ScoreOutOfRange { score: f64 },
}

/// Two-threshold validation gate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidationGate {
    fail_threshold: f64,
    concern_threshold: f64,
}

impl Default for ValidationGate {
    fn default() -> Self {
        Self {
            fail_threshold: 9.0,
            concern_threshold: 6.0,
        }
    }
}

impl ValidationGate {
    /// Create a gate.
    ///
    /// # Errors
    ///
    /// Returns `InvalidThresholds` unless `0 <= concern < fail <= 10`.
    pub fn new(fail_threshold: f64, concern_threshold: f64) -> Result<Self, GateError> {
        let ordered = concern_threshold >= 0.0
            && concern_threshold < fail_threshold
            && fail_threshold <= MAX_SCORE;
        if !ordered {
            return Err(GateError::InvalidThresholds {
                fail: fail_threshold,
                concern: concern_threshold,
            });
        }
        Ok(Self {
            fail_threshold,
            concern_threshold,
        })
    }

    #[must_use]
    pub const fn fail_threshold(&self) -> f64 {
        self.fail_threshold
    }

    #[must_use]
    pub const fn concern_threshold(&self) -> f64 {
        self.concern_threshold
    }

    /// Classify a score.
    ///
    /// # Errors
    ///
    /// Returns `ScoreOutOfRange` for NaN or scores outside `0..=10`.
    pub fn verdict(&self, score: f64) -> Result<Verdict, GateError> {
        if !(0.0..=MAX_SCORE).contains(&score) {
            return Err(GateError::ScoreOutOfRange { score });
        }
        Ok(if score >= self.fail_threshold {
            Verdict::Fail
        } else if score >= self.concern_threshold {
            Verdict::Concern
        } else {
            Verdict::Pass
        })
    }

    /// Score a tier's output into a [`Validation`].
    ///
    /// # Errors
    ///
    /// Returns `ScoreOutOfRange` for NaN or scores outside `0..=10`.
    pub fn evaluate(&self, tier: Tier, score: f64) -> Result<Validation, GateError> {
        let verdict = self.verdict(score)?;
        Ok(Validation {
            tier,
            score,
            verdict,
        })
    }
}

/// Computes the risk score of a tier output.
pub trait RiskScorer: Send + Sync {
    /// Score `payload` on the 0-10 scale.
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason when no score can be computed.
    fn score(&self, tier: Tier, payload: &serde_json::Value) -> Result<f64, String>;
}

/// Reads a score the producer reported in a numeric field of the payload.
#[derive(Debug, Clone)]
pub struct ReportedRiskScorer {
    field: String,
    missing: Option<f64>,
}

impl Default for ReportedRiskScorer {
    fn default() -> Self {
        Self::new("risk_score")
    }
}

impl ReportedRiskScorer {
    /// Read scores from `field`; payloads without it are rejected.
    #[must_use]
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            missing: None,
        }
    }

    /// Use `score` when the field is absent.
    #[must_use]
    pub const fn or_default(mut self, score: f64) -> Self {
        self.missing = Some(score);
        self
    }
}

impl RiskScorer for ReportedRiskScorer {
    fn score(&self, tier: Tier, payload: &serde_json::Value) -> Result<f64, String> {
        match payload.get(&self.field) {
            Some(value) => value
                .as_f64()
                .ok_or_else(|| format!("{tier} output field '{}' is not a number", self.field)),
            None => self
                .missing
                .ok_or_else(|| format!("{tier} output has no '{}' field", self.field)),
        }
    }
}

/// Always returns the same score.
#[derive(Debug, Clone, Copy)]
pub struct FixedRiskScorer(pub f64);

impl RiskScorer for FixedRiskScorer {
    fn score(&self, _tier: Tier, _payload: &serde_json::Value) -> Result<f64, String> {
        Ok(self.0)
    }
}
