//! Validation gate outcomes.

use serde::{Deserialize, Serialize};

use crate::tier::Tier;

/// Verdict of a validation gate for a scored tier output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Below the concern threshold.
    Pass,
    /// At or above the concern threshold: allowed to proceed, but flagged.
    Concern,
    /// At or above the fail threshold: the tier fails.
    Fail,
}

impl Verdict {
    /// Whether the cascade may continue past this gate.
    #[must_use]
    pub const fn proceeds(self) -> bool {
        !matches!(self, Self::Fail)
    }

    /// Whether the result must be flagged on the persisted record.
    #[must_use]
    pub const fn is_flagged(self) -> bool {
        matches!(self, Self::Concern)
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pass => write!(f, "pass"),
            Self::Concern => write!(f, "concern"),
            Self::Fail => write!(f, "fail"),
        }
    }
}

/// A scored gate result attached to a tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Validation {
    /// The gated tier.
    pub tier: Tier,
    /// Risk score on a 0-10 scale.
    pub score: f64,
    /// The verdict derived from the score.
    pub verdict: Verdict,
}

impl Validation {
    /// Whether this result carries a concern flag.
    #[must_use]
    pub const fn concern(&self) -> bool {
        self.verdict.is_flagged()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_flags() {
        assert!(Verdict::Pass.proceeds());
        assert!(Verdict::Concern.proceeds());
        assert!(!Verdict::Fail.proceeds());
        assert!(Verdict::Concern.is_flagged());
        assert!(!Verdict::Pass.is_flagged());
    }

    #[test]
    fn test_validation_serializes_snake_case() {
        let validation = Validation {
            tier: Tier::Intake,
            score: 6.5,
            verdict: Verdict::Concern,
        };
        let json = serde_json::to_value(&validation).ok();
        assert_eq!(
            json,
            Some(serde_json::json!({"tier": 0, "score": 6.5, "verdict": "concern"}))
        );
    }
}
