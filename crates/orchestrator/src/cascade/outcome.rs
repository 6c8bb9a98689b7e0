//! The single terminal result of a cascade.

use cascade_core::{CascadeId, Tier, Validation, WorkItemKey};
use serde::{Deserialize, Serialize};

use crate::cleanup::CleanupReport;
use crate::tier::FailureKind;

/// A cascade that ran all four tiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CascadeCompletion {
    pub cascade_id: CascadeId,
    pub cascade_key: String,
    /// Tier 3 output
    pub result: serde_json::Value,
    /// Keys of every work item written, primary first
    pub work_items: Vec<WorkItemKey>,
    /// Gate results of tiers 0 and 3
    pub validations: Vec<Validation>,
    /// Whether any gate raised a concern
    pub concern: bool,
    /// Worktrees and workspaces freed once the work items were written
    #[serde(default)]
    pub release: CleanupReport,
}

/// A cascade that stopped at some tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CascadeFailure {
    pub cascade_id: CascadeId,
    pub cascade_key: String,
    /// Tier that failed
    pub tier: Tier,
    pub kind: FailureKind,
    /// Human-readable reason
    pub reason: String,
    /// What teardown removed
    #[serde(default)]
    pub cleanup: CleanupReport,
}

/// Terminal outcome: exactly one of completed or failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CascadeOutcome {
    Completed(CascadeCompletion),
    Failed(CascadeFailure),
}

impl CascadeOutcome {
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    #[must_use]
    pub const fn completion(&self) -> Option<&CascadeCompletion> {
        match self {
            Self::Completed(completion) => Some(completion),
            Self::Failed(_) => None,
        }
    }

    #[must_use]
    pub const fn failure(&self) -> Option<&CascadeFailure> {
        match self {
            Self::Completed(_) => None,
            Self::Failed(failure) => Some(failure),
        }
    }

    /// Whether the dispatch layer may run the cascade again.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Completed(_) => false,
            Self::Failed(failure) => failure.kind.is_retryable(),
        }
    }

    #[must_use]
    pub fn cascade_id(&self) -> &CascadeId {
        match self {
            Self::Completed(completion) => &completion.cascade_id,
            Self::Failed(failure) => &failure.cascade_id,
        }
    }
}

impl std::fmt::Display for CascadeOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed(completion) => write!(
                f,
                "completed {} ({} work items)",
                completion.cascade_key,
                completion.work_items.len()
            ),
            Self::Failed(failure) => write!(
                f,
                "failed {} at {} ({}): {}",
                failure.cascade_key, failure.tier, failure.kind, failure.reason
            ),
        }
    }
}
