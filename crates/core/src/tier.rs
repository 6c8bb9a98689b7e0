//! The four ordered processing tiers of a cascade.

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// One of the four ordered processing stages of a cascade.
///
/// Serialized as its integer index (0-3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Tier {
    /// Tier 0: validates the incoming task description.
    Intake,
    /// Tier 1: turns the validated task into a structured specification.
    Specification,
    /// Tier 2: converts the specification into an executable program.
    Synthesis,
    /// Tier 3: executes the program and validates the result.
    Execution,
}

impl Tier {
    /// All tiers in execution order.
    pub const ALL: [Self; 4] = [
        Self::Intake,
        Self::Specification,
        Self::Synthesis,
        Self::Execution,
    ];

    /// The integer index of this tier.
    #[must_use]
    pub const fn index(self) -> u8 {
        match self {
            Self::Intake => 0,
            Self::Specification => 1,
            Self::Synthesis => 2,
            Self::Execution => 3,
        }
    }

    /// Look up a tier by its integer index.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidTier` if `index > 3`.
    pub const fn from_index(index: u8) -> Result<Self, Error> {
        match index {
            0 => Ok(Self::Intake),
            1 => Ok(Self::Specification),
            2 => Ok(Self::Synthesis),
            3 => Ok(Self::Execution),
            other => Err(Error::InvalidTier(other)),
        }
    }

    /// The tier that runs after this one, if any.
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Intake => Some(Self::Specification),
            Self::Specification => Some(Self::Synthesis),
            Self::Synthesis => Some(Self::Execution),
            Self::Execution => None,
        }
    }

    /// The tier whose worker is this tier's parent, if any.
    #[must_use]
    pub const fn previous(self) -> Option<Self> {
        match self {
            Self::Intake => None,
            Self::Specification => Some(Self::Intake),
            Self::Synthesis => Some(Self::Specification),
            Self::Execution => Some(Self::Synthesis),
        }
    }

    /// Whether this tier runs the scored validation gate (tiers 0 and 3).
    #[must_use]
    pub const fn is_gated(self) -> bool {
        matches!(self, Self::Intake | Self::Execution)
    }

    /// Whether this is the final tier.
    #[must_use]
    pub const fn is_last(self) -> bool {
        matches!(self, Self::Execution)
    }

    /// Short human-readable name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Intake => "intake",
            Self::Specification => "specification",
            Self::Synthesis => "synthesis",
            Self::Execution => "execution",
        }
    }
}

impl TryFrom<u8> for Tier {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::from_index(value)
    }
}

impl From<Tier> for u8 {
    fn from(tier: Tier) -> Self {
        tier.index()
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tier{}", self.index())
    }
}
