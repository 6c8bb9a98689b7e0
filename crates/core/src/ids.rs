//! Cascade and worker identities.
//!
//! A worker id is always `{cascade_id}-tier{n}`, so the whole cascade can be
//! rediscovered from any one of its workers without a lookup.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::Error;
use crate::tier::Tier;

const TIER_MARKER: &str = "-tier";

/// Identifier for one submitted cascade.
///
/// Retries of the same submission reuse the same id, so worker ids stay
/// stable across attempts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CascadeId(String);

impl CascadeId {
    /// Generate a new unique cascade id.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("cascade-{}", Ulid::new()))
    }

    /// Create a cascade id from an existing string.
    ///
    /// # Errors
    ///
    /// Returns an error if the id is empty, contains whitespace, or would be
    /// ambiguous with a worker id.
    pub fn new(id: impl Into<String>) -> Result<Self, Error> {
        let id = id.into();
        if id.is_empty() {
            return Err(Error::invalid_cascade_id(id, "must not be empty"));
        }
        if id.chars().any(char::is_whitespace) {
            return Err(Error::invalid_cascade_id(id, "must not contain whitespace"));
        }
        if split_worker_id(&id).is_some() {
            return Err(Error::invalid_cascade_id(
                id,
                "must not end with a tier suffix",
            ));
        }
        Ok(Self(id))
    }

    /// Get the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The worker id for the given tier of this cascade.
    #[must_use]
    pub fn worker(&self, tier: Tier) -> WorkerId {
        WorkerId {
            cascade_id: self.clone(),
            tier,
        }
    }

    /// Worker ids for every tier of this cascade, root first.
    #[must_use]
    pub fn all_workers(&self) -> Vec<WorkerId> {
        Tier::ALL.iter().map(|tier| self.worker(*tier)).collect()
    }
}

impl TryFrom<String> for CascadeId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<CascadeId> for String {
    fn from(id: CascadeId) -> Self {
        id.0
    }
}

impl std::fmt::Display for CascadeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier for the worker executing one tier of one cascade.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WorkerId {
    cascade_id: CascadeId,
    tier: Tier,
}

impl WorkerId {
    /// The cascade this worker belongs to.
    #[must_use]
    pub const fn cascade_id(&self) -> &CascadeId {
        &self.cascade_id
    }

    /// The tier this worker executes.
    #[must_use]
    pub const fn tier(&self) -> Tier {
        self.tier
    }

    /// The parent worker (previous tier), or `None` for tier 0.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        self.tier.previous().map(|tier| self.cascade_id.worker(tier))
    }

    /// The root (tier 0) worker of this worker's cascade.
    #[must_use]
    pub fn root(&self) -> Self {
        self.cascade_id.worker(Tier::Intake)
    }
}

/// Split `{cascade}-tier{n}` into its parts without validating the cascade part.
fn split_worker_id(id: &str) -> Option<(&str, Tier)> {
    let (cascade, tier) = id.rsplit_once(TIER_MARKER)?;
    if cascade.is_empty() || tier.len() != 1 {
        return None;
    }
    let index = tier.parse::<u8>().ok()?;
    Tier::from_index(index).ok().map(|tier| (cascade, tier))
}

impl FromStr for WorkerId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (cascade, tier) = split_worker_id(s).ok_or_else(|| Error::invalid_worker_id(s))?;
        let cascade_id = CascadeId::new(cascade).map_err(|_| Error::invalid_worker_id(s))?;
        Ok(Self { cascade_id, tier })
    }
}

impl TryFrom<String> for WorkerId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<WorkerId> for String {
    fn from(id: WorkerId) -> Self {
        id.to_string()
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}{}", self.cascade_id, TIER_MARKER, self.tier.index())
    }
}
