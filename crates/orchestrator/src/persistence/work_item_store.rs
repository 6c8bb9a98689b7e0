//! Work item persistence.
//!
//! Work items are keyed by their cascade key string, never expire, and are
//! always written together with their membership in the `repo-keys` index.

use std::collections::BTreeMap;
use std::sync::Arc;

use cascade_core::{CascadeId, REPO_KEYS_INDEX, Validation, WorkItemKey, WorkItemKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::error::{PersistenceError, PersistenceResult};
use super::store::StateStore;

/// A durable artifact produced by a cascade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItemRecord {
    /// Composite key
    pub key: WorkItemKey,
    /// Epic, story, or assessment
    pub kind: WorkItemKind,
    /// Repository name
    pub repo: String,
    /// Branch name
    pub branch: String,
    /// Human-readable title (the item name)
    pub title: String,
    /// Cascade that last wrote this item
    pub cascade_id: CascadeId,
    /// Primary result payload
    pub payload: serde_json::Value,
    /// Output of each tier, keyed `tier0`..`tier3`
    #[serde(default)]
    pub artifacts: BTreeMap<String, serde_json::Value>,
    /// Gate results for the tiers that ran one
    #[serde(default)]
    pub validations: Vec<Validation>,
    /// First write
    pub created_at: DateTime<Utc>,
    /// Latest write
    pub updated_at: DateTime<Utc>,
}

impl WorkItemRecord {
    /// Create a work item record for `key`.
    #[must_use]
    pub fn new(key: WorkItemKey, cascade_id: CascadeId, payload: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            kind: key.kind(),
            repo: key.repo().to_string(),
            branch: key.branch().to_string(),
            title: key.target().item_name().to_string(),
            key,
            cascade_id,
            payload,
            artifacts: BTreeMap::new(),
            validations: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Attach per-tier artifacts.
    #[must_use]
    pub fn with_artifacts(mut self, artifacts: BTreeMap<String, serde_json::Value>) -> Self {
        self.artifacts = artifacts;
        self
    }

    /// Attach gate results.
    #[must_use]
    pub fn with_validations(mut self, validations: Vec<Validation>) -> Self {
        self.validations = validations;
        self
    }

    /// Whether any gate raised a concern.
    #[must_use]
    pub fn has_concern(&self) -> bool {
        self.validations.iter().any(Validation::concern)
    }
}

/// Typed access to work item records.
#[derive(Clone)]
pub struct WorkItemStore {
    store: Arc<dyn StateStore>,
}

impl std::fmt::Debug for WorkItemStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkItemStore").finish_non_exhaustive()
    }
}

impl WorkItemStore {
    /// Create a work item store.
    #[must_use]
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// Write a work item and index its key in one transaction.
    ///
    /// An existing record under the same key is replaced, keeping its
    /// original `created_at`. Returns the record as written.
    ///
    /// # Errors
    ///
    /// Returns an error if the existing record cannot be read or the write fails.
    pub async fn upsert(&self, mut record: WorkItemRecord) -> PersistenceResult<WorkItemRecord> {
        if let Some(existing) = self.get(&record.key).await? {
            record.created_at = existing.created_at;
        }
        record.updated_at = Utc::now();

        let key = record.key.to_string();
        let value = serde_json::to_value(&record)?;
        self.store.put_indexed(&key, &value, REPO_KEYS_INDEX).await?;

        debug!(key = %key, kind = %record.kind, "stored work item");
        Ok(record)
    }

    /// Get a work item.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails or the stored value is malformed.
    pub async fn get(&self, key: &WorkItemKey) -> PersistenceResult<Option<WorkItemRecord>> {
        self.get_raw(&key.to_string()).await
    }

    /// Get a work item by its key string.
    ///
    /// # Errors
    ///
    /// Returns an error if the key does not parse, the read fails, or the
    /// stored value is malformed.
    pub async fn get_by_str(&self, key: &str) -> PersistenceResult<Option<WorkItemRecord>> {
        let parsed: WorkItemKey = key
            .parse()
            .map_err(|e: cascade_core::Error| PersistenceError::invalid_key(key, e.to_string()))?;
        self.get(&parsed).await
    }

    async fn get_raw(&self, key: &str) -> PersistenceResult<Option<WorkItemRecord>> {
        self.store
            .get(key)
            .await?
            .map(serde_json::from_value)
            .transpose()
            .map_err(PersistenceError::from)
    }

    /// Every indexed work item key, sorted. Malformed members are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be read.
    pub async fn list_keys(&self) -> PersistenceResult<Vec<WorkItemKey>> {
        let members = self.store.list_index(REPO_KEYS_INDEX).await?;
        Ok(members
            .into_iter()
            .filter_map(|member| match member.parse::<WorkItemKey>() {
                Ok(key) => Some(key),
                Err(e) => {
                    warn!(key = %member, error = %e, "skipping malformed indexed key");
                    None
                }
            })
            .collect())
    }
}
