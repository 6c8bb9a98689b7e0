//! In-process state store.
//!
//! Used for tests and single-process runs. Expiration is lazy: expired
//! entries are dropped when read or purged.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;

use super::error::PersistenceResult;
use super::store::StateStore;

#[derive(Debug, Clone)]
struct Entry {
    value: serde_json::Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    entries: HashMap<String, Entry>,
    indexes: HashMap<String, BTreeSet<String>>,
}

/// A `StateStore` held entirely in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryStateStore {
    inner: Arc<RwLock<MemoryInner>>,
}

impl MemoryStateStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) entries.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let inner = self.inner.read().await;
        inner.entries.values().filter(|e| !e.is_expired(now)).count()
    }

    /// Whether the store has no live entries.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Live keys starting with `prefix`, sorted.
    pub async fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let now = Instant::now();
        let inner = self.inner.read().await;
        let mut keys: Vec<String> = inner
            .entries
            .iter()
            .filter(|(key, entry)| key.starts_with(prefix) && !entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn put(
        &self,
        key: &str,
        value: &serde_json::Value,
        ttl: Option<Duration>,
    ) -> PersistenceResult<()> {
        let expires_at = ttl.and_then(|ttl| Instant::now().checked_add(ttl));
        let mut inner = self.inner.write().await;
        inner.entries.insert(
            key.to_string(),
            Entry {
                value: value.clone(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> PersistenceResult<Option<serde_json::Value>> {
        let now = Instant::now();
        let mut inner = self.inner.write().await;
        let Some(entry) = inner.entries.get(key) else {
            return Ok(None);
        };
        if !entry.is_expired(now) {
            return Ok(Some(entry.value.clone()));
        }
        inner.entries.remove(key);
        Ok(None)
    }

    async fn delete(&self, key: &str) -> PersistenceResult<bool> {
        let now = Instant::now();
        let mut inner = self.inner.write().await;
        Ok(inner
            .entries
            .remove(key)
            .is_some_and(|entry| !entry.is_expired(now)))
    }

    async fn put_indexed(
        &self,
        key: &str,
        value: &serde_json::Value,
        index: &str,
    ) -> PersistenceResult<()> {
        // One write guard covers both mutations.
        let mut inner = self.inner.write().await;
        inner.entries.insert(
            key.to_string(),
            Entry {
                value: value.clone(),
                expires_at: None,
            },
        );
        inner
            .indexes
            .entry(index.to_string())
            .or_default()
            .insert(key.to_string());
        Ok(())
    }

    async fn add_to_index(&self, index: &str, key: &str) -> PersistenceResult<()> {
        let mut inner = self.inner.write().await;
        inner
            .indexes
            .entry(index.to_string())
            .or_default()
            .insert(key.to_string());
        Ok(())
    }

    async fn remove_from_index(&self, index: &str, key: &str) -> PersistenceResult<bool> {
        let mut inner = self.inner.write().await;
        Ok(inner
            .indexes
            .get_mut(index)
            .is_some_and(|members| members.remove(key)))
    }

    async fn list_index(&self, index: &str) -> PersistenceResult<Vec<String>> {
        let inner = self.inner.read().await;
        Ok(inner
            .indexes
            .get(index)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn purge_expired(&self) -> PersistenceResult<usize> {
        let now = Instant::now();
        let mut inner = self.inner.write().await;
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| !entry.is_expired(now));
        Ok(before.saturating_sub(inner.entries.len()))
    }

    async fn health_check(&self) -> PersistenceResult<()> {
        Ok(())
    }
}
