//! The shared key/value and set store abstraction.
//!
//! Every record the orchestrator keeps (workers, work items, dispatch jobs)
//! goes through this trait, so the backing store can be swapped for an
//! in-memory fake in tests.

use std::time::Duration;

use async_trait::async_trait;

use super::error::PersistenceResult;

/// A network-accessible key/value and set store with per-key expiration.
///
/// Implementations must be safe for concurrent use by many cascades.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Write a value, replacing any previous value and expiration.
    ///
    /// A `ttl` of `None` means the value never expires.
    async fn put(
        &self,
        key: &str,
        value: &serde_json::Value,
        ttl: Option<Duration>,
    ) -> PersistenceResult<()>;

    /// Read a value. Expired values are reported as absent.
    async fn get(&self, key: &str) -> PersistenceResult<Option<serde_json::Value>>;

    /// Remove a value. Returns whether anything was removed.
    async fn delete(&self, key: &str) -> PersistenceResult<bool>;

    /// Write a non-expiring value and add its key to `index` atomically.
    ///
    /// Either both the value and the index membership become visible, or
    /// neither does.
    async fn put_indexed(
        &self,
        key: &str,
        value: &serde_json::Value,
        index: &str,
    ) -> PersistenceResult<()>;

    /// Add a key to a set-valued index. Adding an existing member is a no-op.
    async fn add_to_index(&self, index: &str, key: &str) -> PersistenceResult<()>;

    /// Remove a key from an index. Returns whether it was a member.
    async fn remove_from_index(&self, index: &str, key: &str) -> PersistenceResult<bool>;

    /// All members of an index, sorted.
    async fn list_index(&self, index: &str) -> PersistenceResult<Vec<String>>;

    /// Eagerly drop expired values. Returns how many were removed.
    async fn purge_expired(&self) -> PersistenceResult<usize>;

    /// Verify the store is reachable.
    async fn health_check(&self) -> PersistenceResult<()>;
}
