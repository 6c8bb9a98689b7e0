//! State store for the orchestrator.
//!
//! Every worker record, work item, and dispatch job goes through the
//! [`StateStore`] trait, a key/value and set store with per-key expiration.
//!
//! # Architecture
//!
//! - `StateStore`: the storage abstraction
//! - `MemoryStateStore`: in-process implementation for tests and single runs
//! - `SurrealStateStore`: SurrealDB-backed implementation
//! - `WorkerStore`: `WorkerRecord`s, TTL refreshed on every write
//! - `WorkItemStore`: `WorkItemRecord`s, never expired, always indexed in `repo-keys`
//!
//! # Example
//!
//! ```ignore
//! use cascade_orchestrator::persistence::{StoreConfig, SurrealStateStore, WorkItemStore};
//!
//! let store = SurrealStateStore::connect(StoreConfig::in_memory()).await?;
//! store.initialize_schema().await?;
//!
//! let items = WorkItemStore::new(Arc::new(store));
//! let keys = items.list_keys().await?;
//! ```

pub mod client;
pub mod error;
pub mod memory;
pub mod store;
pub mod work_item_store;
pub mod worker_store;

// Re-export main types
pub use client::{Credentials, StoreConfig, SurrealStateStore};
pub use error::{PersistenceError, PersistenceResult};
pub use memory::MemoryStateStore;
pub use store::StateStore;
pub use work_item_store::{WorkItemRecord, WorkItemStore};
pub use worker_store::{WORKER_PREFIX, WorkerRecord, WorkerStatus, WorkerStore, worker_key};
