//! SurrealDB-backed state store.
//!
//! Values are stored as JSON text in the `kv` table keyed by record id, with
//! an optional `expires_at_ms` deadline. Index membership lives in
//! `index_member` rows so that a record and its index entry can be written in
//! one transaction.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use surrealdb::Surreal;
use surrealdb::engine::any::Any;
use surrealdb::opt::auth::Root;
use surrealdb::sql::Thing;
use tracing::debug;

use super::error::{PersistenceResult, from_surrealdb_error};
use super::store::StateStore;

const KV_TABLE: &str = "kv";
const MEMBER_TABLE: &str = "index_member";

/// Configuration for the SurrealDB store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Connection URL (e.g., "mem://", "ws://localhost:8000")
    pub url: String,
    /// Namespace to use
    pub namespace: String,
    /// Database to use
    pub database: String,
    /// Optional root credentials
    pub credentials: Option<Credentials>,
}

/// Root credentials for authentication.
#[derive(Debug, Clone)]
pub struct Credentials {
    /// Username
    pub username: String,
    /// Password
    pub password: String,
}

impl StoreConfig {
    /// Create an in-memory configuration for testing.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            url: "mem://".to_string(),
            namespace: "cascade".to_string(),
            database: "test".to_string(),
            credentials: None,
        }
    }

    /// Create a WebSocket configuration.
    #[must_use]
    pub fn websocket(host: &str, port: u16) -> Self {
        Self {
            url: format!("ws://{host}:{port}"),
            namespace: "cascade".to_string(),
            database: "production".to_string(),
            credentials: None,
        }
    }

    /// Set credentials for authentication.
    #[must_use]
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials = Some(Credentials {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    /// Set the namespace.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set the database.
    #[must_use]
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::in_memory()
    }
}

/// Stored form of a value.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct KvRow {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<Thing>,
    value_json: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at_ms: Option<i64>,
}

impl KvRow {
    fn new(value: &serde_json::Value, ttl: Option<Duration>) -> PersistenceResult<Self> {
        Ok(Self {
            id: None,
            value_json: serde_json::to_string(value)?,
            expires_at_ms: ttl.map(expiry_from_now),
        })
    }

    fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at_ms.is_some_and(|at| at <= now_ms)
    }
}

/// Stored form of one index membership.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct MemberRow {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<Thing>,
    index_name: String,
    member: String,
}

impl MemberRow {
    fn new(index: &str, key: &str) -> Self {
        Self {
            id: None,
            index_name: index.to_string(),
            member: key.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct MemberOnly {
    member: String,
}

fn member_id(index: &str, key: &str) -> String {
    format!("{index}::{key}")
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn expiry_from_now(ttl: Duration) -> i64 {
    let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
    now_ms().saturating_add(ttl_ms)
}

/// Connection to a SurrealDB instance implementing [`StateStore`].
///
/// Cloning shares the underlying connection.
#[derive(Debug, Clone)]
pub struct SurrealStateStore {
    db: Arc<Surreal<Any>>,
    config: StoreConfig,
}

impl SurrealStateStore {
    /// Connect to the database with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails or authentication fails.
    pub async fn connect(config: StoreConfig) -> PersistenceResult<Self> {
        let db = Surreal::<Any>::init();

        db.connect(&config.url)
            .await
            .map_err(from_surrealdb_error)?;

        if let Some(creds) = &config.credentials {
            db.signin(Root {
                username: &creds.username,
                password: &creds.password,
            })
            .await
            .map_err(from_surrealdb_error)?;
        }

        db.use_ns(&config.namespace)
            .use_db(&config.database)
            .await
            .map_err(from_surrealdb_error)?;

        Ok(Self {
            db: Arc::new(db),
            config,
        })
    }

    /// Get a reference to the underlying database client.
    #[must_use]
    pub fn db(&self) -> &Surreal<Any> {
        &self.db
    }

    /// Get the store configuration.
    #[must_use]
    pub const fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Initialize the database schema.
    ///
    /// # Errors
    ///
    /// Returns an error if schema initialization fails.
    pub async fn initialize_schema(&self) -> PersistenceResult<()> {
        let schema = include_str!("schema.surql");

        self.db
            .query(schema)
            .await
            .map_err(from_surrealdb_error)?
            .check()
            .map_err(|e| super::error::PersistenceError::schema_error(e.to_string()))?;

        Ok(())
    }
}

#[async_trait]
impl StateStore for SurrealStateStore {
    async fn put(
        &self,
        key: &str,
        value: &serde_json::Value,
        ttl: Option<Duration>,
    ) -> PersistenceResult<()> {
        let row = KvRow::new(value, ttl)?;
        let _: Option<KvRow> = self
            .db
            .upsert((KV_TABLE, key))
            .content(row)
            .await
            .map_err(from_surrealdb_error)?;
        debug!(key, "stored value");
        Ok(())
    }

    async fn get(&self, key: &str) -> PersistenceResult<Option<serde_json::Value>> {
        let row: Option<KvRow> = self
            .db
            .select((KV_TABLE, key))
            .await
            .map_err(from_surrealdb_error)?;

        match row {
            None => Ok(None),
            Some(row) if row.is_expired(now_ms()) => {
                let _: Option<KvRow> = self
                    .db
                    .delete((KV_TABLE, key))
                    .await
                    .map_err(from_surrealdb_error)?;
                Ok(None)
            }
            Some(row) => Ok(Some(serde_json::from_str(&row.value_json)?)),
        }
    }

    async fn delete(&self, key: &str) -> PersistenceResult<bool> {
        let removed: Option<KvRow> = self
            .db
            .delete((KV_TABLE, key))
            .await
            .map_err(from_surrealdb_error)?;
        Ok(removed.is_some_and(|row| !row.is_expired(now_ms())))
    }

    async fn put_indexed(
        &self,
        key: &str,
        value: &serde_json::Value,
        index: &str,
    ) -> PersistenceResult<()> {
        let row = KvRow::new(value, None)?;
        let member = MemberRow::new(index, key);

        self.db
            .query(
                "BEGIN TRANSACTION;
                 UPSERT type::thing($kv_table, $key) CONTENT $row;
                 UPSERT type::thing($member_table, $member_id) CONTENT $member;
                 COMMIT TRANSACTION;",
            )
            .bind(("kv_table", KV_TABLE))
            .bind(("key", key.to_string()))
            .bind(("row", row))
            .bind(("member_table", MEMBER_TABLE))
            .bind(("member_id", member_id(index, key)))
            .bind(("member", member))
            .await
            .map_err(from_surrealdb_error)?
            .check()
            .map_err(from_surrealdb_error)?;

        debug!(key, index, "stored indexed value");
        Ok(())
    }

    async fn add_to_index(&self, index: &str, key: &str) -> PersistenceResult<()> {
        let _: Option<MemberRow> = self
            .db
            .upsert((MEMBER_TABLE, member_id(index, key)))
            .content(MemberRow::new(index, key))
            .await
            .map_err(from_surrealdb_error)?;
        Ok(())
    }

    async fn remove_from_index(&self, index: &str, key: &str) -> PersistenceResult<bool> {
        let removed: Option<MemberRow> = self
            .db
            .delete((MEMBER_TABLE, member_id(index, key)))
            .await
            .map_err(from_surrealdb_error)?;
        Ok(removed.is_some())
    }

    async fn list_index(&self, index: &str) -> PersistenceResult<Vec<String>> {
        let rows: Vec<MemberOnly> = self
            .db
            .query("SELECT member FROM type::table($member_table) WHERE index_name = $index ORDER BY member")
            .bind(("member_table", MEMBER_TABLE))
            .bind(("index", index.to_string()))
            .await
            .map_err(from_surrealdb_error)?
            .take(0)
            .map_err(from_surrealdb_error)?;

        Ok(rows.into_iter().map(|row| row.member).collect())
    }

    async fn purge_expired(&self) -> PersistenceResult<usize> {
        let removed: Vec<KvRow> = self
            .db
            .query("DELETE type::table($kv_table) WHERE expires_at_ms != NONE AND expires_at_ms <= $now RETURN BEFORE")
            .bind(("kv_table", KV_TABLE))
            .bind(("now", now_ms()))
            .await
            .map_err(from_surrealdb_error)?
            .take(0)
            .map_err(from_surrealdb_error)?;

        Ok(removed.len())
    }

    async fn health_check(&self) -> PersistenceResult<()> {
        self.db
            .query("INFO FOR DB")
            .await
            .map_err(from_surrealdb_error)?;

        Ok(())
    }
}
