//! Orchestrator configuration.
//!
//! Loaded from TOML. Every field has a default, so an empty file is a valid
//! configuration.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dispatch::RetryPolicy;
use crate::persistence::StoreConfig;
use crate::tier::ValidationGate;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "CASCADE_CONFIG";

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read
    #[error("failed to read config {path}: {reason}")]
    Io { path: PathBuf, reason: String },

    /// The file is not valid TOML for this schema
    #[error("failed to parse config: {reason}")]
    Parse { reason: String },

    /// A value is out of range
    #[error("invalid config: {reason}")]
    Invalid { reason: String },
}

impl ConfigError {
    /// Create an invalid config error.
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::Invalid {
            reason: reason.into(),
        }
    }
}

/// Top-level orchestrator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CascadeConfig {
    /// Per-worker deadline in seconds.
    #[serde(default = "default_worker_timeout")]
    pub worker_timeout_secs: u64,

    /// Expiration of worker records in seconds, refreshed on every write.
    #[serde(default = "default_worker_ttl")]
    pub worker_ttl_secs: u64,

    /// Root directory under which per-worker workspaces are created.
    #[serde(default = "default_workspace_root")]
    pub workspace_root: PathBuf,

    /// Validation gate thresholds.
    #[serde(default)]
    pub validation: ValidationConfig,

    /// Task queue settings.
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// State store connection.
    #[serde(default)]
    pub store: StoreSettings,

    /// External collaborator endpoints.
    #[serde(default)]
    pub collaborators: CollaboratorConfig,

    /// Version-control worktrees.
    #[serde(default)]
    pub worktree: WorktreeConfig,
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            worker_timeout_secs: default_worker_timeout(),
            worker_ttl_secs: default_worker_ttl(),
            workspace_root: default_workspace_root(),
            validation: ValidationConfig::default(),
            dispatch: DispatchConfig::default(),
            store: StoreSettings::default(),
            collaborators: CollaboratorConfig::default(),
            worktree: WorktreeConfig::default(),
        }
    }
}

impl CascadeConfig {
    /// Parse a configuration from TOML text and validate it.
    ///
    /// # Errors
    ///
    /// Returns an error if the text does not parse or fails validation.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ConfigError::Io {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        Self::from_toml_str(&text)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first invalid field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_timeout_secs == 0 {
            return Err(ConfigError::invalid("worker_timeout_secs must be greater than 0"));
        }
        if self.worker_ttl_secs == 0 {
            return Err(ConfigError::invalid("worker_ttl_secs must be greater than 0"));
        }
        self.validation.validate()?;
        self.dispatch.validate()?;
        if self.worktree.enabled && self.worktree.repo_dir.is_none() {
            return Err(ConfigError::invalid(
                "worktree.repo_dir is required when worktrees are enabled",
            ));
        }
        Ok(())
    }

    /// Per-worker deadline.
    #[must_use]
    pub const fn worker_timeout(&self) -> Duration {
        Duration::from_secs(self.worker_timeout_secs)
    }

    /// Worker record expiration.
    #[must_use]
    pub const fn worker_ttl(&self) -> Duration {
        Duration::from_secs(self.worker_ttl_secs)
    }
}

/// Validation gate thresholds on a 0-10 scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Scores at or above this fail the tier.
    #[serde(default = "default_fail_threshold")]
    pub fail_threshold: f64,

    /// Scores at or above this proceed with a concern flag.
    #[serde(default = "default_concern_threshold")]
    pub concern_threshold: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            fail_threshold: default_fail_threshold(),
            concern_threshold: default_concern_threshold(),
        }
    }
}

impl ValidationConfig {
    /// Validate the thresholds.
    ///
    /// # Errors
    ///
    /// Returns an error unless `0 <= concern < fail <= 10`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ValidationGate::new(self.fail_threshold, self.concern_threshold)
            .map(|_| ())
            .map_err(|e| ConfigError::invalid(e.to_string()))
    }

    /// Build the gate these thresholds describe.
    ///
    /// # Errors
    ///
    /// Returns an error if the thresholds are out of range.
    pub fn gate(&self) -> Result<ValidationGate, ConfigError> {
        ValidationGate::new(self.fail_threshold, self.concern_threshold)
            .map_err(|e| ConfigError::invalid(e.to_string()))
    }
}

/// Distributed dispatch settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Cascades executing at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Submissions buffered before `submit` waits.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Retries after the first attempt for processor failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First retry delay.
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,

    /// Retry delay cap.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// How long finished job records are kept.
    #[serde(default = "default_result_ttl")]
    pub result_ttl_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            queue_capacity: default_queue_capacity(),
            max_retries: default_max_retries(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            result_ttl_secs: default_result_ttl(),
        }
    }
}

impl DispatchConfig {
    /// Validate the dispatch settings.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first invalid field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::invalid("dispatch.concurrency must be greater than 0"));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::invalid(
                "dispatch.queue_capacity must be greater than 0",
            ));
        }
        if self.base_backoff_ms > self.max_backoff_ms {
            return Err(ConfigError::invalid(
                "dispatch.base_backoff_ms must not exceed dispatch.max_backoff_ms",
            ));
        }
        Ok(())
    }

    /// Retry policy for processor failures.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_backoff_ms: self.base_backoff_ms,
            max_backoff_ms: self.max_backoff_ms,
        }
    }

    /// Retention of finished job records.
    #[must_use]
    pub const fn result_ttl(&self) -> Duration {
        Duration::from_secs(self.result_ttl_secs)
    }
}

/// State store connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSettings {
    /// `mem://` or `ws://host:port`
    #[serde(default = "default_store_url")]
    pub url: String,

    #[serde(default = "default_namespace")]
    pub namespace: String,

    #[serde(default = "default_database")]
    pub database: String,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            url: default_store_url(),
            namespace: default_namespace(),
            database: default_database(),
            username: None,
            password: None,
        }
    }
}

impl StoreSettings {
    /// SurrealDB connection config for these settings.
    #[must_use]
    pub fn store_config(&self) -> StoreConfig {
        let config = StoreConfig {
            url: self.url.clone(),
            namespace: self.namespace.clone(),
            database: self.database.clone(),
            credentials: None,
        };
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) => config.with_credentials(user.clone(), pass.clone()),
            _ => config,
        }
    }
}

/// Endpoints of the external tier collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollaboratorConfig {
    /// Tier 1: task to structured specification.
    #[serde(default)]
    pub semantic_url: Option<String>,

    /// Tier 2: specification to program.
    #[serde(default)]
    pub synthesis_url: Option<String>,

    /// Tier 3: program execution.
    #[serde(default)]
    pub execution_url: Option<String>,

    /// Declared timeout of each collaborator call.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for CollaboratorConfig {
    fn default() -> Self {
        Self {
            semantic_url: None,
            synthesis_url: None,
            execution_url: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl CollaboratorConfig {
    /// Declared collaborator timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Worktree settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorktreeConfig {
    /// Create a git worktree per worker.
    #[serde(default)]
    pub enabled: bool,

    /// Repository the worktrees are created from.
    #[serde(default)]
    pub repo_dir: Option<PathBuf>,
}

fn default_worker_timeout() -> u64 {
    3600 // 1 hour
}

fn default_worker_ttl() -> u64 {
    3600
}

fn default_workspace_root() -> PathBuf {
    std::env::temp_dir().join("cascade-workspaces")
}

fn default_fail_threshold() -> f64 {
    9.0
}

fn default_concern_threshold() -> f64 {
    6.0
}

fn default_concurrency() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    128
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_backoff_ms() -> u64 {
    1000
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_result_ttl() -> u64 {
    86_400 // 24 hours
}

fn default_store_url() -> String {
    "mem://".to_string()
}

fn default_namespace() -> String {
    "cascade".to_string()
}

fn default_database() -> String {
    "cascade".to_string()
}

fn default_request_timeout() -> u64 {
    600
}
