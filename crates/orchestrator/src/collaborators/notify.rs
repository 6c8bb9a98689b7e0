//! Completion notification.

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use crate::cascade::CascadeCompletion;

/// Notification failure. Logged by the orchestrator, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("notification failed: {reason}")]
pub struct NotifyError {
    pub reason: String,
}

impl NotifyError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Told about every completed cascade after its work items are durable.
#[async_trait]
pub trait CompletionNotifier: Send + Sync {
    async fn notify(&self, completion: &CascadeCompletion) -> Result<(), NotifyError>;
}

/// Logs completions.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingNotifier;

#[async_trait]
impl CompletionNotifier for LoggingNotifier {
    async fn notify(&self, completion: &CascadeCompletion) -> Result<(), NotifyError> {
        info!(
            cascade_id = %completion.cascade_id,
            cascade_key = %completion.cascade_key,
            work_items = completion.work_items.len(),
            concern = completion.concern,
            "cascade completed"
        );
        Ok(())
    }
}
