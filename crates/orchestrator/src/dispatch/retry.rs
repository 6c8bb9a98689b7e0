//! Retry policy for processor failures.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// How often and how patiently a failed cascade is re-run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Re-runs after the first attempt
    pub max_retries: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_backoff_ms: 1000,
            max_backoff_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_retries: 0,
            base_backoff_ms: 0,
            max_backoff_ms: 0,
        }
    }

    /// Whether another attempt is allowed after `retries` re-runs.
    #[must_use]
    pub const fn allows_retry(&self, retries: u32) -> bool {
        retries < self.max_retries
    }

    /// Exponential backoff for the given retry, `base * 2^retry` capped at the max.
    #[must_use]
    pub fn calculate_backoff(&self, retry: u32) -> Duration {
        let backoff = self
            .base_backoff_ms
            .saturating_mul(2u64.saturating_pow(retry));
        Duration::from_millis(backoff.min(self.max_backoff_ms))
    }

    /// Backoff plus up to 10% random jitter.
    #[must_use]
    pub fn backoff_with_jitter(&self, retry: u32) -> Duration {
        let backoff = self.calculate_backoff(retry);
        let spread = u64::try_from(backoff.as_millis() / 10).unwrap_or(u64::MAX);
        let jitter = rand::thread_rng().gen_range(0..=spread);
        backoff.saturating_add(Duration::from_millis(jitter))
    }
}
