//! Retry policy for downstream calls

use std::time::Duration;

use crate::config::DispatchConfig;
use crate::downstream::DownstreamError;

/// Exponential backoff, honoring a downstream's retry-after
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(1000),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &DispatchConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }

    /// Whether a failed attempt (1-based) should be followed by another
    pub fn should_retry(&self, attempt: u32, error: &DownstreamError) -> bool {
        error.is_retryable() && attempt <= self.max_retries
    }

    /// Wait before the attempt after `attempt`
    pub fn delay_for(&self, attempt: u32, error: &DownstreamError) -> Duration {
        match error.retry_after() {
            Some(retry_after) => retry_after.min(self.max_backoff),
            None => self.backoff(attempt),
        }
    }

    /// Exponential wait after a failed attempt (1-based), capped
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff.saturating_mul(factor).min(self.max_backoff)
    }
}
