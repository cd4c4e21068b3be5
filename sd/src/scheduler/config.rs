//! Scheduler configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::error::SchedulerError;

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Steady-state dispatch rate (requests per second)
    #[serde(rename = "target-rate", default = "default_target_rate")]
    pub target_rate: f64,

    /// Upper bound for any computed delay
    #[serde(rename = "distribution-window-ms", default = "default_distribution_window_ms")]
    pub distribution_window_ms: u64,

    /// Key of the shared backlog record in the state store
    #[serde(rename = "state-key", default = "default_state_key")]
    pub state_key: String,

    /// Queue name reported back to callers
    #[serde(rename = "queue-name", default = "default_queue_name")]
    pub queue_name: String,
}

fn default_target_rate() -> f64 {
    2.0
}

fn default_distribution_window_ms() -> u64 {
    60_000
}

fn default_state_key() -> String {
    "api_queue_state".to_string()
}

fn default_queue_name() -> String {
    "api-rate-limited-queue".to_string()
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            target_rate: default_target_rate(),
            distribution_window_ms: default_distribution_window_ms(),
            state_key: default_state_key(),
            queue_name: default_queue_name(),
        }
    }
}

impl SchedulerConfig {
    /// Get the distribution window as a Duration
    pub fn distribution_window(&self) -> Duration {
        Duration::from_millis(self.distribution_window_ms)
    }

    /// Minimum spacing between two requests at the target rate (ms)
    pub fn min_spacing_ms(&self) -> f64 {
        1000.0 / self.target_rate
    }

    /// Reject values the delay arithmetic cannot work with
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if !self.target_rate.is_finite() || self.target_rate <= 0.0 {
            return Err(SchedulerError::InvalidConfig(format!(
                "target-rate must be a positive number, got {}",
                self.target_rate
            )));
        }
        if self.distribution_window_ms == 0 {
            return Err(SchedulerError::InvalidConfig(
                "distribution-window-ms must be greater than zero".to_string(),
            ));
        }
        if self.state_key.trim().is_empty() {
            return Err(SchedulerError::InvalidConfig("state-key must not be empty".to_string()));
        }
        Ok(())
    }
}
