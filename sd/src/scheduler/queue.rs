//! Queue types for the scheduler

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Shared backlog record
///
/// One record per scheduler, stored under a fixed key. `pending_requests`
/// is unsigned and only ever decremented with saturation, so it cannot go
/// negative.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueState {
    /// Time of the most recent scheduling decision (ms since epoch)
    pub last_scheduled_time: u64,

    /// Requests scheduled but not yet completed
    pub pending_requests: u64,
}

impl QueueState {
    pub fn new(last_scheduled_time: u64, pending_requests: u64) -> Self {
        Self {
            last_scheduled_time,
            pending_requests,
        }
    }

    /// State after one more request is scheduled at `now`
    pub fn scheduled(self, now: u64) -> Self {
        Self {
            last_scheduled_time: self.last_scheduled_time.max(now),
            pending_requests: self.pending_requests.saturating_add(1),
        }
    }

    /// State after one request completes
    pub fn completed(self) -> Self {
        Self {
            last_scheduled_time: self.last_scheduled_time,
            pending_requests: self.pending_requests.saturating_sub(1),
        }
    }
}

/// Which downstream handles a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    /// Generic outbound HTTP call
    Http,
    /// Transactional email
    Email,
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Http => write!(f, "http"),
            Self::Email => write!(f, "email"),
        }
    }
}

/// A request with its computed dispatch schedule
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledRequest {
    pub id: String,
    pub kind: JobKind,
    pub data: serde_json::Value,
    pub credential: String,
    /// ms since epoch
    pub scheduled_at: u64,
    /// ms
    pub delay: u64,
    pub expected_execution_time: DateTime<Utc>,
}

impl ScheduledRequest {
    /// Create a new scheduled request with a fresh id
    pub fn new(kind: JobKind, data: serde_json::Value, credential: String, scheduled_at: u64, delay: u64) -> Self {
        let expected_ms = scheduled_at.saturating_add(delay);
        Self {
            id: generate_request_id(),
            kind,
            data,
            credential,
            scheduled_at,
            delay,
            expected_execution_time: DateTime::from_timestamp_millis(expected_ms as i64).unwrap_or_default(),
        }
    }

    pub fn delay_duration(&self) -> Duration {
        Duration::from_millis(self.delay)
    }
}

/// Generate a unique, time-ordered request id
pub fn generate_request_id() -> String {
    format!("req_{}", Uuid::now_v7().simple())
}

/// What the caller gets back after scheduling
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleReceipt {
    pub message: String,
    pub request_id: String,
    pub queue: String,
    pub scheduled_at: u64,
    pub delay_ms: u64,
    pub expected_execution_time: DateTime<Utc>,
    /// Backlog including this request
    pub pending_requests: u64,
}

/// Statistics for the scheduler
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStats {
    pub total_scheduled: u64,
    pub total_completed: u64,
    pub total_throttled: u64,
    pub total_rejected: u64,
    pub max_delay_ms: u64,
}
