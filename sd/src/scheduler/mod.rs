//! Rate-smoothing scheduler
//!
//! Assigns each incoming request a dispatch delay derived from a shared
//! backlog record, so bursts reach the downstream at a steady rate.

mod clock;
mod config;
mod core;
mod error;
mod queue;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::SchedulerConfig;
pub use core::{Scheduler, plan_delay};
pub use error::SchedulerError;
pub use queue::{JobKind, QueueState, ScheduleReceipt, ScheduledRequest, SchedulerStats, generate_request_id};
