//! Smoothd - Rate Smoothing Dispatcher
//!
//! Smoothd sits in front of a rate-limited API and spreads bursts of
//! requests over time. Each request is assigned a dispatch delay from a
//! shared backlog record, handed to a delay queue, and delivered by a small
//! worker pool that reports every completion back to the scheduler.
//!
//! # Core Concepts
//!
//! - **Backlog-Proportional Delay**: delay grows with outstanding requests,
//!   capped by the distribution window
//! - **Atomic Shared State**: one read-modify-write per decision, so several
//!   instances on one store agree
//! - **Completion Feedback**: the backlog shrinks as the downstream finishes
//!
//! # Modules
//!
//! - [`scheduler`] - Delay computation and backlog bookkeeping
//! - [`store`] - Backlog record storage (memory, SQLite)
//! - [`dispatch`] - Delay queue releasing requests on time
//! - [`downstream`] - HTTP and email clients
//! - [`worker`] - Bounded worker pool with retries
//! - [`server`] - HTTP intake
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod cli;
pub mod config;
pub mod dispatch;
pub mod downstream;
pub mod scheduler;
pub mod server;
pub mod store;
pub mod worker;

pub use config::Config;
pub use scheduler::{JobKind, QueueState, ScheduleReceipt, ScheduledRequest, Scheduler, SchedulerConfig, SchedulerError};
