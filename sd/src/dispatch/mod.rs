//! Delayed dispatch of scheduled requests

mod delay_queue;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::scheduler::ScheduledRequest;

pub use delay_queue::DelayQueue;

/// Errors from handing a request to the dispatch queue
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("Dispatch queue is full")]
    Full,

    #[error("Dispatch queue is closed")]
    Closed,
}

/// Accepts a request and releases it after `delay`
#[async_trait]
pub trait DispatchQueue: Send + Sync {
    async fn enqueue(&self, request: ScheduledRequest, delay: Duration) -> Result<(), DispatchError>;
}

/// Accepts everything and dispatches nothing (dry runs)
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardQueue;

#[async_trait]
impl DispatchQueue for DiscardQueue {
    async fn enqueue(&self, request: ScheduledRequest, delay: Duration) -> Result<(), DispatchError> {
        debug!(request_id = %request.id, ?delay, "DiscardQueue::enqueue: dropped");
        Ok(())
    }
}
