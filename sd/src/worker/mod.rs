//! Workers that deliver released requests to their downstream

mod pool;
mod retry;

pub use pool::{CompletionReport, WorkerPool};
pub use retry::RetryPolicy;
