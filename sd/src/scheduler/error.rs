//! Scheduler error types

use thiserror::Error;

use crate::dispatch::DispatchError;
use crate::store::StoreError;

/// Errors that can occur while scheduling or completing requests
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("State store error: {0}")]
    StateStore(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid scheduler config: {0}")]
    InvalidConfig(String),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),
}

impl SchedulerError {
    /// Whether the caller may retry the whole scheduling attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            SchedulerError::StateStore(_) => true,
            SchedulerError::Dispatch(_) => true,
            SchedulerError::Configuration(_) => false,
            SchedulerError::InvalidConfig(_) => false,
        }
    }
}
