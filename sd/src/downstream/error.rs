//! Downstream error types

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while calling a downstream service
#[derive(Debug, Error)]
pub enum DownstreamError {
    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("API error {status}: {message}")]
    ApiError { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Downstream call panicked: {0}")]
    Panicked(String),
}

/// Check if an HTTP status code is worth another attempt
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
}

impl DownstreamError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            DownstreamError::RateLimited { .. } => true,
            DownstreamError::ApiError { status, .. } => is_retryable_status(*status),
            DownstreamError::Network(_) => true,
            DownstreamError::Timeout(_) => true,
            DownstreamError::InvalidPayload(_) => false,
            DownstreamError::Json(_) => false,
            DownstreamError::Panicked(_) => false,
        }
    }

    /// Get the retry duration if the downstream asked for one
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            DownstreamError::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}
