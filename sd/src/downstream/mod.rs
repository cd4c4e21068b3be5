//! Downstream services that scheduled requests are delivered to
//!
//! Each client makes exactly one attempt per call; retries belong to the
//! worker pool so every downstream gets the same policy.

mod email;
mod error;
mod http;

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Response;
use serde_json::Value;
use tracing::debug;

use crate::scheduler::{JobKind, ScheduledRequest};

pub use email::{EmailClient, EmailRecipients, EmailRequest, REQUIRED_EMAIL_FIELDS, missing_email_fields};
pub use error::{DownstreamError, is_retryable_status};
pub use http::HttpDownstream;

/// A service that performs the actual outbound call
#[async_trait]
pub trait Downstream: Send + Sync {
    async fn call(&self, request: &ScheduledRequest) -> Result<Value, DownstreamError>;
}

/// Routes each request to the downstream for its kind
#[derive(Clone, Default)]
pub struct JobRouter {
    http: Option<Arc<dyn Downstream>>,
    email: Option<Arc<dyn Downstream>>,
}

impl JobRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_http(mut self, downstream: Arc<dyn Downstream>) -> Self {
        self.http = Some(downstream);
        self
    }

    pub fn with_email(mut self, downstream: Arc<dyn Downstream>) -> Self {
        self.email = Some(downstream);
        self
    }

    /// Whether requests of this kind have somewhere to go
    pub fn handles(&self, kind: JobKind) -> bool {
        self.route(kind).is_some()
    }

    fn route(&self, kind: JobKind) -> Option<&Arc<dyn Downstream>> {
        match kind {
            JobKind::Http => self.http.as_ref(),
            JobKind::Email => self.email.as_ref(),
        }
    }
}

#[async_trait]
impl Downstream for JobRouter {
    async fn call(&self, request: &ScheduledRequest) -> Result<Value, DownstreamError> {
        debug!(request_id = %request.id, kind = %request.kind, "JobRouter::call: called");
        match self.route(request.kind) {
            Some(downstream) => downstream.call(request).await,
            None => Err(DownstreamError::InvalidPayload(format!(
                "no downstream configured for {} requests",
                request.kind
            ))),
        }
    }
}

/// Turn a downstream response into its JSON body or an error
pub(crate) async fn read_response(response: Response) -> Result<Value, DownstreamError> {
    let status = response.status().as_u16();

    if status == 429 {
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(60);
        debug!(retry_after, "read_response: rate limited (429)");
        return Err(DownstreamError::RateLimited {
            retry_after: std::time::Duration::from_secs(retry_after),
        });
    }

    if !response.status().is_success() {
        let message = response.text().await.unwrap_or_default();
        debug!(status, "read_response: API error");
        return Err(DownstreamError::ApiError { status, message });
    }

    let body = response.bytes().await?;
    if body.is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_slice(&body)?)
}

/// Map a reqwest failure, keeping timeouts distinct
pub(crate) fn transport_error(e: reqwest::Error, timeout: std::time::Duration) -> DownstreamError {
    if e.is_timeout() {
        DownstreamError::Timeout(timeout)
    } else {
        DownstreamError::Network(e)
    }
}
