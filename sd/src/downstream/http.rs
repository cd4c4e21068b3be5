//! Generic JSON-over-HTTP downstream

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use super::{Downstream, DownstreamError, read_response, transport_error};
use crate::config::DispatchConfig;
use crate::scheduler::ScheduledRequest;

/// POSTs the request data to a fixed endpoint with a bearer credential
pub struct HttpDownstream {
    endpoint: String,
    http: Client,
    timeout: Duration,
}

impl HttpDownstream {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, DownstreamError> {
        let http = Client::builder().timeout(timeout).build().map_err(DownstreamError::Network)?;
        Ok(Self {
            endpoint: endpoint.into(),
            http,
            timeout,
        })
    }

    /// Build from configuration; `None` when no endpoint is set
    pub fn from_config(config: &DispatchConfig) -> Result<Option<Self>, DownstreamError> {
        debug!(?config.endpoint, "HttpDownstream::from_config: called");
        match &config.endpoint {
            Some(endpoint) => Ok(Some(Self::new(endpoint.clone(), config.timeout())?)),
            None => Ok(None),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Downstream for HttpDownstream {
    async fn call(&self, request: &ScheduledRequest) -> Result<Value, DownstreamError> {
        debug!(request_id = %request.id, endpoint = %self.endpoint, "HttpDownstream::call: called");
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&request.credential)
            .json(&request.data)
            .send()
            .await
            .map_err(|e| transport_error(e, self.timeout))?;

        read_response(response).await
    }
}
