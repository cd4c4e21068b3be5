//! Transactional email via a Resend-compatible API

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{debug, info};

use super::{Downstream, DownstreamError, read_response, transport_error};
use crate::config::EmailConfig;
use crate::scheduler::ScheduledRequest;

/// Fields an email request cannot do without
pub const REQUIRED_EMAIL_FIELDS: [&str; 4] = ["to", "from", "subject", "html"];

/// One address or a list of them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EmailRecipients {
    One(String),
    Many(Vec<String>),
}

/// Email to send; unknown options (cc, bcc, reply_to, text) pass through
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailRequest {
    pub to: EmailRecipients,
    pub from: String,
    pub subject: String,
    pub html: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    id: Option<String>,
}

/// Names of required fields that are absent or empty
pub fn missing_email_fields(body: &Value) -> Vec<&'static str> {
    REQUIRED_EMAIL_FIELDS
        .iter()
        .copied()
        .filter(|field| match body.get(*field) {
            None | Some(Value::Null) => true,
            Some(Value::String(s)) => s.trim().is_empty(),
            Some(Value::Array(items)) => items.is_empty(),
            Some(_) => false,
        })
        .collect()
}

/// Email API client
pub struct EmailClient {
    base_url: String,
    http: Client,
    timeout: Duration,
}

impl EmailClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, DownstreamError> {
        let http = Client::builder().timeout(timeout).build().map_err(DownstreamError::Network)?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
            timeout,
        })
    }

    pub fn from_config(config: &EmailConfig) -> Result<Self, DownstreamError> {
        debug!(?config, "EmailClient::from_config: called");
        Self::new(config.base_url.clone(), config.timeout())
    }

    /// Send one email, returning the provider's message id
    pub async fn send(&self, email: &EmailRequest, api_key: &str) -> Result<Option<String>, DownstreamError> {
        let url = format!("{}/emails", self.base_url);
        debug!(%url, subject = %email.subject, "EmailClient::send: called");

        let response = self
            .http
            .post(url)
            .bearer_auth(api_key)
            .json(email)
            .send()
            .await
            .map_err(|e| transport_error(e, self.timeout))?;

        let body = read_response(response).await?;
        let sent: SendResponse = serde_json::from_value(body)?;
        Ok(sent.id)
    }
}

#[async_trait]
impl Downstream for EmailClient {
    async fn call(&self, request: &ScheduledRequest) -> Result<Value, DownstreamError> {
        let missing = missing_email_fields(&request.data);
        if !missing.is_empty() {
            return Err(DownstreamError::InvalidPayload(format!(
                "missing required fields: {}",
                missing.join(", ")
            )));
        }
        let email: EmailRequest = serde_json::from_value(request.data.clone())
            .map_err(|e| DownstreamError::InvalidPayload(e.to_string()))?;

        let message_id = self.send(&email, &request.credential).await?;
        info!(request_id = %request.id, ?message_id, "Email sent");
        Ok(json!({"success": true, "messageId": message_id}))
    }
}
