//! HTTP error responses

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::warn;

use crate::scheduler::SchedulerError;

/// Message returned when an email request lacks a required field
pub const MISSING_EMAIL_FIELDS_MESSAGE: &str = "Missing required fields: to, from, subject, html";

/// Errors surfaced by the intake handlers
#[derive(Debug)]
pub enum ApiError {
    /// Request body failed validation
    Validation {
        message: String,
        missing: Vec<&'static str>,
    },

    /// Body missing, not JSON, or sent with the wrong content type
    Body(JsonRejection),

    /// Scheduling failed
    Scheduler(SchedulerError),
}

impl From<SchedulerError> for ApiError {
    fn from(e: SchedulerError) -> Self {
        ApiError::Scheduler(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Body(rejection)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation { .. } => StatusCode::BAD_REQUEST,
            ApiError::Body(rejection) => rejection.status(),
            ApiError::Scheduler(SchedulerError::Configuration(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Scheduler(SchedulerError::InvalidConfig(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Scheduler(SchedulerError::StateStore(_)) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Scheduler(SchedulerError::Dispatch(_)) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::Validation { .. } => "VALIDATION_ERROR",
            ApiError::Body(_) => "INVALID_BODY",
            ApiError::Scheduler(SchedulerError::Configuration(_)) => "CONFIGURATION_ERROR",
            ApiError::Scheduler(SchedulerError::InvalidConfig(_)) => "CONFIGURATION_ERROR",
            ApiError::Scheduler(SchedulerError::StateStore(_)) => "STATE_STORE_UNAVAILABLE",
            ApiError::Scheduler(SchedulerError::Dispatch(_)) => "DISPATCH_UNAVAILABLE",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();
        let body = match &self {
            ApiError::Validation { message, missing } => json!({
                "error": code,
                "message": message,
                "missing": missing,
            }),
            ApiError::Body(rejection) => json!({
                "error": code,
                "message": rejection.body_text(),
            }),
            ApiError::Scheduler(e) => {
                warn!(error = %e, %status, "Request rejected");
                json!({
                    "error": code,
                    "message": e.to_string(),
                    "retryable": e.is_retryable(),
                })
            }
        };
        (status, Json(body)).into_response()
    }
}
