//! Intake route handlers

use axum::Json;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use serde_json::{Value, json};
use tracing::debug;

use super::AppState;
use super::extract::ApiJson;
use super::error::{ApiError, MISSING_EMAIL_FIELDS_MESSAGE};
use crate::downstream::missing_email_fields;
use crate::scheduler::{JobKind, ScheduleReceipt, SchedulerError};

/// Body field that may carry the caller's credential
const API_KEY_FIELD: &str = "apiKey";

pub async fn submit_request(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(mut body): ApiJson<Value>,
) -> Result<(StatusCode, Json<ScheduleReceipt>), ApiError> {
    debug!("submit_request: called");
    if !state.routes.handles(JobKind::Http) {
        return Err(SchedulerError::Configuration("no HTTP endpoint configured".to_string()).into());
    }

    let from_body = body
        .as_object_mut()
        .and_then(|fields| fields.remove(API_KEY_FIELD))
        .and_then(|v| v.as_str().map(str::to_string));
    let credential = bearer_token(&headers).or(from_body);

    let receipt = state.scheduler.submit(JobKind::Http, body, credential).await?;
    Ok((StatusCode::ACCEPTED, Json(receipt)))
}

pub async fn trigger_email(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<Value>,
) -> Result<(StatusCode, Json<ScheduleReceipt>), ApiError> {
    debug!("trigger_email: called");
    let missing = missing_email_fields(&body);
    if !missing.is_empty() {
        return Err(ApiError::Validation {
            message: MISSING_EMAIL_FIELDS_MESSAGE.to_string(),
            missing,
        });
    }

    let Some(api_key) = state.email_api_key.clone() else {
        return Err(SchedulerError::Configuration("email API key not configured".to_string()).into());
    };
    if !state.routes.handles(JobKind::Email) {
        return Err(SchedulerError::Configuration("no email provider configured".to_string()).into());
    }

    let mut receipt = state.scheduler.submit(JobKind::Email, body, Some(api_key)).await?;
    receipt.message = "Email sending event accepted.".to_string();
    Ok((StatusCode::ACCEPTED, Json(receipt)))
}

pub async fn queue_status(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    debug!("queue_status: called");
    let queue_state = state.scheduler.queue_state().await?;
    let next_delay_ms = state.scheduler.preview_delay().await?;
    let stats = state.scheduler.stats().await;
    Ok(Json(json!({
        "queue": state.scheduler.config().queue_name,
        "state": queue_state,
        "nextDelayMs": next_delay_ms,
        "stats": stats,
    })))
}

pub async fn reset_queue(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    debug!("reset_queue: called");
    let queue_state = state.scheduler.reset().await?;
    Ok(Json(json!({ "state": queue_state })))
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().split_once(' '))
        .filter(|(scheme, _)| scheme.eq_ignore_ascii_case("bearer"))
        .map(|(_, token)| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_bearer_token() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert_eq!(bearer_token(&headers).as_deref(), Some("abc"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn test_bearer_scheme_is_case_insensitive() {
        let mut headers = HeaderMap::new();
        for value in ["bearer abc", "BEARER abc", "Bearer   abc "] {
            headers.insert(header::AUTHORIZATION, HeaderValue::from_static(value));
            assert_eq!(bearer_token(&headers).as_deref(), Some("abc"), "header {value:?}");
        }

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearerabc"));
        assert_eq!(bearer_token(&headers), None);
    }
}
