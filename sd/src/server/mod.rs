//! HTTP intake
//!
//! Accepts requests, schedules them, and answers immediately with the
//! computed dispatch time. Delivery happens later in the worker pool.

mod error;
mod extract;
mod handlers;

use std::future::Future;
use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tracing::info;

use crate::downstream::JobRouter;
use crate::scheduler::Scheduler;

pub use error::{ApiError, MISSING_EMAIL_FIELDS_MESSAGE};
pub use extract::ApiJson;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<Scheduler>,
    /// Used only to check which kinds have a downstream
    pub routes: JobRouter,
    pub email_api_key: Option<String>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/requests", post(handlers::submit_request))
        .route("/trigger-email", post(handlers::trigger_email))
        .route("/queue", get(handlers::queue_status))
        .route("/queue/reset", post(handlers::reset_queue))
        .route("/health", get(handlers::health))
        .with_state(state)
}

/// Serve until `shutdown` resolves
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "Listening");
    }
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await
}
