//! API version 1 endpoints.

use std::sync::Arc;

use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};

use crate::telemetry::{Stats, Telemetry};

/// Shared application state for API endpoints.
#[derive(Clone)]
pub struct AppState {
    pub telemetry: Arc<Telemetry>,
}

impl AppState {
    pub fn new(telemetry: Arc<Telemetry>) -> Self {
        Self { telemetry }
    }
}

/// API error response.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Health check endpoint handler.
async fn health() -> &'static str {
    "OK"
}

/// Miner statistics: hash count, uptime, version, share verdicts and the
/// algorithm being mined.
///
/// # Example
/// ```bash
/// curl http://localhost:7785/api/v1/stats
/// ```
async fn stats(State(state): State<AppState>) -> Json<Stats> {
    Json(state.telemetry.query_stats())
}

/// Status of the pool connection in use, or 404 between connections.
async fn pool(State(state): State<AppState>) -> Response {
    match state.telemetry.pool_status() {
        Some(status) => Json(status).into_response(),
        None => {
            let error = ErrorResponse {
                error: "No active pool connection".into(),
            };
            (StatusCode::NOT_FOUND, Json(error)).into_response()
        }
    }
}

/// Build the v1 API routes.
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/pool", get(pool))
        .with_state(state)
}
