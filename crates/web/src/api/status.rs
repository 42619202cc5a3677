//! Status and health check endpoints.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tracing::error;

use integrasync_core::errors::{CoreError, DatabaseError, MappingError, RunnerError};

use crate::AppState;

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    version: String,
}

#[derive(Serialize)]
struct StatusResponse {
    version: String,
    uptime_secs: u64,
    total_tasks: i64,
    running_tasks: i64,
    failed_tasks: i64,
    total_events: i64,
    retry_limit: u32,
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/status", get(get_status))
        .route("/api/status/health", get(health_check))
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn get_status(State(state): State<Arc<AppState>>) -> Result<Json<StatusResponse>, AppError> {
    let summary = state.control.dashboard()?;
    Ok(Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        total_tasks: summary.total_tasks,
        running_tasks: summary.running_tasks,
        failed_tasks: summary.failed_tasks,
        total_events: summary.total_events,
        retry_limit: state.control.runner().policy().max_retries,
    }))
}

// ---------------------------------------------------------------------------
// Shared error type for API handlers
// ---------------------------------------------------------------------------

/// API error type that converts to an Axum response.
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidInput { .. } | CoreError::Mapping(MappingError::InvalidRule { .. }) => {
                AppError::BadRequest(err.to_string())
            }
            CoreError::Database(DatabaseError::NotFound { .. })
            | CoreError::Runner(RunnerError::Database(DatabaseError::NotFound { .. })) => {
                AppError::NotFound(err.to_string())
            }
            CoreError::Database(DatabaseError::Constraint { .. })
            | CoreError::Runner(RunnerError::ConcurrentRunConflict { .. }) => {
                AppError::Conflict(err.to_string())
            }
            other => {
                error!(error = %other, "request failed");
                AppError::Internal(other.to_string())
            }
        }
    }
}

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (axum::http::StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (axum::http::StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (axum::http::StatusCode::CONFLICT, msg),
            AppError::Internal(msg) => (axum::http::StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = serde_json::json!({ "error": message });
        (status, Json(body)).into_response()
    }
}
