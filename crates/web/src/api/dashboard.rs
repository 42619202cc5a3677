//! Dashboard summary endpoint.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};

use integrasync_core::models::DashboardSummary;

use crate::api::status::AppError;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/dashboard", get(dashboard))
}

async fn dashboard(State(state): State<Arc<AppState>>) -> Result<Json<DashboardSummary>, AppError> {
    Ok(Json(state.control.dashboard()?))
}
