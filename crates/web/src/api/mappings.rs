//! Field mapping endpoints, nested under a task.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get};
use axum::{Json, Router};

use integrasync_core::control::MappingRequest;
use integrasync_core::models::DataMapping;

use crate::api::status::AppError;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/api/tasks/:id/mappings",
            get(list_mappings).post(create_mapping),
        )
        .route("/api/tasks/:id/mappings/:mapping_id", delete(delete_mapping))
}

async fn list_mappings(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Result<Json<Vec<DataMapping>>, AppError> {
    Ok(Json(state.control.list_mappings(&task_id)?))
}

/// Add a mapping. A malformed transformation rule is a 400.
async fn create_mapping(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
    Json(body): Json<MappingRequest>,
) -> Result<(StatusCode, Json<DataMapping>), AppError> {
    let mapping = state.control.add_mapping(&task_id, body)?;
    Ok((StatusCode::CREATED, Json(mapping)))
}

async fn delete_mapping(
    State(state): State<Arc<AppState>>,
    Path((task_id, mapping_id)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    state.control.delete_mapping(&task_id, &mapping_id)?;
    Ok(StatusCode::NO_CONTENT)
}
