//! External system registry endpoints.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};

use integrasync_core::control::ConnectionTest;
use integrasync_core::models::{ExternalSystem, NewSystem};

use crate::api::status::AppError;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/systems", get(list_systems).post(create_system))
        .route(
            "/api/systems/:id",
            get(get_system).put(update_system).delete(delete_system),
        )
        .route("/api/systems/:id/test", post(test_connection))
}

async fn list_systems(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ExternalSystem>>, AppError> {
    Ok(Json(state.control.list_systems()?))
}

async fn create_system(
    State(state): State<Arc<AppState>>,
    Json(body): Json<NewSystem>,
) -> Result<(StatusCode, Json<ExternalSystem>), AppError> {
    let system = state.control.create_system(body)?;
    Ok((StatusCode::CREATED, Json(system)))
}

async fn get_system(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ExternalSystem>, AppError> {
    Ok(Json(state.control.get_system(&id)?))
}

async fn update_system(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<NewSystem>,
) -> Result<Json<ExternalSystem>, AppError> {
    Ok(Json(state.control.update_system(&id, body)?))
}

async fn delete_system(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.control.delete_system(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn test_connection(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ConnectionTest>, AppError> {
    Ok(Json(state.control.test_connection(&id).await?))
}
