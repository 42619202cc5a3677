//! Integration task endpoints: CRUD, run trigger and per-task events.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use integrasync_core::models::{
    IntegrationEvent, IntegrationTask, NewTask, PaginatedResult, Pagination,
};

use crate::api::status::AppError;
use crate::AppState;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct EventPageQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

#[derive(Serialize)]
struct RunAccepted {
    status: &'static str,
    task: IntegrationTask,
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/tasks", get(list_tasks).post(create_task))
        .route("/api/tasks/:id", get(get_task).delete(delete_task))
        .route("/api/tasks/:id/run", post(run_task))
        .route("/api/tasks/:id/events", get(task_events))
}

async fn list_tasks(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<IntegrationTask>>, AppError> {
    Ok(Json(state.control.list_tasks()?))
}

async fn create_task(
    State(state): State<Arc<AppState>>,
    Json(body): Json<NewTask>,
) -> Result<(StatusCode, Json<IntegrationTask>), AppError> {
    let task = state.control.create_task(body)?;
    Ok((StatusCode::CREATED, Json(task)))
}

async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<IntegrationTask>, AppError> {
    Ok(Json(state.control.get_task(&id)?))
}

async fn delete_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.control.delete_task(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Queue a run. Answers 409 while the task is already running.
async fn run_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<RunAccepted>), AppError> {
    let task = state.control.trigger_run(&id).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(RunAccepted {
            status: "queued",
            task,
        }),
    ))
}

async fn task_events(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<EventPageQuery>,
) -> Result<Json<PaginatedResult<IntegrationEvent>>, AppError> {
    let defaults = Pagination::default();
    let pagination = Pagination {
        page: query.page.unwrap_or(defaults.page),
        per_page: query.per_page.unwrap_or(defaults.per_page),
    };
    Ok(Json(state.control.task_events(&id, &pagination)?))
}
