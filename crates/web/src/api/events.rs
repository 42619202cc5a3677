//! Global event log endpoint.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use integrasync_core::models::{EventFilter, EventType, IntegrationEvent};

use crate::api::status::AppError;
use crate::AppState;

#[derive(Deserialize)]
pub struct EventQuery {
    pub task_id: Option<String>,
    pub event_type: Option<String>,
    pub limit: Option<u32>,
}

#[derive(Serialize)]
struct EventListResponse {
    events: Vec<IntegrationEvent>,
    total: usize,
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/events", get(list_events))
}

async fn list_events(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EventQuery>,
) -> Result<Json<EventListResponse>, AppError> {
    let event_type = query
        .event_type
        .as_deref()
        .map(str::parse::<EventType>)
        .transpose()
        .map_err(AppError::BadRequest)?;
    let filter = EventFilter {
        task_id: query.task_id,
        event_type,
    };

    let events = state.control.events(&filter, query.limit.unwrap_or(50))?;
    let total = events.len();
    Ok(Json(EventListResponse { events, total }))
}
