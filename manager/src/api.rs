//! REST API for the manager
//!
//! Clients submit task events here; the dispatch loop picks them up from
//! the pending queue. The surface mirrors the worker's task endpoints minus
//! the runtime-specific ones.

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use shared::api::{endpoints, ErrResponse};
use shared::task::{State as TaskState, TaskEvent};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::manager::Manager;

/// Maximum request body size: 1MB. Task events are small; anything larger
/// is malformed or hostile.
const MAX_REQUEST_SIZE: usize = 1024 * 1024;

/// Application state shared across all API handlers
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<Manager>,
}

/// Creates the manager's API router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route(endpoints::TASKS, get(get_tasks).post(add_task))
        .route("/tasks/{task_id}", axum::routing::delete(stop_task))
        .layer(DefaultBodyLimit::max(MAX_REQUEST_SIZE))
        .with_state(state)
}

/// `POST /tasks` - admits a task event.
async fn add_task(
    State(state): State<AppState>,
    payload: Result<Json<TaskEvent>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(event) = payload.map_err(|e| {
        warn!(error = %e, "Rejected task event body");
        ApiError::BadRequest(format!("Error unmarshalling body: {}", e))
    })?;

    info!(event_id = %event.id, task_id = %event.task.id, "Added task event");
    let task = event.task.clone();
    state.manager.add_task(event).await;

    Ok((StatusCode::CREATED, Json(task)))
}

/// `GET /tasks` - all persisted tasks.
async fn get_tasks(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let tasks = state
        .manager
        .get_tasks()
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(tasks))
}

/// `DELETE /tasks/{id}` - synthesizes a Completed event for the referenced
/// task and admits it.
async fn stop_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if task_id.is_empty() {
        return Err(ApiError::BadRequest("No taskID passed in request".to_string()));
    }
    let id = Uuid::parse_str(&task_id)
        .map_err(|e| ApiError::BadRequest(format!("Error parsing taskID {}: {}", task_id, e)))?;

    let mut task = state
        .manager
        .get_task(&id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or_else(|| ApiError::NotFound(format!("No task with ID {} found", id)))?;

    task.state = TaskState::Completed;
    let event = TaskEvent::new(TaskState::Completed, task);
    info!(event_id = %event.id, task_id = %id, "Added stop event for task");
    state.manager.add_task(event).await;

    Ok(StatusCode::NO_CONTENT)
}

/// Errors surfaced to HTTP callers, rendered as the standard error body.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrResponse::new(status.as_u16(), message));
        (status, body).into_response()
    }
}
