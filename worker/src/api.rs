//! REST API for the worker
//!
//! Exposes the task intake and inspection endpoints the manager drives,
//! plus the stats endpoints its scheduler samples. All request and response
//! bodies are the shared wire types; decode failures (including unknown
//! fields) are rejected with the standard error body.

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use shared::api::{endpoints, CpuUsageResponse, ErrResponse};
use shared::task::{State as TaskState, TaskEvent};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::worker::Worker;

/// Maximum request body size: 1MB. Task events are small; anything larger
/// is malformed or hostile.
const MAX_REQUEST_SIZE: usize = 1024 * 1024;

/// Application state shared across all API handlers
#[derive(Clone)]
pub struct AppState {
    pub worker: Arc<Worker>,
}

/// Creates the worker's API router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route(
            endpoints::TASKS,
            get(get_tasks).post(start_task),
        )
        .route("/tasks/{task_id}", get(inspect_task).delete(stop_task))
        .route(endpoints::STATS, get(get_stats))
        .route("/stats/cpu-usage/{interval}", get(get_cpu_usage))
        .layer(DefaultBodyLimit::max(MAX_REQUEST_SIZE))
        .with_state(state)
}

/// `POST /tasks` - enqueues the embedded task for execution.
async fn start_task(
    State(state): State<AppState>,
    payload: Result<Json<TaskEvent>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(event) = payload.map_err(|e| {
        warn!(error = %e, "Rejected task event body");
        ApiError::BadRequest(format!("Error unmarshalling body: {}", e))
    })?;

    info!(task_id = %event.task.id, state = %event.task.state, "Added task");
    let task = event.task.clone();
    state.worker.add_task(event.task).await;

    Ok((StatusCode::CREATED, Json(task)))
}

/// `GET /tasks` - all locally known tasks.
async fn get_tasks(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let tasks = state
        .worker
        .get_tasks()
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(tasks))
}

/// `GET /tasks/{id}` - the runtime's view of the task's container.
async fn inspect_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_task_id(&task_id)?;

    let task = state
        .worker
        .get_task(&id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or_else(|| ApiError::NotFound(format!("No task with ID {} found", id)))?;

    if task.container_id.is_empty() {
        return Err(ApiError::NotFound(format!(
            "Task {} has no container yet",
            id
        )));
    }

    let view = state
        .worker
        .runtime()
        .inspect(&task.container_id)
        .await
        .map_err(|e| ApiError::Internal(format!("Error inspecting container: {}", e)))?;

    Ok(Json(view))
}

/// `DELETE /tasks/{id}` - marks the local copy Completed and enqueues the
/// stop for the run loop.
async fn stop_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = parse_task_id(&task_id)?;

    let mut task = state
        .worker
        .get_task(&id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or_else(|| ApiError::NotFound(format!("No task with ID {} found", id)))?;

    task.state = TaskState::Completed;
    info!(
        task_id = %task.id,
        container_id = %task.container_id,
        "Added task to stop container"
    );
    state.worker.add_task(task).await;

    Ok(StatusCode::NO_CONTENT)
}

/// `GET /stats` - the latest stats snapshot.
async fn get_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.worker.stats_snapshot().await)
}

/// `GET /stats/cpu-usage/{interval}` - usage fraction over a fresh sampling
/// interval. Blocks the request for `interval` seconds while the second
/// sample is taken.
async fn get_cpu_usage(Path(interval): Path<u64>) -> impl IntoResponse {
    debug!(interval, "Sampling CPU usage");
    let percentage = crate::stats::cpu_usage_fraction(interval).await;
    Json(CpuUsageResponse { percentage })
}

fn parse_task_id(raw: &str) -> Result<Uuid, ApiError> {
    if raw.is_empty() {
        return Err(ApiError::BadRequest("No taskID passed in request".to_string()));
    }
    Uuid::parse_str(raw)
        .map_err(|e| ApiError::BadRequest(format!("Error parsing taskID {}: {}", raw, e)))
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
