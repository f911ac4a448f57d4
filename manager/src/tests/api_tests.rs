//! Tests for the manager REST API

use crate::api::{create_router, AppState};
use crate::tests::support::test_manager;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use shared::api::ErrResponse;
use shared::config::SchedulerPolicy;
use shared::task::{State, Task, TaskEvent};
use std::sync::Arc;
use tower::ServiceExt; // for `oneshot`
use uuid::Uuid;

fn create_test_app() -> (axum::Router, Arc<crate::manager::Manager>) {
    let manager = test_manager(
        vec!["localhost:5556".to_string()],
        SchedulerPolicy::RoundRobin,
    );
    let router = create_router(AppState {
        manager: Arc::clone(&manager),
    });
    (router, manager)
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

#[tokio::test]
async fn test_post_task_admits_event() {
    let (app, manager) = create_test_app();

    let task = Task::new("web", "strm/helloworld-http");
    let event = TaskEvent::new(State::Running, task.clone());
    let request = Request::builder()
        .method(Method::POST)
        .uri("/tasks")
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&event).unwrap()))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let echoed: Task = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(echoed.id, task.id);
    assert_eq!(manager.pending.lock().await.len(), 1);
}

#[tokio::test]
async fn test_post_task_malformed_body_is_400() {
    let (app, manager) = create_test_app();

    let request = Request::builder()
        .method(Method::POST)
        .uri("/tasks")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let err: ErrResponse = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(err.http_status_code, 400);
    assert!(err.message.contains("Error unmarshalling body"));
    assert_eq!(manager.pending.lock().await.len(), 0);
}

#[tokio::test]
async fn test_get_tasks_lists_persisted_tasks() {
    let (app, manager) = create_test_app();

    let mut task = Task::new("web", "strm/helloworld-http");
    task.state = State::Running;
    manager
        .task_store
        .lock()
        .await
        .put(&task.id.to_string(), task.clone())
        .unwrap();

    let request = Request::builder()
        .method(Method::GET)
        .uri("/tasks")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let tasks: Vec<Task> = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].id, task.id);
    assert_eq!(tasks[0].state, State::Running);
}

#[tokio::test]
async fn test_delete_unknown_task_is_404() {
    let (app, _manager) = create_test_app();

    let request = Request::builder()
        .method(Method::DELETE)
        .uri(format!("/tasks/{}", Uuid::new_v4()))
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_malformed_id_is_400() {
    let (app, _manager) = create_test_app();

    let request = Request::builder()
        .method(Method::DELETE)
        .uri("/tasks/not-a-uuid")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_delete_task_admits_completed_event() {
    let (app, manager) = create_test_app();

    let mut task = Task::new("web", "strm/helloworld-http");
    task.state = State::Running;
    manager
        .task_store
        .lock()
        .await
        .put(&task.id.to_string(), task.clone())
        .unwrap();

    let request = Request::builder()
        .method(Method::DELETE)
        .uri(format!("/tasks/{}", task.id))
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let pending = manager.pending.lock().await;
    assert_eq!(pending.len(), 1);
    let event = pending.front().unwrap();
    assert_eq!(event.state, State::Completed);
    assert_eq!(event.task.id, task.id);
    assert_eq!(event.task.state, State::Completed);
}
