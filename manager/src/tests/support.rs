//! Test harness: stub worker servers and manager builders

use crate::manager::Manager;
use crate::node::RetryPolicy;
use crate::scheduler::new_scheduler;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Json, Router};
use shared::api::CpuUsageResponse;
use shared::config::SchedulerPolicy;
use shared::stats::{CpuTimes, DiskStats, MemoryStats, SystemSample};
use shared::store::MemoryStore;
use shared::task::{Task, TaskEvent};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex};

/// Shared state of a stub worker: everything it received and everything it
/// is scripted to serve.
pub struct StubState {
    pub received_events: Mutex<Vec<TaskEvent>>,
    pub deleted_tasks: Mutex<Vec<String>>,
    /// Task list served by `GET /tasks`.
    pub tasks: Mutex<Vec<Task>>,
    /// Status code for `POST /tasks` (default 201).
    pub post_status: AtomicU16,
    /// Status code for the container health probe (default 200).
    pub health_status: AtomicU16,
    /// Sample served by `GET /stats`.
    pub sample: Mutex<SystemSample>,
}

impl StubState {
    fn new() -> Self {
        Self {
            received_events: Mutex::new(Vec::new()),
            deleted_tasks: Mutex::new(Vec::new()),
            tasks: Mutex::new(Vec::new()),
            post_status: AtomicU16::new(201),
            health_status: AtomicU16::new(200),
            sample: Mutex::new(complete_sample(8_000_000_000, 1_000_000_000, 100_000_000_000, 0)),
        }
    }
}

/// A stub worker bound to an ephemeral port.
pub struct StubWorker {
    pub addr: String,
    pub state: Arc<StubState>,
}

impl StubWorker {
    /// The port part of the stub's address, for wiring into host-port maps.
    pub fn port(&self) -> String {
        self.addr
            .rsplit(':')
            .next()
            .expect("stub address has a port")
            .to_string()
    }
}

/// Builds a complete stats sample with the given totals.
pub fn complete_sample(
    mem_total: u64,
    mem_used: u64,
    disk_total: u64,
    task_count: usize,
) -> SystemSample {
    SystemSample {
        mem_stats: Some(MemoryStats {
            total: mem_total,
            available: mem_total - mem_used,
            used: mem_used,
            used_percent: mem_used as f64 / mem_total as f64 * 100.0,
        }),
        disk_stats: Some(DiskStats {
            total: disk_total,
            free: disk_total,
            used: 0,
        }),
        cpu_stats: Some(CpuTimes::default()),
        load_stats: None,
        task_count,
    }
}

fn stub_router(state: Arc<StubState>) -> Router {
    async fn post_task(
        State(state): State<Arc<StubState>>,
        Json(event): Json<TaskEvent>,
    ) -> impl IntoResponse {
        let status = state.post_status.load(Ordering::SeqCst);
        let task = event.task.clone();
        state.received_events.lock().unwrap().push(event);
        (
            StatusCode::from_u16(status).unwrap(),
            Json(serde_json::to_value(&task).unwrap()),
        )
    }

    async fn get_tasks(State(state): State<Arc<StubState>>) -> impl IntoResponse {
        Json(state.tasks.lock().unwrap().clone())
    }

    async fn delete_task(
        State(state): State<Arc<StubState>>,
        Path(task_id): Path<String>,
    ) -> impl IntoResponse {
        state.deleted_tasks.lock().unwrap().push(task_id);
        StatusCode::NO_CONTENT
    }

    async fn get_stats(State(state): State<Arc<StubState>>) -> impl IntoResponse {
        Json(state.sample.lock().unwrap().clone())
    }

    async fn get_cpu_usage(Path(_interval): Path<u64>) -> impl IntoResponse {
        Json(CpuUsageResponse { percentage: 0.1 })
    }

    async fn health(State(state): State<Arc<StubState>>) -> impl IntoResponse {
        StatusCode::from_u16(state.health_status.load(Ordering::SeqCst)).unwrap()
    }

    Router::new()
        .route(
            "/tasks",
            axum::routing::get(get_tasks).post(post_task),
        )
        .route("/tasks/{task_id}", axum::routing::delete(delete_task))
        .route("/stats", axum::routing::get(get_stats))
        .route("/stats/cpu-usage/{interval}", axum::routing::get(get_cpu_usage))
        .route("/health", axum::routing::get(health))
        .with_state(state)
}

/// Spawns a stub worker on an ephemeral port.
pub async fn spawn_stub_worker() -> StubWorker {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    spawn_stub_on(listener).await
}

/// Spawns a stub worker on a specific port (for restart-after-outage
/// scenarios where the manager already knows the address).
pub async fn spawn_stub_worker_on(port: u16) -> StubWorker {
    let addr: SocketAddr = format!("127.0.0.1:{}", port).parse().unwrap();
    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    spawn_stub_on(listener).await
}

async fn spawn_stub_on(listener: tokio::net::TcpListener) -> StubWorker {
    let addr = listener.local_addr().unwrap().to_string();
    let state = Arc::new(StubState::new());
    let router = stub_router(Arc::clone(&state));

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    StubWorker { addr, state }
}

/// Builds a manager with memory stores, a single-attempt retry policy and a
/// zero-second CPU sampling interval so tests stay fast.
pub fn test_manager(workers: Vec<String>, policy: SchedulerPolicy) -> Arc<Manager> {
    Arc::new(
        Manager::new(
            workers,
            new_scheduler(policy),
            Box::new(MemoryStore::new()),
            Box::new(MemoryStore::new()),
            3,
            2,
            0,
            RetryPolicy {
                attempts: 1,
                base_delay_ms: 10,
                max_delay_ms: 10,
            },
        )
        .unwrap(),
    )
}
