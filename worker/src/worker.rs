//! Worker core: task intake, run loop and container reconciliation
//!
//! The worker accepts tasks over HTTP into a FIFO queue and drains it from a
//! single run-loop consumer, which is what makes the state-transition check
//! race-free: nobody else moves a task between states. Runtime failures
//! surface per-operation and transition the affected task; they never stop
//! the loop.

use anyhow::Result;
use shared::stats::SystemSample;
use shared::store::Store;
use shared::task::{validate_transition, State, Task};
use shared::OrchestrationError;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::runtime::{ContainerRuntime, RuntimeSpec};
use crate::stats;

/// The worker's shared state. HTTP handlers and the internal loops all hold
/// this behind an `Arc`; each field serializes its own access.
pub struct Worker {
    pub name: String,
    /// FIFO intake queue. Handlers enqueue, the run loop is the only
    /// consumer.
    queue: Mutex<VecDeque<Task>>,
    /// Local task records, keyed by UUID string.
    db: Mutex<Box<dyn Store<Task>>>,
    runtime: Arc<dyn ContainerRuntime>,
    /// Latest stats snapshot, published via `GET /stats`.
    stats: RwLock<SystemSample>,
}

impl Worker {
    pub fn new(
        name: impl Into<String>,
        db: Box<dyn Store<Task>>,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> Self {
        Self {
            name: name.into(),
            queue: Mutex::new(VecDeque::new()),
            db: Mutex::new(db),
            runtime,
            stats: RwLock::new(SystemSample::default()),
        }
    }

    /// Enqueues a task for the run loop.
    pub async fn add_task(&self, task: Task) {
        debug!(task_id = %task.id, state = %task.state, "Enqueued task");
        self.queue.lock().await.push_back(task);
    }

    /// Number of tasks waiting in the intake queue.
    #[allow(dead_code)]
    pub async fn queue_len(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// All locally known tasks.
    pub async fn get_tasks(&self) -> Result<Vec<Task>> {
        self.db.lock().await.list()
    }

    /// A single task by id.
    pub async fn get_task(&self, id: &Uuid) -> Result<Option<Task>> {
        self.db.lock().await.get(&id.to_string())
    }

    /// One iteration of the run loop: drains everything currently queued,
    /// one task at a time. Per-task failures are logged and do not stop the
    /// drain.
    pub async fn run_pending(&self) {
        loop {
            let queued = self.queue.lock().await.pop_front();
            let Some(task) = queued else {
                debug!("No tasks in the queue");
                return;
            };

            let task_id = task.id;
            if let Err(e) = self.run_task(task).await {
                error!(task_id = %task_id, error = %e, "Error running task");
            }
        }
    }

    /// Processes one dequeued task: validates the requested transition
    /// against the stored record, then dispatches on the queued state.
    async fn run_task(&self, queued: Task) -> Result<()> {
        let key = queued.id.to_string();

        let stored = {
            let mut db = self.db.lock().await;
            match db.get(&key)? {
                Some(task) => task,
                None => {
                    // First time we see this task: adopt the dequeued copy.
                    db.put(&key, queued.clone())?;
                    queued.clone()
                }
            }
        };

        if !validate_transition(stored.state, queued.state) {
            return Err(OrchestrationError::StateTransition {
                from: stored.state,
                to: queued.state,
            }
            .into());
        }

        match queued.state {
            State::Scheduled => self.start_task(queued).await,
            State::Completed => self.stop_task(queued).await,
            other => Err(anyhow::anyhow!(
                "task {} reached the run loop in unexpected state {}",
                queued.id,
                other
            )),
        }
    }

    /// Starts the task's container. A runtime failure marks the task Failed
    /// and leaves it eligible for the manager's restart path.
    async fn start_task(&self, mut task: Task) -> Result<()> {
        let spec = RuntimeSpec::from_task(&task);

        match self.runtime.run(&spec).await {
            Ok(container_id) => {
                task.container_id = container_id;
                task.state = State::Running;
                task.start_time = Some(chrono::Utc::now());
                info!(
                    task_id = %task.id,
                    container_id = %task.container_id,
                    image = %task.image,
                    "Started container"
                );
                self.persist(task).await
            }
            Err(e) => {
                error!(task_id = %task.id, image = %task.image, error = %e, "Error running container");
                task.state = State::Failed;
                self.persist(task).await?;
                Err(e.into())
            }
        }
    }

    /// Stops and removes the task's container. A stop failure persists
    /// nothing so a later event can retry against a flaky runtime; chronic
    /// failures therefore keep surfacing in the logs.
    async fn stop_task(&self, mut task: Task) -> Result<()> {
        match self.runtime.stop(&task.container_id).await {
            Ok(()) => {
                task.finish_time = Some(chrono::Utc::now());
                task.state = State::Completed;
                info!(
                    task_id = %task.id,
                    container_id = %task.container_id,
                    "Stopped and removed container"
                );
                self.persist(task).await
            }
            Err(e) => {
                warn!(
                    task_id = %task.id,
                    container_id = %task.container_id,
                    error = %e,
                    "Error stopping container, leaving task state unchanged"
                );
                Err(e.into())
            }
        }
    }

    /// Reconciles local records against the runtime: every Running task's
    /// container is inspected, exited or vanished containers mark the task
    /// Failed, and the effective host ports are refreshed from the view.
    pub async fn update_tasks(&self) {
        let tasks = match self.get_tasks().await {
            Ok(tasks) => tasks,
            Err(e) => {
                error!(error = %e, "Failed to list tasks for reconciliation");
                return;
            }
        };

        for mut task in tasks {
            if task.state != State::Running {
                continue;
            }

            match self.runtime.inspect(&task.container_id).await {
                Ok(view) => {
                    if view.status == "exited" {
                        warn!(
                            task_id = %task.id,
                            container_id = %task.container_id,
                            "Container exited while task was Running, marking Failed"
                        );
                        task.state = State::Failed;
                    }
                    task.host_ports = view.host_ports;
                }
                Err(e) => {
                    warn!(
                        task_id = %task.id,
                        container_id = %task.container_id,
                        error = %e,
                        "Container inspection failed, marking task Failed"
                    );
                    task.state = State::Failed;
                }
            }

            if let Err(e) = self.persist(task).await {
                error!(error = %e, "Failed to persist reconciled task");
            }
        }
    }

    /// Refreshes the published stats snapshot, embedding the current task
    /// count.
    pub async fn collect_stats(&self) {
        let task_count = self.db.lock().await.count().unwrap_or(0);
        let sample = stats::collect(task_count);
        *self.stats.write().await = sample;
    }

    /// The latest published stats snapshot.
    pub async fn stats_snapshot(&self) -> SystemSample {
        self.stats.read().await.clone()
    }

    /// The runtime handle, used by the inspect HTTP surface.
    pub fn runtime(&self) -> Arc<dyn ContainerRuntime> {
        Arc::clone(&self.runtime)
    }

    async fn persist(&self, task: Task) -> Result<()> {
        self.db.lock().await.put(&task.id.to_string(), task)
    }
}
