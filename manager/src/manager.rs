//! Manager core: admission, dispatch, reconciliation, health checks
//!
//! The manager owns the cluster view: a FIFO pending queue of admitted
//! events, the task and event stores, the worker/task assignment maps and
//! the cached node handles. The admission handler and the three periodic
//! loops (dispatch, update, health) all work against this shared state, so
//! every structure is serialized behind its own async mutex. Lock order is
//! pending -> assignments -> stores, and no lock is ever held across a
//! network await.
//!
//! Dispatch is at-least-once: a transport failure re-enqueues the event at
//! the tail, so later events can overtake it. That reordering is deliberate;
//! the worker-side transition check makes replays safe.

use anyhow::{Context, Result};
use reqwest::StatusCode;
use shared::api::{task_url, tasks_url, worker_base_url, ErrResponse};
use shared::store::Store;
use shared::task::{validate_transition, State, Task, TaskEvent};
use std::collections::{HashMap, VecDeque};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::node::{Node, RetryPolicy};
use crate::scheduler::Scheduler;

/// The worker/task ownership maps. Kept in one structure so both directions
/// mutate under a single lock and the "one worker per task" invariant cannot
/// be violated halfway.
#[derive(Debug, Default)]
pub(crate) struct Assignments {
    worker_tasks: HashMap<String, Vec<Uuid>>,
    task_worker: HashMap<Uuid, String>,
}

impl Assignments {
    /// Assigns `task_id` to `worker`, moving it if it was assigned
    /// elsewhere.
    pub(crate) fn assign(&mut self, worker: &str, task_id: Uuid) {
        if let Some(previous) = self.task_worker.insert(task_id, worker.to_string()) {
            if let Some(tasks) = self.worker_tasks.get_mut(&previous) {
                tasks.retain(|id| *id != task_id);
            }
        }
        self.worker_tasks
            .entry(worker.to_string())
            .or_default()
            .push(task_id);
    }

    pub(crate) fn unassign(&mut self, task_id: &Uuid) {
        if let Some(worker) = self.task_worker.remove(task_id) {
            if let Some(tasks) = self.worker_tasks.get_mut(&worker) {
                tasks.retain(|id| id != task_id);
            }
        }
    }

    pub(crate) fn worker_for(&self, task_id: &Uuid) -> Option<String> {
        self.task_worker.get(task_id).cloned()
    }

    #[allow(dead_code)]
    pub(crate) fn tasks_on(&self, worker: &str) -> Vec<Uuid> {
        self.worker_tasks.get(worker).cloned().unwrap_or_default()
    }
}

/// The control-plane state shared by the HTTP handlers and the periodic
/// loops.
pub struct Manager {
    pub(crate) workers: Vec<String>,
    pub(crate) pending: Mutex<VecDeque<TaskEvent>>,
    pub(crate) task_store: Mutex<Box<dyn Store<Task>>>,
    pub(crate) event_store: Mutex<Box<dyn Store<TaskEvent>>>,
    pub(crate) assignments: Mutex<Assignments>,
    pub(crate) nodes: Mutex<Vec<Node>>,
    scheduler: Mutex<Box<dyn Scheduler>>,
    client: reqwest::Client,
    restart_limit: u32,
    cpu_sample_interval: u64,
    retry: RetryPolicy,
}

impl Manager {
    pub fn new(
        workers: Vec<String>,
        scheduler: Box<dyn Scheduler>,
        task_store: Box<dyn Store<Task>>,
        event_store: Box<dyn Store<TaskEvent>>,
        restart_limit: u32,
        http_timeout_seconds: u64,
        cpu_sample_interval: u64,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(http_timeout_seconds))
            .build()
            .context("Failed to create HTTP client")?;

        let nodes = workers.iter().map(Node::new).collect();

        Ok(Self {
            workers,
            pending: Mutex::new(VecDeque::new()),
            task_store: Mutex::new(task_store),
            event_store: Mutex::new(event_store),
            assignments: Mutex::new(Assignments::default()),
            nodes: Mutex::new(nodes),
            scheduler: Mutex::new(scheduler),
            client,
            restart_limit,
            cpu_sample_interval,
            retry,
        })
    }

    /// Admits an event onto the pending queue. No validation beyond what
    /// JSON decoding already did; stale or illegal requests are rejected
    /// downstream by the dispatch path and the worker's transition check.
    pub async fn add_task(&self, event: TaskEvent) {
        debug!(event_id = %event.id, task_id = %event.task.id, "Admitted task event");
        self.pending.lock().await.push_back(event);
    }

    /// All persisted tasks.
    pub async fn get_tasks(&self) -> Result<Vec<Task>> {
        self.task_store.lock().await.list()
    }

    /// A single persisted task by id.
    pub async fn get_task(&self, id: &Uuid) -> Result<Option<Task>> {
        self.task_store.lock().await.get(&id.to_string())
    }

    /// One step of the dispatch loop: pop an event, persist it, and either
    /// forward it as a control event for an already-placed task or place it
    /// on a worker.
    pub async fn send_work(&self) {
        let event = self.pending.lock().await.pop_front();
        let Some(event) = event else {
            debug!("No work in the pending queue");
            return;
        };

        info!(event_id = %event.id, task_id = %event.task.id, "Pulled event off the pending queue");

        // Persisting the event is best effort: a store failure is logged,
        // not fatal to the dispatch.
        if let Err(e) = self
            .event_store
            .lock()
            .await
            .put(&event.id.to_string(), event.clone())
        {
            warn!(event_id = %event.id, error = %e, "Failed to persist task event");
        }

        let assigned = self.assignments.lock().await.worker_for(&event.task.id);
        match assigned {
            Some(worker) => self.forward_control_event(event, &worker).await,
            None => self.place_task(event).await,
        }
    }

    /// Handles an event for a task that already has a worker. Only a stop
    /// request that the state machine admits is forwarded; everything else
    /// is dropped with a log line.
    async fn forward_control_event(&self, event: TaskEvent, worker: &str) {
        let task_id = event.task.id;

        if event.state != State::Completed {
            warn!(
                task_id = %task_id,
                worker,
                "invalid request: already-assigned task cannot transition to {} here, only Completed events are accepted",
                event.state
            );
            return;
        }

        let stored = match self.get_task(&task_id).await {
            Ok(Some(task)) => task,
            Ok(None) => {
                warn!(task_id = %task_id, "Task assigned to a worker but missing from the store, dropping event");
                return;
            }
            Err(e) => {
                error!(task_id = %task_id, error = %e, "Failed to load task for control event");
                return;
            }
        };

        if !validate_transition(stored.state, State::Completed) {
            warn!(
                task_id = %task_id,
                current = %stored.state,
                "invalid request: task cannot transition from {} to {}",
                stored.state,
                State::Completed
            );
            return;
        }

        let url = task_url(&worker_base_url(worker), &task_id);
        match self.client.delete(&url).send().await {
            Ok(response) if response.status() == StatusCode::NO_CONTENT => {
                info!(task_id = %task_id, worker, "Sent stop request to worker");
            }
            Ok(response) => {
                let status = response.status();
                match response.json::<ErrResponse>().await {
                    Ok(err) => error!(
                        task_id = %task_id,
                        worker,
                        "Worker rejected stop request ({}): {}",
                        err.http_status_code,
                        err.message
                    ),
                    Err(e) => error!(
                        task_id = %task_id,
                        worker,
                        status = %status,
                        "Error decoding stop response: {}",
                        e
                    ),
                }
            }
            Err(e) => {
                warn!(task_id = %task_id, worker, error = %e, "Error connecting to worker for stop request");
            }
        }
    }

    /// Places a new task: refresh node views, run the scheduler, record the
    /// assignment, persist the task as Scheduled and POST the event to the
    /// selected worker. A transport failure unwinds the placement and
    /// re-enqueues the original event.
    async fn place_task(&self, event: TaskEvent) {
        let task_id = event.task.id;

        let node = match self.select_node(&event.task).await {
            Ok(node) => node,
            Err(e) => {
                error!(task_id = %task_id, error = %e, "No placement for task");
                return;
            }
        };

        self.assignments.lock().await.assign(&node.name, task_id);
        self.apply_allocation(&node.name, &event.task, 1).await;

        let mut task = event.task.clone();
        task.state = State::Scheduled;
        if let Err(e) = self
            .task_store
            .lock()
            .await
            .put(&task_id.to_string(), task.clone())
        {
            error!(task_id = %task_id, error = %e, "Failed to persist scheduled task, re-enqueueing event");
            self.rollback_placement(&node.name, &event.task).await;
            self.pending.lock().await.push_back(event);
            return;
        }

        // The worker validates transitions against its own copy, so the
        // forwarded snapshot must carry the Scheduled state the manager
        // just recorded.
        let mut outbound = event.clone();
        outbound.task = task;

        let url = tasks_url(&node.api);
        match self.client.post(&url).json(&outbound).send().await {
            Ok(response) if response.status() == StatusCode::CREATED => {
                match response.json::<Task>().await {
                    Ok(accepted) => {
                        info!(task_id = %accepted.id, worker = %node.name, "Placed task on worker");
                    }
                    Err(e) => {
                        warn!(task_id = %task_id, error = %e, "Error decoding worker response");
                    }
                }
            }
            Ok(response) => {
                let status = response.status();
                match response.json::<ErrResponse>().await {
                    Ok(err) => error!(
                        task_id = %task_id,
                        worker = %node.name,
                        "Worker rejected task ({}): {}",
                        err.http_status_code,
                        err.message
                    ),
                    Err(e) => error!(
                        task_id = %task_id,
                        worker = %node.name,
                        status = %status,
                        "Error decoding worker error response: {}",
                        e
                    ),
                }
            }
            Err(e) => {
                warn!(
                    task_id = %task_id,
                    worker = %node.name,
                    error = %e,
                    "Error connecting to worker, re-enqueueing event"
                );
                self.rollback_placement(&node.name, &event.task).await;
                self.pending.lock().await.push_back(event);
            }
        }
    }

    /// Refreshes every node's stats and CPU usage, then runs the
    /// three-stage scheduler over the refreshed snapshot.
    async fn select_node(&self, task: &Task) -> Result<Node> {
        let mut snapshot = { self.nodes.lock().await.clone() };

        for node in &mut snapshot {
            if let Err(e) = node.get_stats(&self.client, self.retry).await {
                warn!(node = %node.name, error = %e, "Failed to refresh node stats");
                continue;
            }
            if let Err(e) = node
                .get_cpu_usage(&self.client, self.cpu_sample_interval, self.retry)
                .await
            {
                warn!(node = %node.name, error = %e, "Failed to refresh node CPU usage");
            }
        }

        // Fold the refreshed capacity figures back into the shared view;
        // allocation fields stay whatever the dispatch path maintains.
        {
            let mut nodes = self.nodes.lock().await;
            for refreshed in &snapshot {
                if let Some(node) = nodes.iter_mut().find(|n| n.name == refreshed.name) {
                    node.memory = refreshed.memory;
                    node.disk = refreshed.disk;
                    node.stats = refreshed.stats.clone();
                    node.cpu_usage = refreshed.cpu_usage;
                    node.task_count = refreshed.task_count;
                }
            }
        }

        let mut scheduler = self.scheduler.lock().await;

        let candidates = scheduler.select_candidates(task, &snapshot);
        if candidates.is_empty() {
            anyhow::bail!("no candidate nodes match the resource request");
        }

        let scores = scheduler.score(task, &candidates);
        if scores.is_empty() {
            anyhow::bail!("scheduler produced no scores");
        }

        scheduler
            .pick(&scores, &candidates)
            .ok_or_else(|| anyhow::anyhow!("scheduler did not pick a node"))
    }

    async fn apply_allocation(&self, worker: &str, task: &Task, sign: i64) {
        let mut nodes = self.nodes.lock().await;
        if let Some(node) = nodes.iter_mut().find(|n| n.name == worker) {
            node.memory_allocated += sign * task.memory;
            node.disk_allocated += sign * task.disk;
            node.task_count += sign;
        }
    }

    async fn rollback_placement(&self, worker: &str, task: &Task) {
        self.assignments.lock().await.unassign(&task.id);
        self.apply_allocation(worker, task, -1).await;
    }

    /// One step of the update loop: pull every worker's task list and copy
    /// the mutable fields over the local records. Network errors skip the
    /// worker for this iteration.
    pub async fn update_tasks(&self) {
        for worker in &self.workers {
            debug!(worker = %worker, "Checking worker for task updates");

            let url = tasks_url(&worker_base_url(worker));
            let response = match self.client.get(&url).send().await {
                Ok(response) => response,
                Err(e) => {
                    warn!(worker = %worker, error = %e, "Error connecting to worker for task updates");
                    continue;
                }
            };
            if !response.status().is_success() {
                warn!(worker = %worker, status = %response.status(), "Worker returned error for task updates");
                continue;
            }

            let remote_tasks: Vec<Task> = match response.json().await {
                Ok(tasks) => tasks,
                Err(e) => {
                    warn!(worker = %worker, error = %e, "Error decoding task list from worker");
                    continue;
                }
            };

            for remote in remote_tasks {
                let key = remote.id.to_string();
                let mut store = self.task_store.lock().await;

                let local = match store.get(&key) {
                    Ok(Some(task)) => task,
                    Ok(None) => {
                        warn!(task_id = %remote.id, worker = %worker, "Task reported by worker not found locally, skipping");
                        continue;
                    }
                    Err(e) => {
                        error!(task_id = %remote.id, error = %e, "Failed to load task during update");
                        continue;
                    }
                };

                let mut updated = local;
                updated.state = remote.state;
                updated.start_time = remote.start_time;
                updated.finish_time = remote.finish_time;
                updated.container_id = remote.container_id;
                updated.host_ports = remote.host_ports;

                if let Err(e) = store.put(&key, updated) {
                    error!(task_id = %remote.id, error = %e, "Failed to persist task update");
                }
            }
        }
    }

    /// One step of the health-check loop: probe every Running task's health
    /// endpoint and restart on failure; restart Failed tasks outright. Both
    /// paths respect the restart budget.
    pub async fn do_health_checks(&self) {
        let tasks = match self.get_tasks().await {
            Ok(tasks) => tasks,
            Err(e) => {
                error!(error = %e, "Failed to list tasks for health checks");
                return;
            }
        };

        for task in tasks {
            if task.state == State::Running && task.restart_count < self.restart_limit {
                if let Err(e) = self.check_task_health(&task).await {
                    warn!(task_id = %task.id, error = %e, "Health check failed, restarting task");
                    self.restart_task(&task).await;
                }
            } else if task.state == State::Failed && task.restart_count < self.restart_limit {
                info!(task_id = %task.id, restart_count = task.restart_count, "Restarting failed task");
                self.restart_task(&task).await;
            }
        }
    }

    /// Probes `http://{workerHost}:{hostPort}{healthCheck}`. Tasks without
    /// a health-check path or a discovered host port are skipped.
    async fn check_task_health(&self, task: &Task) -> Result<()> {
        if task.health_check.is_empty() {
            return Ok(());
        }

        let Some(worker) = self.assignments.lock().await.worker_for(&task.id) else {
            debug!(task_id = %task.id, "Task has no assigned worker, skipping health check");
            return Ok(());
        };
        let Some(host_port) = task.first_host_port() else {
            debug!(task_id = %task.id, "Task has no discovered host port yet, skipping health check");
            return Ok(());
        };

        let host = worker.split(':').next().unwrap_or(worker.as_str());
        let url = format!("http://{}:{}{}", host, host_port, task.health_check);
        debug!(task_id = %task.id, url, "Calling health check");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Error connecting to health check {}", url))?;

        if response.status() != StatusCode::OK {
            anyhow::bail!(
                "health check for task {} returned {}",
                task.id,
                response.status()
            );
        }

        debug!(task_id = %task.id, "Task passed health check");
        Ok(())
    }

    /// Schedules the task for another run on its current worker: bumps the
    /// restart counter, persists the task as Scheduled and POSTs a fresh
    /// event. The budget ceiling is enforced by the health-check loop.
    async fn restart_task(&self, task: &Task) {
        let Some(worker) = self.assignments.lock().await.worker_for(&task.id) else {
            warn!(task_id = %task.id, "Cannot restart task with no assigned worker");
            return;
        };

        let mut task = task.clone();
        task.state = State::Scheduled;
        task.restart_count += 1;

        if let Err(e) = self
            .task_store
            .lock()
            .await
            .put(&task.id.to_string(), task.clone())
        {
            error!(task_id = %task.id, error = %e, "Failed to persist task for restart");
            return;
        }

        let event = TaskEvent::new(State::Running, task.clone());
        let url = tasks_url(&worker_base_url(&worker));
        match self.client.post(&url).json(&event).send().await {
            Ok(response) if response.status() == StatusCode::CREATED => {
                info!(
                    task_id = %task.id,
                    worker = %worker,
                    restart_count = task.restart_count,
                    "Sent restart event to worker"
                );
            }
            Ok(response) => {
                let status = response.status();
                match response.json::<ErrResponse>().await {
                    Ok(err) => error!(
                        task_id = %task.id,
                        worker = %worker,
                        "Worker rejected restart ({}): {}",
                        err.http_status_code,
                        err.message
                    ),
                    Err(e) => error!(
                        task_id = %task.id,
                        worker = %worker,
                        status = %status,
                        "Error decoding restart response: {}",
                        e
                    ),
                }
            }
            Err(e) => {
                warn!(
                    task_id = %task.id,
                    worker = %worker,
                    error = %e,
                    "Error connecting to worker for restart, re-enqueueing event"
                );
                self.pending.lock().await.push_back(event);
            }
        }
    }
}
