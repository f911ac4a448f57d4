//! Orchestration Manager
//!
//! The manager is the control-plane process: it admits task events over
//! HTTP, places tasks onto workers through the configured scheduler, polls
//! workers to reconcile task state, and performs health checks with a
//! bounded restart policy.

// Use jemalloc as the global allocator for better performance
#[cfg(not(target_os = "windows"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use anyhow::{Context, Result};
use clap::Parser;
use shared::config::{ManagerConfig, StoreBackend};
use shared::store::{MemoryStore, SqliteStore, Store};
use shared::task::{Task, TaskEvent};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};

mod api;
mod manager;
mod node;
mod scheduler;

use manager::Manager;
use node::RetryPolicy;

#[cfg(test)]
mod tests;

/// Command-line arguments for the manager
#[derive(Parser, Debug)]
#[command(name = "manager")]
#[command(about = "Control plane that admits task events and places tasks on workers", long_about = None)]
struct CliArgs {
    /// Path to the manager configuration file (manager.toml)
    #[arg(value_name = "CONFIG_FILE")]
    config_file: PathBuf,

    /// Override the listen address from config file
    #[arg(long = "listen-address", value_name = "ADDRESS")]
    listen_address: Option<String>,

    /// Override the worker list from config file (repeatable)
    #[arg(long = "worker", value_name = "HOST:PORT")]
    workers: Vec<String>,
}

/// The main application structure for the manager process. It owns the
/// shared manager state and the handles of the periodic loops.
pub struct ManagerService {
    config: ManagerConfig,
    manager: Arc<Manager>,
    shutdown_tx: tokio::sync::broadcast::Sender<()>,
    loop_handles: Vec<JoinHandle<()>>,
}

impl ManagerService {
    /// Creates the manager from its configuration: store backends, the
    /// configured scheduler policy and the node handles.
    pub fn new(config: ManagerConfig) -> Result<Self> {
        let (task_store, event_store) = build_stores(&config)?;
        let scheduler = scheduler::new_scheduler(config.scheduler);

        let manager = Arc::new(Manager::new(
            config.workers.clone(),
            scheduler,
            task_store,
            event_store,
            config.restart_limit,
            config.http_timeout_seconds,
            config.cpu_sample_interval_seconds,
            RetryPolicy::default(),
        )?);

        let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);

        Ok(Self {
            config,
            manager,
            shutdown_tx,
            loop_handles: Vec::new(),
        })
    }

    /// Starts the periodic loops and serves the REST API until shutdown.
    pub async fn run(&mut self) -> Result<()> {
        info!(
            listen_address = %self.config.listen_address,
            workers = self.config.workers.len(),
            scheduler = ?self.config.scheduler,
            "Manager configuration loaded"
        );

        self.spawn_dispatch_loop();
        self.spawn_update_loop();
        self.spawn_health_loop();

        let state = api::AppState {
            manager: Arc::clone(&self.manager),
        };
        let app = api::create_router(state);

        let listen_addr = self.config.listen_addr()?;
        info!("Starting HTTP server on {}", listen_addr);
        let listener = tokio::net::TcpListener::bind(listen_addr)
            .await
            .with_context(|| format!("Failed to bind TCP listener to {}", listen_addr))?;

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await
            .context("HTTP server error")?;

        Ok(())
    }

    fn spawn_dispatch_loop(&mut self) {
        let manager = Arc::clone(&self.manager);
        let interval_secs = self.config.dispatch_interval_seconds;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let handle = tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(interval_secs));
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        info!("Processing any tasks in the queue");
                        manager.send_work().await;
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Dispatch loop received shutdown signal");
                        break;
                    }
                }
            }
        });
        self.loop_handles.push(handle);
    }

    fn spawn_update_loop(&mut self) {
        let manager = Arc::clone(&self.manager);
        let interval_secs = self.config.update_interval_seconds;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let handle = tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(interval_secs));
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        info!("Checking for task updates from workers");
                        manager.update_tasks().await;
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Update loop received shutdown signal");
                        break;
                    }
                }
            }
        });
        self.loop_handles.push(handle);
    }

    fn spawn_health_loop(&mut self) {
        let manager = Arc::clone(&self.manager);
        let interval_secs = self.config.health_check_interval_seconds;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let handle = tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(interval_secs));
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        info!("Performing task health checks");
                        manager.do_health_checks().await;
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Health-check loop received shutdown signal");
                        break;
                    }
                }
            }
        });
        self.loop_handles.push(handle);
    }

    /// Signals every loop to stop and waits for them to finish.
    pub async fn shutdown(&mut self) {
        info!("Shutting down manager");
        let _ = self.shutdown_tx.send(());
        for handle in self.loop_handles.drain(..) {
            let _ = handle.await;
        }
        info!("Manager shutdown complete");
    }
}

#[allow(clippy::type_complexity)]
fn build_stores(
    config: &ManagerConfig,
) -> Result<(Box<dyn Store<Task>>, Box<dyn Store<TaskEvent>>)> {
    match config.store {
        StoreBackend::Memory => Ok((
            Box::new(MemoryStore::new()),
            Box::new(MemoryStore::new()),
        )),
        StoreBackend::Sqlite => {
            let data_dir = PathBuf::from(&config.data_dir);
            std::fs::create_dir_all(&data_dir).with_context(|| {
                format!("Failed to create data directory {}", data_dir.display())
            })?;

            let task_store: SqliteStore<Task> = SqliteStore::open(
                &data_dir.join("manager_tasks.db"),
                "tasks",
                config.database_busy_timeout_seconds,
            )?;
            let event_store: SqliteStore<TaskEvent> = SqliteStore::open(
                &data_dir.join("manager_events.db"),
                "events",
                config.database_busy_timeout_seconds,
            )?;
            Ok((Box::new(task_store), Box::new(event_store)))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // `tracing_subscriber` is used to configure how logs are processed and
    // displayed. The filter can be overridden with the RUST_LOG variable.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("manager=info,shared=info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let cli_args = CliArgs::parse();

    let mut config = ManagerConfig::load(&cli_args.config_file).map_err(|e| {
        error!("Failed to load manager configuration: {}", e);
        e
    })?;

    // Apply command-line overrides if provided
    if let Some(listen_address) = cli_args.listen_address {
        info!("Listen address override provided via command line");
        config.listen_address = listen_address;
    }
    if !cli_args.workers.is_empty() {
        info!("Worker list override provided via command line");
        config.workers = cli_args.workers;
    }
    config.validate()?;

    let mut service = ManagerService::new(config)?;

    // Set up signal handling for graceful shutdown.
    let shutdown_signal = async {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm =
                signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
            let mut sigint =
                signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM");
                },
                _ = sigint.recv() => {
                    info!("Received SIGINT");
                },
            }
        }

        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to install Ctrl+C handler");
            info!("Received Ctrl+C");
        }
    };

    tokio::select! {
        result = service.run() => {
            if let Err(e) = result {
                error!("Manager error: {}", e);
                service.shutdown().await;
                std::process::exit(1);
            }
        }
        _ = shutdown_signal => {
            info!("Shutdown signal received");
        }
    }

    service.shutdown().await;
    Ok(())
}
