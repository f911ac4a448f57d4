//! Orchestration Worker
//!
//! The worker is the data-plane process: it accepts task events over HTTP,
//! serializes container lifecycle operations through a single run loop,
//! reconciles its records against the local container runtime, and publishes
//! host stats for the manager's scheduler.

// Use jemalloc as the global allocator for better performance
#[cfg(not(target_os = "windows"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use anyhow::{Context, Result};
use clap::Parser;
use shared::config::{StoreBackend, WorkerConfig};
use shared::store::{MemoryStore, SqliteStore, Store};
use shared::task::Task;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};

mod api;
mod runtime;
mod stats;
mod worker;

use runtime::DockerCli;
use worker::Worker;

#[cfg(test)]
mod tests;

/// Command-line arguments for the worker
#[derive(Parser, Debug)]
#[command(name = "worker")]
#[command(about = "Worker that runs containers and reports their state", long_about = None)]
struct CliArgs {
    /// Path to the worker configuration file (worker.toml)
    #[arg(value_name = "CONFIG_FILE")]
    config_file: PathBuf,

    /// Override the worker name from config file
    #[arg(long = "name", value_name = "NAME")]
    name: Option<String>,

    /// Override the listen address from config file
    #[arg(long = "listen-address", value_name = "ADDRESS")]
    listen_address: Option<String>,
}

/// The main application structure for the worker process. It owns the shared
/// worker state and the handles of the periodic loops.
pub struct WorkerService {
    config: WorkerConfig,
    worker: Arc<Worker>,
    shutdown_tx: tokio::sync::broadcast::Sender<()>,
    loop_handles: Vec<JoinHandle<()>>,
}

impl WorkerService {
    /// Creates the worker from its configuration: store backend, runtime
    /// driver and shared state.
    pub fn new(config: WorkerConfig) -> Result<Self> {
        let db = build_store(&config)?;
        let runtime = Arc::new(DockerCli::new(config.docker_binary.clone()));
        let worker = Arc::new(Worker::new(config.name.clone(), db, runtime));
        let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);

        Ok(Self {
            config,
            worker,
            shutdown_tx,
            loop_handles: Vec::new(),
        })
    }

    /// Starts the periodic loops and serves the REST API until shutdown.
    pub async fn run(&mut self) -> Result<()> {
        info!(
            name = %self.config.name,
            listen_address = %self.config.listen_address,
            "Worker configuration loaded"
        );

        self.spawn_run_loop();
        self.spawn_reconcile_loop();
        self.spawn_stats_loop();

        let state = api::AppState {
            worker: Arc::clone(&self.worker),
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

    /// The run loop drains the intake queue on a fixed cadence. It is the
    /// only consumer of the queue.
    fn spawn_run_loop(&mut self) {
        let worker = Arc::clone(&self.worker);
        let interval_secs = self.config.run_interval_seconds;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let handle = tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(interval_secs));
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        worker.run_pending().await;
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Run loop received shutdown signal");
                        break;
                    }
                }
            }
        });
        self.loop_handles.push(handle);
    }

    fn spawn_reconcile_loop(&mut self) {
        let worker = Arc::clone(&self.worker);
        let interval_secs = self.config.update_interval_seconds;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let handle = tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(interval_secs));
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        info!("Checking status of tasks");
                        worker.update_tasks().await;
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Reconcile loop received shutdown signal");
                        break;
                    }
                }
            }
        });
        self.loop_handles.push(handle);
    }

    fn spawn_stats_loop(&mut self) {
        let worker = Arc::clone(&self.worker);
        let interval_secs = self.config.stats_interval_seconds;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let handle = tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(interval_secs));
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        worker.collect_stats().await;
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Stats loop received shutdown signal");
                        break;
                    }
                }
            }
        });
        self.loop_handles.push(handle);
    }

    /// Signals every loop to stop and waits for them to finish.
    pub async fn shutdown(&mut self) {
        info!("Shutting down worker");
        let _ = self.shutdown_tx.send(());
        for handle in self.loop_handles.drain(..) {
            let _ = handle.await;
        }
        info!("Worker shutdown complete");
    }
}

fn build_store(config: &WorkerConfig) -> Result<Box<dyn Store<Task>>> {
    match config.store {
        StoreBackend::Memory => Ok(Box::new(MemoryStore::new())),
        StoreBackend::Sqlite => {
            let data_dir = PathBuf::from(&config.data_dir);
            std::fs::create_dir_all(&data_dir).with_context(|| {
                format!("Failed to create data directory {}", data_dir.display())
            })?;
            let store: SqliteStore<Task> = SqliteStore::open(
                &data_dir.join("worker_tasks.db"),
                "tasks",
                config.database_busy_timeout_seconds,
            )?;
            Ok(Box::new(store))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // `tracing_subscriber` is used to configure how logs are processed and
    // displayed. The filter can be overridden with the RUST_LOG variable.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("worker=info,shared=info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let cli_args = CliArgs::parse();

    let mut config = WorkerConfig::load(&cli_args.config_file).map_err(|e| {
        error!("Failed to load worker configuration: {}", e);
        e
    })?;

    // Apply command-line overrides if provided
    if let Some(name) = cli_args.name {
        info!("Worker name override provided via command line");
        config.name = name;
    }
    if let Some(listen_address) = cli_args.listen_address {
        info!("Listen address override provided via command line");
        config.listen_address = listen_address;
    }
    config.validate()?;

    let mut service = WorkerService::new(config)?;

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
                error!("Worker error: {}", e);
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
