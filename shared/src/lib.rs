//! Shared data structures and utilities for the orchestration system
//!
//! This crate contains the task model and state machine, wire types, store
//! abstraction, host-stats sample types and configuration structures used by
//! both the manager and worker components.

pub mod api;
pub mod config;
pub mod defaults;
pub mod stats;
pub mod store;
pub mod task;
pub mod utils;

// Re-export commonly used types for convenience
pub use api::{CpuUsageResponse, ErrResponse};
pub use config::{ManagerConfig, SchedulerPolicy, StoreBackend, WorkerConfig};
pub use stats::SystemSample;
pub use store::{MemoryStore, SqliteStore, Store};
pub use task::{contains, validate_transition, State, Task, TaskEvent};

/// Result type alias used throughout the shared crate
pub type Result<T> = anyhow::Result<T>;

/// Common error taxonomy for the orchestration system
#[derive(Debug, thiserror::Error)]
pub enum OrchestrationError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Task not found: {0}")]
    NotFound(String),

    #[error("Invalid state transition from {from} to {to}")]
    StateTransition { from: task::State, to: task::State },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("Scheduling error: {0}")]
    Scheduling(String),

    #[error("Store error: {0}")]
    Store(String),
}

#[cfg(test)]
mod tests;
