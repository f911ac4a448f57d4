//! Configuration types and validation for the orchestration system
//!
//! This module defines the configuration structures loaded from
//! `manager.toml` and `worker.toml`, including validation logic. All
//! optional tunables have defaults centralized in [`crate::defaults`].

use crate::defaults::*;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;

/// Which store implementation a process persists its records in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    /// Ephemeral in-memory map; contents are lost on restart.
    #[default]
    Memory,
    /// Durable SQLite database under the configured data directory.
    Sqlite,
}

/// Placement policy used by the manager's dispatch path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerPolicy {
    /// Rotate placements across workers in list order.
    RoundRobin,
    /// E-PVM marginal-cost scoring; lowest cost wins.
    #[default]
    Epvm,
}

/// Main manager configuration loaded from manager.toml
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ManagerConfig {
    /// Address and port the REST API listens on
    pub listen_address: String,
    /// Static worker list, as `host:port` addresses
    pub workers: Vec<String>,
    /// Placement policy (default: epvm)
    #[serde(default)]
    pub scheduler: SchedulerPolicy,
    /// Store backend for task and event records (default: memory)
    #[serde(default)]
    pub store: StoreBackend,
    /// Directory holding sqlite databases when the store is persistent
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Seconds between dispatch loop iterations (default: 10)
    #[serde(default = "default_dispatch_interval")]
    pub dispatch_interval_seconds: u64,
    /// Seconds between reconciliation loop iterations (default: 15)
    #[serde(default = "default_update_interval")]
    pub update_interval_seconds: u64,
    /// Seconds between health-check loop iterations (default: 35)
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval_seconds: u64,
    /// Maximum restart attempts per task (default: 3)
    #[serde(default = "default_restart_limit")]
    pub restart_limit: u32,
    /// Per-request HTTP timeout toward workers in seconds (default: 20)
    #[serde(default = "default_http_timeout")]
    pub http_timeout_seconds: u64,
    /// CPU usage sampling interval used when scoring placements (default: 3)
    #[serde(default = "default_cpu_sample_interval")]
    pub cpu_sample_interval_seconds: u64,
    /// SQLite busy timeout in seconds (default: 5)
    #[serde(default = "default_database_busy_timeout")]
    pub database_busy_timeout_seconds: u64,
}

/// Main worker configuration loaded from worker.toml
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerConfig {
    /// Unique name for this worker
    pub name: String,
    /// Address and port the REST API listens on
    pub listen_address: String,
    /// Store backend for the local task records (default: memory)
    #[serde(default)]
    pub store: StoreBackend,
    /// Directory holding sqlite databases when the store is persistent
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Seconds between run loop iterations (default: 10)
    #[serde(default = "default_run_interval")]
    pub run_interval_seconds: u64,
    /// Seconds between container reconciliation iterations (default: 15)
    #[serde(default = "default_update_interval")]
    pub update_interval_seconds: u64,
    /// Seconds between stats collection iterations (default: 15)
    #[serde(default = "default_stats_interval")]
    pub stats_interval_seconds: u64,
    /// Container runtime binary invoked by the driver (default: docker)
    #[serde(default = "default_docker_binary")]
    pub docker_binary: String,
    /// SQLite busy timeout in seconds (default: 5)
    #[serde(default = "default_database_busy_timeout")]
    pub database_busy_timeout_seconds: u64,
}

fn parse_listen_address(value: &str) -> Result<SocketAddr> {
    value
        .parse()
        .with_context(|| format!("Invalid listen address '{}'", value))
}

impl ManagerConfig {
    /// Loads and validates the configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates field contents beyond what deserialization enforces.
    pub fn validate(&self) -> Result<()> {
        parse_listen_address(&self.listen_address)?;

        if self.workers.is_empty() {
            anyhow::bail!("Manager configuration must list at least one worker");
        }
        for worker in &self.workers {
            if worker.is_empty() || !worker.contains(':') {
                anyhow::bail!("Invalid worker address '{}' (expected host:port)", worker);
            }
        }
        if self.dispatch_interval_seconds == 0
            || self.update_interval_seconds == 0
            || self.health_check_interval_seconds == 0
        {
            anyhow::bail!("Loop intervals must be greater than zero");
        }

        Ok(())
    }

    /// The parsed listen address. `validate` must have succeeded.
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        parse_listen_address(&self.listen_address)
    }
}

impl WorkerConfig {
    /// Loads and validates the configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates field contents beyond what deserialization enforces.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            anyhow::bail!("Worker name cannot be empty");
        }
        parse_listen_address(&self.listen_address)?;
        if self.run_interval_seconds == 0 || self.stats_interval_seconds == 0 {
            anyhow::bail!("Loop intervals must be greater than zero");
        }
        Ok(())
    }

    /// The parsed listen address. `validate` must have succeeded.
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        parse_listen_address(&self.listen_address)
    }
}
