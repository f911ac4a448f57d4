//! Wire types and endpoint paths for manager/worker communication
//!
//! Both HTTP surfaces speak JSON. Task and event payloads live in
//! [`crate::task`]; this module holds the remaining envelope types and the
//! endpoint constants shared by the two routers and the manager's client
//! code.

use serde::{Deserialize, Serialize};

/// Error body returned by both HTTP surfaces on request failures.
///
/// Field names follow the reference wire contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrResponse {
    #[serde(rename = "HttpStatusCode")]
    pub http_status_code: u16,
    #[serde(rename = "Message")]
    pub message: String,
}

impl ErrResponse {
    pub fn new(http_status_code: u16, message: impl Into<String>) -> Self {
        Self {
            http_status_code,
            message: message.into(),
        }
    }
}

/// Body of `GET /stats/cpu-usage/{interval}`.
///
/// `Percentage` carries the usage fraction (0.0 - 1.0) over the sampled
/// interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CpuUsageResponse {
    #[serde(rename = "Percentage")]
    pub percentage: f64,
}

/// API endpoint paths.
pub mod endpoints {
    pub const TASKS: &str = "/tasks";
    pub const STATS: &str = "/stats";
    pub const CPU_USAGE: &str = "/stats/cpu-usage";
}

/// Base URL for a worker's API given its `host:port` address.
pub fn worker_base_url(addr: &str) -> String {
    format!("http://{}", addr)
}

/// URL of a worker's task collection.
pub fn tasks_url(base: &str) -> String {
    format!("{}{}", base, endpoints::TASKS)
}

/// URL of a single task on a worker.
pub fn task_url(base: &str, task_id: &uuid::Uuid) -> String {
    format!("{}{}/{}", base, endpoints::TASKS, task_id)
}

/// URL of a worker's stats snapshot.
pub fn stats_url(base: &str) -> String {
    format!("{}{}", base, endpoints::STATS)
}

/// URL of a worker's CPU-usage endpoint for the given sampling interval.
pub fn cpu_usage_url(base: &str, interval_seconds: u64) -> String {
    format!("{}{}/{}", base, endpoints::CPU_USAGE, interval_seconds)
}
