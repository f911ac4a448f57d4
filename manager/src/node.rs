//! Node: the manager's cached view of a worker
//!
//! A node is created from the static worker list at startup with empty
//! capacity fields; totals and the latest stats sample are filled lazily
//! whenever the scheduler or health path fetches stats. Fetches retry with
//! exponential backoff because workers restart independently of the
//! manager.

use anyhow::{Context, Result};
use shared::api::{cpu_usage_url, stats_url, worker_base_url, CpuUsageResponse};
use shared::defaults::{
    default_retry_base_delay_ms, default_retry_max_delay_ms, default_stats_retry_attempts,
};
use shared::stats::SystemSample;
use shared::utils::calculate_backoff_delay;
use tracing::{debug, warn};

/// Retry behavior for stats and CPU-usage fetches.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: default_stats_retry_attempts(),
            base_delay_ms: default_retry_base_delay_ms(),
            max_delay_ms: default_retry_max_delay_ms(),
        }
    }
}

/// A logical worker as the manager sees it.
#[derive(Debug, Clone)]
pub struct Node {
    /// Worker address (`host:port`), doubling as the node name.
    pub name: String,
    /// API base URL derived from the name.
    pub api: String,
    /// Total memory in bytes, filled from the last stats sample.
    pub memory: i64,
    /// Memory reserved by the manager's own placements, in bytes.
    pub memory_allocated: i64,
    /// Total disk in bytes, filled from the last stats sample.
    pub disk: i64,
    /// Disk reserved by the manager's own placements, in bytes.
    pub disk_allocated: i64,
    /// Last stats sample fetched from the worker.
    pub stats: Option<SystemSample>,
    /// Last CPU usage fraction fetched from the worker.
    pub cpu_usage: f64,
    /// Task count as last reported by the worker.
    pub task_count: i64,
}

impl Node {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let api = worker_base_url(&name);
        Self {
            name,
            api,
            memory: 0,
            memory_allocated: 0,
            disk: 0,
            disk_allocated: 0,
            stats: None,
            cpu_usage: 0.0,
            task_count: 0,
        }
    }

    /// Fetches the worker's stats snapshot, updating the cached memory and
    /// disk totals and the task count. Fails when the sample is
    /// structurally incomplete (missing memory or disk sub-records).
    pub async fn get_stats(
        &mut self,
        client: &reqwest::Client,
        retry: RetryPolicy,
    ) -> Result<SystemSample> {
        let url = stats_url(&self.api);
        let response = get_with_retry(client, &url, retry)
            .await
            .with_context(|| format!("Unable to connect to {}", self.api))?;

        let sample: SystemSample = response
            .json()
            .await
            .with_context(|| format!("Error decoding stats from node {}", self.name))?;

        if !sample.is_complete() {
            anyhow::bail!("Incomplete stats sample from node {}", self.name);
        }

        self.memory = sample.mem_total() as i64;
        self.disk = sample.disk_total() as i64;
        self.task_count = sample.task_count as i64;
        self.stats = Some(sample.clone());

        Ok(sample)
    }

    /// Fetches the worker's pre-computed CPU usage fraction over
    /// `interval_seconds` and caches it.
    pub async fn get_cpu_usage(
        &mut self,
        client: &reqwest::Client,
        interval_seconds: u64,
        retry: RetryPolicy,
    ) -> Result<f64> {
        let url = cpu_usage_url(&self.api, interval_seconds);
        let response = get_with_retry(client, &url, retry)
            .await
            .with_context(|| format!("Unable to connect to {}", self.api))?;

        let usage: CpuUsageResponse = response
            .json()
            .await
            .with_context(|| format!("Error decoding CPU usage from node {}", self.name))?;

        self.cpu_usage = usage.percentage;
        Ok(usage.percentage)
    }

    /// Free disk after subtracting the manager's own reservations.
    pub fn disk_free(&self) -> i64 {
        self.disk - self.disk_allocated
    }
}

async fn get_with_retry(
    client: &reqwest::Client,
    url: &str,
    retry: RetryPolicy,
) -> Result<reqwest::Response> {
    let mut last_error = None;

    for attempt in 0..retry.attempts.max(1) {
        if attempt > 0 {
            let delay = calculate_backoff_delay(attempt - 1, retry.base_delay_ms, retry.max_delay_ms);
            debug!(url, attempt, delay_ms = delay, "Retrying fetch");
            tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
        }

        match client.get(url).send().await {
            Ok(response) if response.status().is_success() => return Ok(response),
            Ok(response) => {
                warn!(url, status = %response.status(), "Fetch returned non-success status");
                last_error = Some(anyhow::anyhow!(
                    "GET {} returned status {}",
                    url,
                    response.status()
                ));
            }
            Err(e) => {
                warn!(url, error = %e, "Fetch failed");
                last_error = Some(e.into());
            }
        }
    }

    Err(last_error.unwrap_or_else(|| anyhow::anyhow!("GET {} failed", url)))
}
