//! Default values for configuration parameters
//!
//! This module centralizes all default value functions used by the
//! configuration structures. These functions are used by serde when
//! deserializing configuration files that don't specify certain optional
//! fields.

// Manager loop cadence

/// Default dispatch loop interval (10 seconds)
pub fn default_dispatch_interval() -> u64 {
    10
}

/// Default task-update (reconciliation) loop interval (15 seconds)
pub fn default_update_interval() -> u64 {
    15
}

/// Default health-check loop interval (35 seconds)
pub fn default_health_check_interval() -> u64 {
    35
}

/// Default restart budget per task (3 attempts)
pub fn default_restart_limit() -> u32 {
    3
}

/// Default CPU usage sampling interval for placement scoring (3 seconds)
pub fn default_cpu_sample_interval() -> u64 {
    3
}

// Worker loop cadence

/// Default run loop interval (10 seconds)
pub fn default_run_interval() -> u64 {
    10
}

/// Default stats collection interval (15 seconds)
pub fn default_stats_interval() -> u64 {
    15
}

// HTTP client behavior

/// Default per-request HTTP timeout (20 seconds)
pub fn default_http_timeout() -> u64 {
    20
}

/// Default retry attempts for stats and CPU-usage fetches
pub fn default_stats_retry_attempts() -> u32 {
    3
}

/// Default base delay for exponential backoff between retries (500 ms)
pub fn default_retry_base_delay_ms() -> u64 {
    500
}

/// Default ceiling for exponential backoff between retries (5 seconds)
pub fn default_retry_max_delay_ms() -> u64 {
    5000
}

// Persistence

/// Default data directory for sqlite-backed stores
pub fn default_data_dir() -> String {
    "./data".to_string()
}

/// Default SQLite database busy timeout (5 seconds)
pub fn default_database_busy_timeout() -> u64 {
    5
}

// Runtime driver

/// Default container runtime binary
pub fn default_docker_binary() -> String {
    "docker".to_string()
}
