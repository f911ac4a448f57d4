//! Tests for configuration loading and validation

use crate::config::{ManagerConfig, SchedulerPolicy, StoreBackend, WorkerConfig};
use std::io::Write;
use tempfile::NamedTempFile;

#[test]
fn test_manager_config_defaults() {
    let config: ManagerConfig = toml::from_str(
        r#"
listen_address = "127.0.0.1:5555"
workers = ["localhost:5556"]
"#,
    )
    .unwrap();

    config.validate().unwrap();
    assert_eq!(config.scheduler, SchedulerPolicy::Epvm);
    assert_eq!(config.store, StoreBackend::Memory);
    assert_eq!(config.dispatch_interval_seconds, 10);
    assert_eq!(config.update_interval_seconds, 15);
    assert_eq!(config.health_check_interval_seconds, 35);
    assert_eq!(config.restart_limit, 3);
}

#[test]
fn test_manager_config_load_from_file() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
listen_address = "127.0.0.1:5555"
workers = ["localhost:5556", "localhost:5557"]
scheduler = "roundrobin"
store = "sqlite"
"#
    )
    .unwrap();

    let config = ManagerConfig::load(file.path()).unwrap();
    assert_eq!(config.workers.len(), 2);
    assert_eq!(config.scheduler, SchedulerPolicy::RoundRobin);
    assert_eq!(config.store, StoreBackend::Sqlite);
}

#[test]
fn test_manager_config_requires_workers() {
    let config: ManagerConfig = toml::from_str(
        r#"
listen_address = "127.0.0.1:5555"
workers = []
"#,
    )
    .unwrap();
    assert!(config.validate().is_err());
}

#[test]
fn test_manager_config_rejects_bad_worker_address() {
    let config: ManagerConfig = toml::from_str(
        r#"
listen_address = "127.0.0.1:5555"
workers = ["no-port-here"]
"#,
    )
    .unwrap();
    assert!(config.validate().is_err());
}

#[test]
fn test_manager_config_rejects_bad_listen_address() {
    let config: ManagerConfig = toml::from_str(
        r#"
listen_address = "not an address"
workers = ["localhost:5556"]
"#,
    )
    .unwrap();
    assert!(config.validate().is_err());
}

#[test]
fn test_worker_config_defaults() {
    let config: WorkerConfig = toml::from_str(
        r#"
name = "worker-1"
listen_address = "127.0.0.1:5556"
"#,
    )
    .unwrap();

    config.validate().unwrap();
    assert_eq!(config.run_interval_seconds, 10);
    assert_eq!(config.stats_interval_seconds, 15);
    assert_eq!(config.docker_binary, "docker");
    assert_eq!(config.store, StoreBackend::Memory);
}

#[test]
fn test_worker_config_requires_name() {
    let config: WorkerConfig = toml::from_str(
        r#"
name = ""
listen_address = "127.0.0.1:5556"
"#,
    )
    .unwrap();
    assert!(config.validate().is_err());
}
