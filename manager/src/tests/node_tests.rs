//! Tests for the node handle's stats fetching

use crate::node::{Node, RetryPolicy};
use crate::tests::support::{complete_sample, spawn_stub_worker};

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        attempts: 1,
        base_delay_ms: 10,
        max_delay_ms: 10,
    }
}

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(2))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_get_stats_fills_capacity_from_sample() {
    let stub = spawn_stub_worker().await;
    *stub.state.sample.lock().unwrap() = complete_sample(16_000, 4_000, 500_000, 7);

    let mut node = Node::new(stub.addr.clone());
    let sample = node.get_stats(&client(), fast_retry()).await.unwrap();

    assert_eq!(sample.mem_total(), 16_000);
    assert_eq!(node.memory, 16_000);
    assert_eq!(node.disk, 500_000);
    assert_eq!(node.task_count, 7);
    assert!(node.stats.is_some());
}

#[tokio::test]
async fn test_get_stats_rejects_incomplete_sample() {
    let stub = spawn_stub_worker().await;
    // Memory present, disk missing: structurally incomplete.
    let mut partial = complete_sample(16_000, 4_000, 500_000, 0);
    partial.disk_stats = None;
    *stub.state.sample.lock().unwrap() = partial;

    let mut node = Node::new(stub.addr.clone());
    let result = node.get_stats(&client(), fast_retry()).await;

    assert!(result.is_err());
    assert!(node.stats.is_none());
    assert_eq!(node.memory, 0);
}

#[tokio::test]
async fn test_get_stats_unreachable_worker_errors() {
    let mut node = Node::new("127.0.0.1:1");
    assert!(node.get_stats(&client(), fast_retry()).await.is_err());
}

#[tokio::test]
async fn test_get_cpu_usage_caches_fraction() {
    let stub = spawn_stub_worker().await;
    let mut node = Node::new(stub.addr.clone());

    let usage = node.get_cpu_usage(&client(), 0, fast_retry()).await.unwrap();
    assert_eq!(usage, 0.1);
    assert_eq!(node.cpu_usage, 0.1);
}

#[tokio::test]
async fn test_disk_free_subtracts_reservations() {
    let mut node = Node::new("localhost:5556");
    node.disk = 1_000;
    node.disk_allocated = 300;
    assert_eq!(node.disk_free(), 700);

    // A node that has never been sampled advertises no usable disk.
    let unsampled = Node::new("localhost:5557");
    assert_eq!(unsampled.disk_free(), 0);
}
