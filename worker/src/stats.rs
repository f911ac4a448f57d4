//! Host statistics collection
//!
//! Builds the [`SystemSample`] snapshot the worker publishes over HTTP:
//! memory and disk figures from sysinfo, CPU time accumulators and load
//! average from /proc. Collection failures degrade to missing sub-records
//! rather than errors; the manager side decides whether a partial sample is
//! usable.

use procfs::{Current, CurrentSI};
use shared::stats::{CpuTimes, DiskStats, LoadAvg, MemoryStats, SystemSample};
use tracing::warn;

/// Collects a full snapshot, embedding the worker's current task count.
pub fn collect(task_count: usize) -> SystemSample {
    SystemSample {
        mem_stats: collect_memory(),
        disk_stats: collect_disk(),
        cpu_stats: collect_cpu_times(),
        load_stats: collect_load(),
        task_count,
    }
}

fn collect_memory() -> Option<MemoryStats> {
    let mut system = sysinfo::System::new();
    system.refresh_memory();

    let total = system.total_memory();
    if total == 0 {
        warn!("Host reported zero total memory, dropping memory sample");
        return None;
    }
    let used = system.used_memory();

    Some(MemoryStats {
        total,
        available: system.available_memory(),
        used,
        used_percent: used as f64 / total as f64 * 100.0,
    })
}

fn collect_disk() -> Option<DiskStats> {
    let disks = sysinfo::Disks::new_with_refreshed_list();

    // Prefer the root filesystem; fall back to the first listed disk.
    let disk = disks
        .iter()
        .find(|d| d.mount_point() == std::path::Path::new("/"))
        .or_else(|| disks.iter().next())?;

    let total = disk.total_space();
    let free = disk.available_space();
    Some(DiskStats {
        total,
        free,
        used: total.saturating_sub(free),
    })
}

fn collect_cpu_times() -> Option<CpuTimes> {
    let stat = match procfs::KernelStats::current() {
        Ok(stat) => stat,
        Err(e) => {
            warn!("Failed to read /proc/stat: {}", e);
            return None;
        }
    };

    let total = stat.total;
    let to_secs = |ms: u64| ms as f64 / 1000.0;

    Some(CpuTimes {
        user: to_secs(total.user_ms()),
        nice: to_secs(total.nice_ms()),
        system: to_secs(total.system_ms()),
        idle: to_secs(total.idle_ms()),
        iowait: to_secs(total.iowait_ms().unwrap_or(0)),
        irq: to_secs(total.irq_ms().unwrap_or(0)),
        softirq: to_secs(total.softirq_ms().unwrap_or(0)),
        steal: to_secs(total.steal_ms().unwrap_or(0)),
    })
}

fn collect_load() -> Option<LoadAvg> {
    match procfs::LoadAverage::current() {
        Ok(load) => Some(LoadAvg {
            one: load.one as f64,
            five: load.five as f64,
            fifteen: load.fifteen as f64,
        }),
        Err(e) => {
            warn!("Failed to read load average: {}", e);
            None
        }
    }
}

/// CPU usage fraction over `interval_seconds`, computed from two accumulator
/// snapshots. Returns 0.0 when sampling fails or nothing changed between
/// the snapshots.
pub async fn cpu_usage_fraction(interval_seconds: u64) -> f64 {
    let Some(earlier) = collect_cpu_times() else {
        return 0.0;
    };
    tokio::time::sleep(std::time::Duration::from_secs(interval_seconds)).await;
    let Some(later) = collect_cpu_times() else {
        return 0.0;
    };
    CpuTimes::usage_between(&earlier, &later)
}
