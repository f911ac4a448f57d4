//! Host statistics sample types
//!
//! A worker periodically snapshots its host's memory, disk, CPU time and
//! load figures and publishes them over HTTP; the manager's node handles
//! decode the same structure when scoring placements. The sub-records are
//! optional because a collector may fail partially; consumers that need a
//! complete sample (the scheduler path) must check for the pieces they use.

use serde::{Deserialize, Serialize};

/// Virtual memory figures, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub total: u64,
    pub available: u64,
    pub used: u64,
    pub used_percent: f64,
}

/// Root filesystem usage, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DiskStats {
    pub total: u64,
    pub free: u64,
    pub used: u64,
}

/// Cumulative CPU time accumulators in seconds, aggregated across cores.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CpuTimes {
    pub user: f64,
    pub nice: f64,
    pub system: f64,
    pub idle: f64,
    pub iowait: f64,
    pub irq: f64,
    pub softirq: f64,
    pub steal: f64,
}

impl CpuTimes {
    /// Idle time including iowait.
    pub fn idle_total(&self) -> f64 {
        self.idle + self.iowait
    }

    /// Busy time across all non-idle accumulators.
    pub fn non_idle_total(&self) -> f64 {
        self.user + self.nice + self.system + self.irq + self.softirq + self.steal
    }

    /// Usage fraction represented by a single accumulator snapshot.
    pub fn usage(&self) -> f64 {
        let idle = self.idle_total();
        let total = idle + self.non_idle_total();
        if total == 0.0 {
            return 0.0;
        }
        (total - idle) / total
    }

    /// Usage fraction over the interval between two snapshots, computed by
    /// differencing the idle and non-idle accumulators. Defined as `0.0`
    /// when both deltas are zero.
    pub fn usage_between(earlier: &CpuTimes, later: &CpuTimes) -> f64 {
        let idle_delta = later.idle_total() - earlier.idle_total();
        let non_idle_delta = later.non_idle_total() - earlier.non_idle_total();
        let total = idle_delta + non_idle_delta;
        if total == 0.0 {
            return 0.0;
        }
        non_idle_delta / total
    }
}

/// System load averages.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LoadAvg {
    pub one: f64,
    pub five: f64,
    pub fifteen: f64,
}

/// A worker's published stats snapshot.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct SystemSample {
    pub mem_stats: Option<MemoryStats>,
    pub disk_stats: Option<DiskStats>,
    pub cpu_stats: Option<CpuTimes>,
    pub load_stats: Option<LoadAvg>,
    pub task_count: usize,
}

impl SystemSample {
    pub fn mem_total(&self) -> u64 {
        self.mem_stats.map(|m| m.total).unwrap_or(0)
    }

    pub fn mem_used(&self) -> u64 {
        self.mem_stats.map(|m| m.used).unwrap_or(0)
    }

    pub fn disk_total(&self) -> u64 {
        self.disk_stats.map(|d| d.total).unwrap_or(0)
    }

    pub fn cpu_usage(&self) -> f64 {
        self.cpu_stats.map(|c| c.usage()).unwrap_or(0.0)
    }

    /// True when the memory and disk sub-records are both present. The
    /// scheduler path refuses samples that fail this check.
    pub fn is_complete(&self) -> bool {
        self.mem_stats.is_some() && self.disk_stats.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_between_zero_deltas() {
        let sample = CpuTimes::default();
        assert_eq!(CpuTimes::usage_between(&sample, &sample), 0.0);
    }

    #[test]
    fn test_usage_between_differences_accumulators() {
        let earlier = CpuTimes {
            user: 100.0,
            idle: 300.0,
            ..CpuTimes::default()
        };
        let later = CpuTimes {
            user: 130.0,
            idle: 370.0,
            ..CpuTimes::default()
        };
        // 30s busy out of 100s elapsed.
        let usage = CpuTimes::usage_between(&earlier, &later);
        assert!((usage - 0.3).abs() < 1e-9);
    }
}
