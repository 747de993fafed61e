//! Host and process statistics
//!
//! [`StatsCollector::sample`] rebuilds the whole [`RuntimeStats`] structure
//! and swaps it in under a write lock; [`StatsCollector::snapshot`] clones it
//! under a read lock. A reader therefore always sees one complete sample.

use parking_lot::{Mutex, RwLock};
use pulse_core::Metric;
use rand::Rng;
use sysinfo::{Pid, System};
use tracing::{debug, warn};

/// Id of the per-sample counter
pub const POLL_COUNT: &str = "PollCount";

/// Source of statistics for the scheduler
pub trait StatsSource: Send + Sync {
    /// Refresh the internal snapshot
    fn sample(&self);

    /// Current snapshot as a metric batch
    fn snapshot(&self) -> Vec<Metric>;
}

/// One complete statistics sample
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuntimeStats {
    pub process_resident_memory: f64,
    pub process_virtual_memory: f64,
    pub process_cpu_usage: f64,
    pub total_memory: f64,
    pub free_memory: f64,
    pub used_memory: f64,
    pub available_memory: f64,
    pub total_swap: f64,
    pub used_swap: f64,
    pub cpu_usage: f64,
    pub cpu_utilization: Vec<f64>,
    pub random_value: f64,
}

impl RuntimeStats {
    /// Every statistic as a gauge
    pub fn to_metrics(&self) -> Vec<Metric> {
        let mut metrics = vec![
            Metric::gauge("ProcessResidentMemory", self.process_resident_memory),
            Metric::gauge("ProcessVirtualMemory", self.process_virtual_memory),
            Metric::gauge("ProcessCPUUsage", self.process_cpu_usage),
            Metric::gauge("TotalMemory", self.total_memory),
            Metric::gauge("FreeMemory", self.free_memory),
            Metric::gauge("UsedMemory", self.used_memory),
            Metric::gauge("AvailableMemory", self.available_memory),
            Metric::gauge("TotalSwap", self.total_swap),
            Metric::gauge("UsedSwap", self.used_swap),
            Metric::gauge("CPUUsage", self.cpu_usage),
            Metric::gauge("RandomValue", self.random_value),
        ];

        // CPUutilization1, CPUutilization2, ...
        metrics.extend(
            self.cpu_utilization
                .iter()
                .enumerate()
                .map(|(i, usage)| Metric::gauge(format!("CPUutilization{}", i + 1), *usage)),
        );

        metrics
    }
}

/// Samples statistics through sysinfo
pub struct StatsCollector {
    system: Mutex<System>,
    pid: Option<Pid>,
    stats: RwLock<RuntimeStats>,
}

impl StatsCollector {
    pub fn new() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                warn!(error = %e, "Process statistics unavailable");
                None
            }
        };

        Self {
            system: Mutex::new(System::new()),
            pid,
            stats: RwLock::new(RuntimeStats::default()),
        }
    }

    fn read_stats(&self) -> RuntimeStats {
        let mut system = self.system.lock();
        system.refresh_memory();
        system.refresh_cpu();

        let mut stats = RuntimeStats {
            total_memory: system.total_memory() as f64,
            free_memory: system.free_memory() as f64,
            used_memory: system.used_memory() as f64,
            available_memory: system.available_memory() as f64,
            total_swap: system.total_swap() as f64,
            used_swap: system.used_swap() as f64,
            cpu_usage: system.global_cpu_info().cpu_usage() as f64,
            cpu_utilization: system
                .cpus()
                .iter()
                .map(|cpu| cpu.cpu_usage() as f64)
                .collect(),
            random_value: rand::thread_rng().gen_range(1.0..100.0),
            ..Default::default()
        };

        if let Some(pid) = self.pid {
            if system.refresh_process(pid) {
                if let Some(process) = system.process(pid) {
                    stats.process_resident_memory = process.memory() as f64;
                    stats.process_virtual_memory = process.virtual_memory() as f64;
                    stats.process_cpu_usage = process.cpu_usage() as f64;
                }
            }
        }

        stats
    }

    /// Latest complete sample
    pub fn stats(&self) -> RuntimeStats {
        self.stats.read().clone()
    }
}

impl Default for StatsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsSource for StatsCollector {
    fn sample(&self) {
        let stats = self.read_stats();
        debug!(cpus = stats.cpu_utilization.len(), "Statistics sampled");
        *self.stats.write() = stats;
    }

    fn snapshot(&self) -> Vec<Metric> {
        self.stats().to_metrics()
    }
}
