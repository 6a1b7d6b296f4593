//! Load-aware sizing of the admission limit

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use sysinfo::{Disks, System};
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, info, instrument};

use crate::concurrency::controller::ConcurrencyController;

pub const MIN_CONCURRENCY: usize = 10;
pub const MAX_CONCURRENCY: usize = 300;

const GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Point-in-time view of host resource pressure
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadSnapshot {
    pub cpu_count: usize,
    pub total_mem_gb: f64,
    pub avail_mem_gb: f64,
    pub cpu_usage_percent: f64,
    pub mem_usage_percent: f64,
    pub disk_usage_percent: f64,
}

impl LoadSnapshot {
    /// Read the current host metrics. CPU usage is only meaningful from the second
    /// refresh of the same `System` onward.
    pub fn capture(sys: &mut System) -> Self {
        sys.refresh_cpu();
        sys.refresh_memory();

        let cpus = sys.cpus();
        let cpu_usage_percent = if cpus.is_empty() {
            0.0
        } else {
            cpus.iter().map(|cpu| cpu.cpu_usage() as f64).sum::<f64>() / cpus.len() as f64
        };

        let total_memory = sys.total_memory();
        let available_memory = sys.available_memory();
        let mem_usage_percent = if total_memory > 0 {
            (total_memory.saturating_sub(available_memory) as f64 / total_memory as f64) * 100.0
        } else {
            0.0
        };

        let disks = Disks::new_with_refreshed_list();
        let (disk_total, disk_avail) = disks.list().iter().fold((0u64, 0u64), |(t, a), disk| {
            (t + disk.total_space(), a + disk.available_space())
        });
        let disk_usage_percent = if disk_total > 0 {
            (disk_total.saturating_sub(disk_avail) as f64 / disk_total as f64) * 100.0
        } else {
            0.0
        };

        Self {
            cpu_count: cpus.len().max(1),
            total_mem_gb: total_memory as f64 / GB,
            avail_mem_gb: available_memory as f64 / GB,
            cpu_usage_percent,
            mem_usage_percent,
            disk_usage_percent,
        }
    }

    pub fn is_high_load(&self) -> bool {
        self.cpu_usage_percent > 80.0
            || self.mem_usage_percent > 85.0
            || self.disk_usage_percent > 90.0
            || self.avail_mem_gb < 1.0
    }

    pub fn is_low_load(&self) -> bool {
        self.cpu_usage_percent < 50.0 && self.mem_usage_percent < 60.0
    }
}

/// Starting concurrency for a host of the given shape
pub fn optimal_concurrency(
    cpu_count: usize,
    total_mem_gb: f64,
    avail_mem_gb: f64,
    cpu_usage_percent: f64,
) -> usize {
    let base = (cpu_count * 4) as f64;

    let memory_cap = if total_mem_gb < 4.0 {
        30.0
    } else if total_mem_gb < 8.0 {
        60.0
    } else if total_mem_gb < 16.0 {
        120.0
    } else {
        250.0
    };

    let memory_factor = if total_mem_gb > 0.0 {
        (avail_mem_gb / (total_mem_gb * 0.4)).min(1.0)
    } else {
        0.0
    };

    let cpu_factor = if cpu_usage_percent > 80.0 {
        0.6
    } else if cpu_usage_percent > 60.0 {
        0.8
    } else {
        1.0
    };

    let sized = (base.min(memory_cap) * memory_factor * cpu_factor) as usize;
    sized.clamp(MIN_CONCURRENCY, MAX_CONCURRENCY)
}

/// Next concurrency level given the current one and fresh load numbers
pub fn adjust(current: usize, load: &LoadSnapshot) -> usize {
    if load.is_high_load() {
        ((current as f64 * 0.7) as usize).max(MIN_CONCURRENCY)
    } else if load.is_low_load() {
        ((current as f64 * 1.2) as usize).min(MAX_CONCURRENCY)
    } else {
        current
    }
}

/// Adaptive concurrency configuration
#[derive(Clone)]
pub struct AdaptiveConfig {
    /// How often to re-evaluate host load
    pub adjust_interval: Duration,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            adjust_interval: Duration::from_secs(10),
        }
    }
}

/// Background task resizing a [`ConcurrencyController`] under host pressure
pub struct AdaptiveConcurrency {
    controller: Arc<ConcurrencyController>,
    config: AdaptiveConfig,
    system: Mutex<System>,
}

impl AdaptiveConcurrency {
    pub fn new(controller: Arc<ConcurrencyController>, config: AdaptiveConfig) -> Self {
        Self {
            controller,
            config,
            system: Mutex::new(System::new()),
        }
    }

    /// Current host load
    pub fn snapshot(&self) -> LoadSnapshot {
        LoadSnapshot::capture(&mut self.system.lock())
    }

    /// Initial limit: the configured ceiling, lowered to what the host can sustain
    pub fn initial_limit(&self, configured_max: usize) -> usize {
        let load = self.snapshot();
        let optimal = optimal_concurrency(
            load.cpu_count,
            load.total_mem_gb,
            load.avail_mem_gb,
            load.cpu_usage_percent,
        );
        info!(
            cpus = load.cpu_count,
            total_mem_gb = load.total_mem_gb,
            optimal,
            configured_max,
            "Sized admission limit for host"
        );
        optimal.min(configured_max.max(1))
    }

    /// Run until shutdown (call in a spawned task)
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting adaptive concurrency with {}s interval",
            self.config.adjust_interval.as_secs()
        );

        let mut ticker = interval(self.config.adjust_interval);
        ticker.tick().await; // Skip immediate tick

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let load = self.snapshot();
                    let current = self.controller.limit();
                    let next = adjust(current, &load);
                    debug!(
                        cpu = load.cpu_usage_percent,
                        mem = load.mem_usage_percent,
                        current,
                        next,
                        "Evaluated host load"
                    );
                    if next != current {
                        self.controller.resize(next);
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        debug!("Adaptive concurrency shutting down");
                        break;
                    }
                }
            }
        }
    }
}
