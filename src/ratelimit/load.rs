//! System load sampling for adaptive limits.
//!
//! A background task refreshes the sample; the request path only reads the
//! latest snapshot, it never samples inline.

use arc_swap::ArcSwap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time;

/// Utilisation fractions in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LoadSample {
    pub cpu: f64,
    pub memory: f64,
}

/// Holds the most recent load sample.
#[derive(Debug)]
pub struct LoadMonitor {
    current: ArcSwap<LoadSample>,
}

impl Default for LoadMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadMonitor {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(LoadSample::default()),
        }
    }

    /// Latest sample.
    pub fn current(&self) -> LoadSample {
        **self.current.load()
    }

    /// Replace the sample (used by the sampler and by tests).
    pub fn set(&self, sample: LoadSample) {
        self.current.store(Arc::new(sample));
    }

    /// Sample periodically until shutdown.
    pub async fn run(self: Arc<Self>, interval: Duration, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(interval_secs = interval.as_secs(), "Load monitor starting");
        let mut ticker = time::interval(interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let sample = sample_system_load().await;
                    tracing::trace!(cpu = sample.cpu, memory = sample.memory, "Load sampled");
                    self.set(sample);
                }
                _ = shutdown.recv() => {
                    tracing::info!("Load monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}

/// Read load from `/proc`. Unavailable figures read as zero.
pub async fn sample_system_load() -> LoadSample {
    let loadavg = tokio::fs::read_to_string("/proc/loadavg").await.unwrap_or_default();
    let meminfo = tokio::fs::read_to_string("/proc/meminfo").await.unwrap_or_default();
    let cores = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);

    LoadSample {
        cpu: parse_cpu(&loadavg, cores),
        memory: parse_memory(&meminfo),
    }
}

fn parse_cpu(loadavg: &str, cores: usize) -> f64 {
    loadavg
        .split_whitespace()
        .next()
        .and_then(|v| v.parse::<f64>().ok())
        .map(|one_minute| (one_minute / cores.max(1) as f64).clamp(0.0, 1.0))
        .unwrap_or(0.0)
}

fn parse_memory(meminfo: &str) -> f64 {
    let field = |name: &str| {
        meminfo
            .lines()
            .find(|line| line.starts_with(name))
            .and_then(|line| line.split_whitespace().nth(1))
            .and_then(|v| v.parse::<f64>().ok())
    };

    match (field("MemTotal:"), field("MemAvailable:")) {
        (Some(total), Some(available)) if total > 0.0 => (1.0 - available / total).clamp(0.0, 1.0),
        _ => 0.0,
    }
}
