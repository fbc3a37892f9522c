//! Periodic housekeeping.
//!
//! Each tick sweeps lapsed blocks, prunes idle correlation windows and,
//! on the in-memory backend, purges expired counters. None of this is
//! needed for correctness: expiry is always decided on read.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time;

use crate::pipeline::AdmissionPipeline;
use crate::store::MemoryCounterStore;

pub struct Maintenance {
    pipeline: Arc<AdmissionPipeline>,
    counters: Option<Arc<MemoryCounterStore>>,
    interval: Duration,
}

impl Maintenance {
    pub fn new(pipeline: Arc<AdmissionPipeline>, counters: Option<Arc<MemoryCounterStore>>, interval: Duration) -> Self {
        Self {
            pipeline,
            counters,
            interval,
        }
    }

    /// One pass. Store failures are logged and retried next tick.
    pub async fn tick(&self) {
        if let Err(error) = self.pipeline.blocking().sweep_expired().await {
            tracing::warn!(degraded = true, component = "block_registry", error = %error, "Block sweep failed");
        }

        let pruned = self.pipeline.correlator().prune();
        let purged = self.counters.as_ref().map_or(0, |c| c.purge_expired());
        tracing::debug!(pruned_sources = pruned, purged_counters = purged, "Maintenance pass complete");
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick().await,
                _ = shutdown.recv() => {
                    tracing::info!("Maintenance task received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}
