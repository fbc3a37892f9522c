//! Batching of security events.
//!
//! `submit` appends under a short lock. When a flush is due, the pending
//! vector is swapped out whole; the detached batch is forwarded to
//! observers and written to the sink with no lock held, so two flushes
//! never share a generation.

use async_trait::async_trait;
use std::mem;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time;

use crate::clock::Clock;
use crate::config::schema::EventBufferConfig;
use crate::events::normalize::normalize;
use crate::events::sink::EventSink;
use crate::events::types::{DetectorReport, SecurityEvent};
use crate::observability::metrics;
use crate::severity::Severity;

/// Receives every flushed event before it reaches the sink.
#[async_trait]
pub trait EventObserver: Send + Sync {
    async fn on_event(&self, event: &SecurityEvent);
}

/// Why a flush ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    Critical,
    Capacity,
    Interval,
    Shutdown,
    Manual,
}

impl FlushTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlushTrigger::Critical => "critical",
            FlushTrigger::Capacity => "capacity",
            FlushTrigger::Interval => "interval",
            FlushTrigger::Shutdown => "shutdown",
            FlushTrigger::Manual => "manual",
        }
    }
}

/// Collects events and flushes them in batches.
pub struct EventBuffer {
    pending: Mutex<Vec<SecurityEvent>>,
    capacity: usize,
    flush_interval: Duration,
    observers: Vec<Arc<dyn EventObserver>>,
    sink: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
}

impl EventBuffer {
    pub fn new(config: &EventBufferConfig, sink: Arc<dyn EventSink>, clock: Arc<dyn Clock>) -> Self {
        Self {
            pending: Mutex::new(Vec::with_capacity(config.capacity)),
            capacity: config.capacity.max(1),
            flush_interval: Duration::from_millis(config.flush_interval_ms),
            observers: Vec::new(),
            sink,
            clock,
        }
    }

    /// Register an observer (e.g. the threat correlator).
    pub fn with_observer(mut self, observer: Arc<dyn EventObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Events waiting for the next flush.
    pub fn pending_len(&self) -> usize {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Buffer an event. Critical events, and the event that fills the
    /// buffer, flush before this returns.
    pub async fn submit(&self, event: SecurityEvent) {
        let critical = event.severity == Severity::Critical;

        let due = {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            pending.push(event);
            metrics::set_pending_events(pending.len());

            if critical {
                Some((mem::take(&mut *pending), FlushTrigger::Critical))
            } else if pending.len() >= self.capacity {
                Some((mem::take(&mut *pending), FlushTrigger::Capacity))
            } else {
                None
            }
        };

        if let Some((batch, trigger)) = due {
            metrics::set_pending_events(0);
            self.process(batch, trigger).await;
        }
    }

    /// Normalise a raw detector report and submit it.
    pub async fn submit_report(&self, report: DetectorReport) -> SecurityEvent {
        let event = normalize(report, self.clock.now());
        self.submit(event.clone()).await;
        event
    }

    /// Flush whatever is pending. Returns the batch size.
    pub async fn flush(&self, trigger: FlushTrigger) -> usize {
        let batch = {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            mem::take(&mut *pending)
        };
        metrics::set_pending_events(0);

        let size = batch.len();
        if size > 0 {
            self.process(batch, trigger).await;
        }
        size
    }

    async fn process(&self, batch: Vec<SecurityEvent>, trigger: FlushTrigger) {
        metrics::record_flush(trigger.as_str());
        tracing::debug!(events = batch.len(), trigger = trigger.as_str(), "Flushing security events");

        for event in &batch {
            for observer in &self.observers {
                observer.on_event(event).await;
            }
        }

        if let Err(error) = self.sink.write_batch(&batch).await {
            tracing::warn!(
                error = %error,
                dropped = batch.len(),
                trigger = trigger.as_str(),
                "Event sink write failed, dropping batch"
            );
            metrics::record_dropped_events(batch.len());
        }
    }

    /// Flush on an interval until shutdown, then flush once more.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            interval_ms = self.flush_interval.as_millis() as u64,
            capacity = self.capacity,
            "Event buffer flusher starting"
        );
        let mut ticker = time::interval(self.flush_interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.flush(FlushTrigger::Interval).await;
                }
                _ = shutdown.recv() => {
                    let flushed = self.flush(FlushTrigger::Shutdown).await;
                    tracing::info!(flushed, "Event buffer received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}
