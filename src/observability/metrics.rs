//! Metrics collection and exposition.
//!
//! # Metrics
//! - `admission_decisions_total` (counter): admission outcomes by `outcome`
//! - `admission_degraded_total` (counter): fail-open events by `component`
//! - `violations_recorded_total` (counter): by `type`, `severity`
//! - `ip_blocks_total` / `ip_unblocks_total` (counter): block lifecycle
//! - `security_alerts_total` (counter): by `type`, `severity`
//! - `event_buffer_flushes_total` (counter): by `trigger`
//! - `event_buffer_dropped_total` (counter): events lost to sink failures
//! - `event_buffer_pending` (gauge): events waiting for a flush
//!
//! Without an installed recorder every call is a no-op.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use std::net::SocketAddr;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_decision(outcome: &'static str) {
    counter!("admission_decisions_total", "outcome" => outcome).increment(1);
}

pub fn record_degraded(component: &'static str) {
    counter!("admission_degraded_total", "component" => component).increment(1);
}

pub fn record_violation(violation_type: &'static str, severity: &'static str) {
    counter!("violations_recorded_total", "type" => violation_type, "severity" => severity).increment(1);
}

pub fn record_block(permanent: bool) {
    let permanent = if permanent { "true" } else { "false" };
    counter!("ip_blocks_total", "permanent" => permanent).increment(1);
}

pub fn record_unblock(reason: &'static str) {
    counter!("ip_unblocks_total", "reason" => reason).increment(1);
}

pub fn record_alert(alert_type: &str, severity: &'static str) {
    counter!("security_alerts_total", "type" => alert_type.to_string(), "severity" => severity).increment(1);
}

pub fn record_flush(trigger: &'static str) {
    counter!("event_buffer_flushes_total", "trigger" => trigger).increment(1);
}

pub fn record_dropped_events(count: usize) {
    counter!("event_buffer_dropped_total").increment(count as u64);
}

pub fn set_pending_events(count: usize) {
    gauge!("event_buffer_pending").set(count as f64);
}
