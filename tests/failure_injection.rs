//! Failure injection: every store failure must degrade to "allow".

use axum::http::StatusCode;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use admission_guard::blocking::types::{IpViolation, ViolationType};
use admission_guard::clock::{Clock, ManualClock};
use admission_guard::events::types::{origin, SecurityEvent, SecurityEventType};
use admission_guard::events::{EventBuffer, EventSink, SinkError};
use admission_guard::http::HttpServer;
use admission_guard::pipeline::{AdmissionDecision, AdmissionRequest, Stores};
use admission_guard::severity::Severity;

mod common;

use common::{fixed_window, harness_with, ip, request_from, FailingStore, LogCapture, SlowStore, START_MILLIS};

fn failing_stores() -> Stores {
    let store = Arc::new(FailingStore);
    Stores {
        counters: store.clone(),
        violations: store.clone(),
        blocks: store,
    }
}

#[tokio::test]
async fn test_unavailable_store_admits_and_logs_degraded() {
    let logs = LogCapture::default();
    let _guard = logs.install();

    let clock = Arc::new(ManualClock::at_millis(START_MILLIS));
    let h = harness_with(&fixed_window(60_000, 1), failing_stores(), clock);
    let request = AdmissionRequest::new(ip(40), "/api");

    for _ in 0..5 {
        match h.pipeline.check(&request).await {
            AdmissionDecision::Allowed(Some(decision)) => {
                assert!(decision.degraded);
                assert_eq!(decision.remaining, decision.limit);
            }
            other => panic!("expected fail-open, got {other:?}"),
        }
    }

    let output = logs.contents();
    assert!(output.contains("degraded=true"), "{output}");
    assert!(output.contains("block_registry"), "{output}");
}

#[tokio::test]
async fn test_unavailable_blocking_store_reads_not_blocked() {
    let logs = LogCapture::default();
    let _guard = logs.install();

    let clock = Arc::new(ManualClock::at_millis(START_MILLIS));
    let h = harness_with(&fixed_window(60_000, 1), failing_stores(), clock.clone());
    let engine = h.pipeline.blocking();

    let critical = IpViolation::new(ip(41), ViolationType::InjectionAttempt, "/", Severity::Critical, clock.now());
    assert!(engine.record_violation(critical).await.is_none());
    assert!(engine.is_blocked(ip(41)).await.is_none());
    assert!(engine.sweep_expired().await.is_err());

    let output = logs.contents();
    assert!(output.contains("violation_log"), "{output}");
    assert!(output.contains("Blocking store unavailable, failing open"), "{output}");
}

#[tokio::test(start_paused = true)]
async fn test_stalled_counter_store_times_out_open() {
    let clock = Arc::new(ManualClock::at_millis(START_MILLIS));
    let mut stores = common::memory_stores(clock.clone());
    stores.counters = Arc::new(SlowStore);
    let h = harness_with(&fixed_window(60_000, 1), stores, clock);

    match h.pipeline.check(&AdmissionRequest::new(ip(42), "/api")).await {
        AdmissionDecision::Allowed(Some(decision)) => assert!(decision.degraded),
        other => panic!("expected fail-open, got {other:?}"),
    }
}

#[tokio::test]
async fn test_http_surface_fails_open() {
    let clock = Arc::new(ManualClock::at_millis(START_MILLIS));
    let config = fixed_window(60_000, 1);
    let h = harness_with(&config, failing_stores(), clock);
    let app = HttpServer::new(&config, h.pipeline.clone()).router();

    for _ in 0..3 {
        let response = app.clone().oneshot(request_from(ip(43), "/api/items")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-ratelimit-limit"], "1");
    }
}

struct BrokenSink;

#[async_trait::async_trait]
impl EventSink for BrokenSink {
    async fn write_batch(&self, _events: &[SecurityEvent]) -> Result<(), SinkError> {
        Err(SinkError::Unavailable("disk full".into()))
    }
}

#[tokio::test]
async fn test_sink_failure_drops_batch_without_blocking_submit() {
    let logs = LogCapture::default();
    let _guard = logs.install();

    let clock: Arc<dyn Clock> = Arc::new(ManualClock::at_millis(START_MILLIS));
    let config = admission_guard::config::EventBufferConfig {
        capacity: 2,
        ..Default::default()
    };
    let buffer = EventBuffer::new(&config, Arc::new(BrokenSink), clock.clone());

    for _ in 0..4 {
        let event = SecurityEvent::new(
            SecurityEventType::Other,
            Severity::Low,
            "198.51.100.1",
            "/",
            origin::RPC_GUARD,
            clock.now(),
        );
        tokio::time::timeout(Duration::from_secs(1), buffer.submit(event))
            .await
            .expect("submit never waits on a broken sink");
    }
    assert_eq!(buffer.pending_len(), 0);
    assert!(logs.contents().contains("disk full"));
}
