//! End-to-end admission behaviour on in-memory stores with a manual clock.

use std::time::Duration;

use admission_guard::blocking::types::{IpViolation, ViolationType};
use admission_guard::clock::Clock;
use admission_guard::events::types::{origin, DetectorReport, SecurityEvent, SecurityEventType};
use admission_guard::events::FlushTrigger;
use admission_guard::pipeline::{AdmissionDecision, AdmissionRequest};
use admission_guard::ratelimit::{LoadSample, RateLimitConfig, RateLimitOverride, Scope, Strategy};
use admission_guard::severity::Severity;

mod common;

use common::{config_with, fixed_window, harness, ip};

#[tokio::test]
async fn test_fixed_window_denies_sixth_and_resets_after_window() {
    let h = harness(&fixed_window(60_000, 5));
    let request = AdmissionRequest::new(ip(1), "/api/orders");

    for n in 1..=5 {
        match h.pipeline.check(&request).await {
            AdmissionDecision::Allowed(Some(decision)) => assert_eq!(decision.remaining, 5 - n),
            other => panic!("request {n} should pass, got {other:?}"),
        }
    }

    match h.pipeline.check(&request).await {
        AdmissionDecision::RateLimited(decision) => {
            assert_eq!(decision.limit, 5);
            assert_eq!(decision.remaining, 0);
            assert!(decision.retry_after_secs().is_some_and(|s| s > 0 && s <= 60));
        }
        other => panic!("sixth request should be limited, got {other:?}"),
    }

    h.clock.advance(Duration::from_secs(60));
    assert!(h.pipeline.check(&request).await.is_allowed());
}

#[tokio::test]
async fn test_token_bucket_burst_then_one_per_second() {
    let h = harness(&config_with(RateLimitConfig::new(
        10_000,
        10,
        Strategy::TokenBucket,
        Scope::Ip,
    )));
    let request = AdmissionRequest::new(ip(2), "/api/orders");

    for _ in 0..10 {
        assert!(h.pipeline.check(&request).await.is_allowed());
    }
    assert!(matches!(h.pipeline.check(&request).await, AdmissionDecision::RateLimited(_)));

    h.clock.advance(Duration::from_secs(1));
    assert!(h.pipeline.check(&request).await.is_allowed());
    assert!(matches!(h.pipeline.check(&request).await, AdmissionDecision::RateLimited(_)));
}

#[tokio::test]
async fn test_identities_are_counted_separately() {
    let h = harness(&config_with(RateLimitConfig::new(
        60_000,
        1,
        Strategy::FixedWindow,
        Scope::User,
    )));
    let alice = AdmissionRequest::new(ip(3), "/api").with_user("alice", "anonymous");
    let bob = AdmissionRequest::new(ip(3), "/api").with_user("bob", "anonymous");

    assert!(h.pipeline.check(&alice).await.is_allowed());
    assert!(h.pipeline.check(&bob).await.is_allowed());
    assert!(!h.pipeline.check(&alice).await.is_allowed());
}

#[tokio::test]
async fn test_endpoint_and_caller_overrides_apply() {
    let mut config = fixed_window(60_000, 100);
    config.rate_limit.endpoints.push(admission_guard::config::EndpointLimit {
        path_prefix: "/api/auth".into(),
        overrides: RateLimitOverride {
            max_requests: Some(2),
            ..Default::default()
        },
    });
    let h = harness(&config);

    let login = AdmissionRequest::new(ip(4), "/api/auth/login");
    match h.pipeline.check(&login).await {
        AdmissionDecision::Allowed(Some(decision)) => assert_eq!(decision.limit, 2),
        other => panic!("unexpected {other:?}"),
    }

    let mut upload = AdmissionRequest::new(ip(5), "/api/upload");
    upload.overrides = Some(RateLimitOverride {
        max_requests: Some(7),
        ..Default::default()
    });
    match h.pipeline.check(&upload).await {
        AdmissionDecision::Allowed(Some(decision)) => assert_eq!(decision.limit, 7),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_zero_window_caller_override_still_limits() {
    let h = harness(&fixed_window(60_000, 2));
    let mut request = AdmissionRequest::new(ip(7), "/api/upload");
    request.overrides = Some(RateLimitOverride {
        window_ms: Some(0),
        max_requests: Some(0),
        ..Default::default()
    });

    assert!(h.pipeline.check(&request).await.is_allowed());
    assert!(h.pipeline.check(&request).await.is_allowed());
    match h.pipeline.check(&request).await {
        AdmissionDecision::RateLimited(decision) => assert_eq!(decision.limit, 2),
        other => panic!("third request should be limited, got {other:?}"),
    }
}

#[tokio::test]
async fn test_high_load_shrinks_limits() {
    let mut config = fixed_window(60_000, 10);
    config.rate_limit.adaptive.enabled = true;
    let h = harness(&config);

    h.pipeline.load_monitor().set(LoadSample { cpu: 0.95, memory: 0.2 });
    match h.pipeline.check(&AdmissionRequest::new(ip(6), "/api")).await {
        AdmissionDecision::Allowed(Some(decision)) => assert_eq!(decision.limit, 5),
        other => panic!("unexpected {other:?}"),
    }
}

fn medium(ip_last: u8, clock_now: chrono::DateTime<chrono::Utc>) -> IpViolation {
    IpViolation::new(ip(ip_last), ViolationType::RateLimitExceeded, "/api", Severity::Medium, clock_now)
}

#[tokio::test]
async fn test_ten_violations_block_temporarily_without_stacking() {
    let h = harness(&fixed_window(60_000, 5));
    let engine = h.pipeline.blocking();

    for n in 1..=9 {
        assert!(engine.record_violation(medium(10, h.clock.now())).await.is_none(), "violation {n}");
    }
    let block = engine
        .record_violation(medium(10, h.clock.now()))
        .await
        .expect("tenth violation blocks");
    assert!(!block.is_permanent);

    let active = engine.is_blocked(ip(10)).await.expect("blocked");
    assert!(!active.is_permanent);

    h.clock.advance(Duration::from_secs(5));
    engine.record_violation(medium(10, h.clock.now())).await;

    let blocks = engine.list_blocks().await.unwrap();
    assert_eq!(blocks.len(), 1);
    assert!(!blocks[0].is_permanent);
    assert!(blocks[0].blocked_until > block.blocked_until);
}

#[tokio::test]
async fn test_single_critical_violation_blocks_permanently() {
    let h = harness(&fixed_window(60_000, 5));
    let violation = IpViolation::new(
        ip(11),
        ViolationType::InjectionAttempt,
        "/api/search",
        Severity::Critical,
        h.clock.now(),
    );

    let block = h.pipeline.blocking().record_violation(violation).await.expect("blocked");
    assert!(block.is_permanent);
    assert!(matches!(
        h.pipeline.check(&AdmissionRequest::new(ip(11), "/api")).await,
        AdmissionDecision::Blocked(b) if b.is_permanent
    ));
}

#[tokio::test]
async fn test_lapsed_block_reads_as_unblocked_without_timer() {
    let mut config = fixed_window(60_000, 5);
    config.blocking.auto_unblock_enabled = false;
    let h = harness(&config);
    let engine = h.pipeline.blocking();

    engine
        .block(ip(12), "manual", Duration::from_secs(600), false)
        .await
        .unwrap();
    assert!(engine.is_blocked(ip(12)).await.is_some());

    h.clock.advance(Duration::from_secs(601));
    assert!(engine.is_blocked(ip(12)).await.is_none());

    let history = engine.history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].unblocked_by.as_deref(), Some("expiry"));
    assert!(h.pipeline.check(&AdmissionRequest::new(ip(12), "/api")).await.is_allowed());
}

#[tokio::test]
async fn test_whitelisted_address_is_never_blocked() {
    let mut config = fixed_window(60_000, 5);
    config.blocking.whitelist = vec!["203.0.113.0/28".into()];
    let h = harness(&config);
    let engine = h.pipeline.blocking();

    for _ in 0..20 {
        assert!(engine.record_violation(medium(13, h.clock.now())).await.is_none());
    }
    assert!(engine.is_blocked(ip(13)).await.is_none());
    assert_eq!(engine.violation_counts(ip(13)).await.unwrap().hourly_count, 20);
}

fn auth_failure(source: &str, at: chrono::DateTime<chrono::Utc>) -> SecurityEvent {
    SecurityEvent::new(SecurityEventType::AuthFailure, Severity::Medium, source, "/login", origin::AUTH, at)
}

#[tokio::test]
async fn test_ten_auth_failures_raise_exactly_one_alert() {
    let h = harness(&fixed_window(60_000, 5));
    let correlator = h.pipeline.correlator();
    let mut alerts = correlator.subscribe();

    let mut raised = Vec::new();
    for _ in 0..10 {
        h.clock.advance(Duration::from_secs(30));
        raised.extend(correlator.on_event(&auth_failure("1.2.3.4", h.clock.now())).await);
    }
    assert_eq!(raised.len(), 1);
    assert_eq!(raised[0].alert_type, "rapid_auth_attempts");
    assert_eq!(raised[0].source_event_ids.len(), 10);

    h.clock.advance(Duration::from_secs(30));
    assert!(correlator.on_event(&auth_failure("1.2.3.4", h.clock.now())).await.is_empty());

    assert_eq!(correlator.active_alerts(None).len(), 1);
    assert_eq!(alerts.try_recv().unwrap().alert_id, raised[0].alert_id);
    assert!(alerts.try_recv().is_err());

    let summary = h.pipeline.blocking().violation_summary("1.2.3.4".parse().unwrap()).await.unwrap();
    assert_eq!(summary.violations.len(), 1);
    assert_eq!(summary.violations[0].violation_type, ViolationType::SuspiciousActivity);
}

#[tokio::test]
async fn test_resolved_alert_rearms() {
    let h = harness(&fixed_window(60_000, 5));
    let correlator = h.pipeline.correlator();

    let mut first = Vec::new();
    for _ in 0..10 {
        first.extend(correlator.on_event(&auth_failure("1.2.3.5", h.clock.now())).await);
    }
    let alert = first.pop().expect("alert raised");
    correlator.resolve(alert.alert_id, "oncall", None).unwrap();

    let again = correlator.on_event(&auth_failure("1.2.3.5", h.clock.now())).await;
    assert_eq!(again.len(), 1);
    assert_ne!(again[0].alert_id, alert.alert_id);
}

#[tokio::test]
async fn test_detector_reports_reach_correlator_on_flush() {
    let h = harness(&fixed_window(60_000, 5));

    for _ in 0..3 {
        let report = DetectorReport {
            middleware: "auth".into(),
            source_ip: Some("198.51.100.20".into()),
            user_agent: Some("python-requests/2.31".into()),
            ..Default::default()
        };
        h.pipeline.report(report).await;
    }
    assert_eq!(h.pipeline.correlator().active_alert_count(), 0);

    assert_eq!(h.pipeline.events().flush(FlushTrigger::Manual).await, 3);
    let alerts = h.pipeline.correlator().active_alerts(None);
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].alert_type, "bot_detection");
    assert_eq!(h.pipeline.sink().len(), 3);
}

#[tokio::test]
async fn test_critical_event_flushes_before_submit_returns() {
    let h = harness(&fixed_window(60_000, 5));
    let event = SecurityEvent::new(
        SecurityEventType::InjectionAttempt,
        Severity::Critical,
        "198.51.100.30",
        "/api/search",
        origin::INJECTION_FILTER,
        h.clock.now(),
    );

    h.pipeline.events().submit(event).await;
    assert_eq!(h.pipeline.sink().len(), 1);
    assert_eq!(h.pipeline.events().pending_len(), 0);
}

#[tokio::test]
async fn test_buffer_holds_ninety_nine_and_flushes_at_hundred() {
    let h = harness(&fixed_window(60_000, 5));
    let low = |n: u8| {
        SecurityEvent::new(
            SecurityEventType::Other,
            Severity::Low,
            format!("198.51.100.{n}"),
            "/",
            "custom",
            h.clock.now(),
        )
    };

    for n in 0..99 {
        h.pipeline.events().submit(low(n)).await;
    }
    assert_eq!(h.pipeline.sink().len(), 0);
    assert_eq!(h.pipeline.events().pending_len(), 99);

    h.pipeline.events().submit(low(99)).await;
    assert_eq!(h.pipeline.sink().len(), 100);
    assert_eq!(h.pipeline.events().pending_len(), 0);
}
