//! Detector report → canonical event mapping.
//!
//! Pure and total: any report produces an event. Unknown middleware names
//! and unreadable threat levels classify as low severity.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::events::types::{origin, DetectorReport, SecurityEvent, SecurityEventType};
use crate::severity::Severity;

const UNKNOWN: &str = "unknown";

/// Default classification per middleware name.
fn classify_middleware(name: &str) -> (SecurityEventType, Severity) {
    match name {
        origin::RATE_LIMITER | "rate_limit" | "ratelimit" => (SecurityEventType::RateLimitExceeded, Severity::Medium),
        origin::IP_BLOCKING | "ip_blocker" => (SecurityEventType::IpBlocked, Severity::High),
        origin::AUTH | "authentication" | "oauth" => (SecurityEventType::AuthFailure, Severity::Medium),
        origin::INJECTION_FILTER | "sql_injection" | "xss_filter" | "input_validation" => {
            (SecurityEventType::InjectionAttempt, Severity::High)
        }
        origin::RPC_GUARD | "rpc" => (SecurityEventType::RpcAbuse, Severity::Medium),
        origin::CORRELATOR | "correlator" => (SecurityEventType::SuspiciousActivity, Severity::High),
        _ => (SecurityEventType::Other, Severity::Low),
    }
}

/// Minimum severity an event type carries regardless of reported level.
fn severity_floor(event_type: SecurityEventType) -> Severity {
    match event_type {
        SecurityEventType::InjectionAttempt => Severity::High,
        SecurityEventType::IpBlocked => Severity::Medium,
        _ => Severity::Low,
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Map a raw report onto the canonical shape. `now` stamps reports without a timestamp.
pub fn normalize(report: DetectorReport, now: DateTime<Utc>) -> SecurityEvent {
    let middleware = report.middleware.trim().to_ascii_lowercase();
    let (default_type, default_level) = classify_middleware(&middleware);

    let event_type = report
        .event_type
        .as_deref()
        .and_then(SecurityEventType::parse)
        .unwrap_or(default_type);

    let threat_level = match report.threat_level.as_deref() {
        Some(level) => Severity::parse(level).unwrap_or(Severity::Low),
        None => default_level,
    };
    let severity = threat_level.max(severity_floor(event_type));

    SecurityEvent {
        event_id: Uuid::new_v4(),
        event_type,
        severity,
        threat_level,
        source_ip: non_empty(report.source_ip).unwrap_or_else(|| UNKNOWN.to_string()),
        user_id: non_empty(report.user_id),
        endpoint: non_empty(report.endpoint).unwrap_or_else(|| UNKNOWN.to_string()),
        middleware_origin: if middleware.is_empty() {
            UNKNOWN.to_string()
        } else {
            middleware
        },
        blocked: report.blocked,
        timestamp: report.timestamp.unwrap_or(now),
        correlation_id: non_empty(report.correlation_id).unwrap_or_else(|| Uuid::new_v4().to_string()),
        user_agent: non_empty(report.user_agent),
        provider: non_empty(report.provider),
        details: report.details,
    }
}
