//! Canonical security event and the raw detector report shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::severity::Severity;

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventType {
    RateLimitExceeded,
    IpBlocked,
    AuthFailure,
    InjectionAttempt,
    RpcAbuse,
    SuspiciousActivity,
    Other,
}

impl SecurityEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityEventType::RateLimitExceeded => "rate_limit_exceeded",
            SecurityEventType::IpBlocked => "ip_blocked",
            SecurityEventType::AuthFailure => "auth_failure",
            SecurityEventType::InjectionAttempt => "injection_attempt",
            SecurityEventType::RpcAbuse => "rpc_abuse",
            SecurityEventType::SuspiciousActivity => "suspicious_activity",
            SecurityEventType::Other => "other",
        }
    }

    /// Lenient parse of a detector-supplied type name.
    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "rate_limit_exceeded" | "rate_limit" | "rate_limited" => Some(SecurityEventType::RateLimitExceeded),
            "ip_blocked" | "blocked" => Some(SecurityEventType::IpBlocked),
            "auth_failure" | "auth_failed" | "login_failure" => Some(SecurityEventType::AuthFailure),
            "injection_attempt" | "sql_injection" | "xss" | "path_traversal" => {
                Some(SecurityEventType::InjectionAttempt)
            }
            "rpc_abuse" => Some(SecurityEventType::RpcAbuse),
            "suspicious_activity" | "suspicious" => Some(SecurityEventType::SuspiciousActivity),
            "other" => Some(SecurityEventType::Other),
            _ => None,
        }
    }
}

impl fmt::Display for SecurityEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Middleware names used by in-process producers.
pub mod origin {
    pub const RATE_LIMITER: &str = "rate_limiter";
    pub const IP_BLOCKING: &str = "ip_blocking";
    pub const AUTH: &str = "auth";
    pub const INJECTION_FILTER: &str = "injection_filter";
    pub const RPC_GUARD: &str = "rpc_guard";
    pub const CORRELATOR: &str = "threat_correlator";
}

/// The one event shape consumed by the buffer and the correlator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub event_id: Uuid,
    pub event_type: SecurityEventType,
    pub severity: Severity,
    /// Level reported by the detector, before event-type floors.
    pub threat_level: Severity,
    /// Client address as reported; not guaranteed to parse.
    pub source_ip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub endpoint: String,
    pub middleware_origin: String,
    pub blocked: bool,
    pub timestamp: DateTime<Utc>,
    /// Request id when one was available.
    pub correlation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    /// Identity provider involved (auth events).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default)]
    pub details: serde_json::Value,
}

impl SecurityEvent {
    /// Build an event from an in-process detector.
    pub fn new(
        event_type: SecurityEventType,
        severity: Severity,
        source_ip: impl Into<String>,
        endpoint: impl Into<String>,
        middleware_origin: &str,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type,
            severity,
            threat_level: severity,
            source_ip: source_ip.into(),
            user_id: None,
            endpoint: endpoint.into(),
            middleware_origin: middleware_origin.to_string(),
            blocked: false,
            timestamp,
            correlation_id: Uuid::new_v4().to_string(),
            user_agent: None,
            provider: None,
            details: serde_json::Value::Null,
        }
    }

    pub fn with_user(mut self, user_id: Option<String>) -> Self {
        self.user_id = user_id;
        self
    }

    pub fn with_user_agent(mut self, user_agent: Option<String>) -> Self {
        self.user_agent = user_agent;
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn blocked(mut self, blocked: bool) -> Self {
        self.blocked = blocked;
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// Raw report from any detector, including out-of-process ones.
///
/// Every field is optional except the middleware name; [`normalize`]
/// turns any report into a [`SecurityEvent`].
///
/// [`normalize`]: crate::events::normalize::normalize
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorReport {
    pub middleware: String,
    pub threat_level: Option<String>,
    pub event_type: Option<String>,
    pub source_ip: Option<String>,
    pub user_id: Option<String>,
    pub endpoint: Option<String>,
    pub blocked: bool,
    pub user_agent: Option<String>,
    pub provider: Option<String>,
    pub correlation_id: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub details: serde_json::Value,
}
