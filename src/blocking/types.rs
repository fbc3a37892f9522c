//! Violation and block records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::time::Duration;
use uuid::Uuid;

use crate::severity::Severity;

/// Kind of misbehaviour that produced a violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationType {
    /// Request denied by the rate limiter.
    RateLimitExceeded,
    /// Pattern raised by threat correlation.
    SuspiciousActivity,
    /// Injection filter hit (SQL, XSS, path traversal).
    InjectionAttempt,
    /// Failed authentication.
    AuthFailure,
    /// Operator-initiated.
    Manual,
}

impl ViolationType {
    /// Snake-case wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationType::RateLimitExceeded => "rate_limit_exceeded",
            ViolationType::SuspiciousActivity => "suspicious_activity",
            ViolationType::InjectionAttempt => "injection_attempt",
            ViolationType::AuthFailure => "auth_failure",
            ViolationType::Manual => "manual",
        }
    }
}

impl fmt::Display for ViolationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single recorded violation. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpViolation {
    /// Unique id, keeps identical violations distinct in the log.
    pub id: Uuid,
    pub ip: IpAddr,
    pub timestamp: DateTime<Utc>,
    pub violation_type: ViolationType,
    pub endpoint: String,
    pub severity: Severity,
    #[serde(default)]
    pub details: serde_json::Value,
}

impl IpViolation {
    /// Create a violation stamped at `timestamp`.
    pub fn new(
        ip: IpAddr,
        violation_type: ViolationType,
        endpoint: impl Into<String>,
        severity: Severity,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            ip,
            timestamp,
            violation_type,
            endpoint: endpoint.into(),
            severity,
            details: serde_json::Value::Null,
        }
    }

    /// Attach free-form details.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// Rolling aggregate of an IP's violations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpViolationCount {
    pub ip: IpAddr,
    pub hourly_count: u64,
    pub daily_count: u64,
}

/// An active or historical block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpBlockInfo {
    pub ip: IpAddr,
    pub blocked_at: DateTime<Utc>,
    pub blocked_until: DateTime<Utc>,
    pub reason: String,
    pub is_permanent: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unblocked_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unblocked_by: Option<String>,
}

impl IpBlockInfo {
    /// Whether the block has run its course at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.blocked_until
    }

    /// Time left on the block, zero when expired.
    pub fn remaining_at(&self, now: DateTime<Utc>) -> Duration {
        (self.blocked_until - now).to_std().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    #[test]
    fn test_block_expiry() {
        let now = Utc::now();
        let block = IpBlockInfo {
            ip: "1.2.3.4".parse().unwrap(),
            blocked_at: now,
            blocked_until: now + TimeDelta::seconds(60),
            reason: "test".into(),
            is_permanent: false,
            unblocked_at: None,
            unblocked_by: None,
        };

        assert!(!block.is_expired_at(now));
        assert_eq!(block.remaining_at(now), Duration::from_secs(60));
        assert!(block.is_expired_at(now + TimeDelta::seconds(60)));
        assert_eq!(block.remaining_at(now + TimeDelta::seconds(90)), Duration::ZERO);
    }

    #[test]
    fn test_violation_type_wire_names() {
        let json = serde_json::to_string(&ViolationType::SuspiciousActivity).unwrap();
        assert_eq!(json, "\"suspicious_activity\"");
        assert_eq!(ViolationType::RateLimitExceeded.as_str(), "rate_limit_exceeded");
    }
}
