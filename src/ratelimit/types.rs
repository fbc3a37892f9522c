//! Rate limiting types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

/// Counting algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    FixedWindow,
    SlidingWindow,
    TokenBucket,
    LeakyBucket,
}

impl Strategy {
    /// Snake-case wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::FixedWindow => "fixed_window",
            Strategy::SlidingWindow => "sliding_window",
            Strategy::TokenBucket => "token_bucket",
            Strategy::LeakyBucket => "leaky_bucket",
        }
    }
}

/// Identity dimension a limit is keyed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Global,
    User,
    Ip,
    Endpoint,
    UserEndpoint,
}

impl Scope {
    /// Snake-case wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Global => "global",
            Scope::User => "user",
            Scope::Ip => "ip",
            Scope::Endpoint => "endpoint",
            Scope::UserEndpoint => "user_endpoint",
        }
    }
}

fn default_burst_multiplier() -> f64 {
    1.0
}

/// Longest accepted rate-limit window (31 days).
pub const MAX_WINDOW_MS: u64 = 31 * 24 * 3_600 * 1_000;

/// A resolved limit. `strategy` and `scope` are mandatory in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Window length in milliseconds.
    pub window_ms: u64,
    /// Requests admitted per window.
    pub max_requests: u64,
    pub strategy: Strategy,
    pub scope: Scope,
    /// Token-bucket capacity multiplier over `max_requests`.
    #[serde(default = "default_burst_multiplier")]
    pub burst_multiplier: f64,
}

impl RateLimitConfig {
    /// Build a limit with a burst multiplier of 1.
    pub fn new(window_ms: u64, max_requests: u64, strategy: Strategy, scope: Scope) -> Self {
        Self {
            window_ms,
            max_requests,
            strategy,
            scope,
            burst_multiplier: 1.0,
        }
    }

    /// Window length.
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// Overlay the fields set in `overrides`. Out-of-range values (zero
    /// window or maximum, window above [`MAX_WINDOW_MS`], burst below 1)
    /// are ignored and the base value kept.
    pub fn with_overrides(&self, overrides: &RateLimitOverride) -> Self {
        Self {
            window_ms: overrides
                .window_ms
                .filter(|ms| (1..=MAX_WINDOW_MS).contains(ms))
                .unwrap_or(self.window_ms),
            max_requests: overrides.max_requests.filter(|max| *max > 0).unwrap_or(self.max_requests),
            strategy: overrides.strategy.unwrap_or(self.strategy),
            scope: overrides.scope.unwrap_or(self.scope),
            burst_multiplier: overrides
                .burst_multiplier
                .filter(|m| m.is_finite() && *m >= 1.0)
                .unwrap_or(self.burst_multiplier),
        }
    }
}

/// Partial limit used for endpoint defaults and caller overrides.
///
/// Route layers may insert one into request extensions to tighten or relax
/// the limit for their handlers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RateLimitOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_requests: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<Strategy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<Scope>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub burst_multiplier: Option<f64>,
}

/// Who is making the request: the authenticated user if known, else the IP.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identity {
    User(String),
    Ip(IpAddr),
}

impl Identity {
    /// Prefer the user id when present.
    pub fn from_parts(user_id: Option<&str>, ip: IpAddr) -> Self {
        match user_id {
            Some(id) if !id.is_empty() => Identity::User(id.to_string()),
            _ => Identity::Ip(ip),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::User(id) => write!(f, "u:{id}"),
            Identity::Ip(ip) => write!(f, "ip:{ip}"),
        }
    }
}

/// Counter key. Identical (scope, identity, endpoint) always map to the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey(String);

impl RateLimitKey {
    /// Derive the key for a request.
    pub fn derive(scope: Scope, identity: &Identity, ip: IpAddr, endpoint: &str) -> Self {
        let endpoint = normalize_endpoint(endpoint);
        let key = match scope {
            Scope::Global => "rl:global".to_string(),
            Scope::User => format!("rl:user:{identity}"),
            Scope::Ip => format!("rl:ip:{ip}"),
            Scope::Endpoint => format!("rl:endpoint:{endpoint}"),
            Scope::UserEndpoint => format!("rl:user_endpoint:{identity}:{endpoint}"),
        };
        Self(key)
    }

    /// Key of a sub-counter, e.g. a window index.
    pub fn child(&self, suffix: impl fmt::Display) -> String {
        format!("{}:{suffix}", self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Strip the query string and trailing slash so `/a/` and `/a?x=1` share a counter.
pub fn normalize_endpoint(path: &str) -> &str {
    let path = path.split('?').next().unwrap_or(path);
    if path.len() > 1 {
        path.trim_end_matches('/')
    } else {
        path
    }
}

/// Outcome of one evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Effective limit after adaptive and penalty scaling.
    pub limit: u64,
    pub total_hits: u64,
    pub remaining: u64,
    /// When the counter resets (or the bucket refills fully).
    pub reset_time: DateTime<Utc>,
    /// Only set on denial.
    pub retry_after: Option<Duration>,
    /// True when the store could not be reached and the request was let through.
    pub degraded: bool,
}

impl RateLimitDecision {
    /// Reset time as epoch seconds.
    pub fn reset_epoch_secs(&self) -> i64 {
        self.reset_time.timestamp()
    }

    /// Retry-after rounded up to whole seconds.
    pub fn retry_after_secs(&self) -> Option<u64> {
        self.retry_after.map(ceil_secs)
    }
}

/// Round a duration up to whole seconds.
pub fn ceil_secs(duration: Duration) -> u64 {
    let secs = duration.as_secs();
    if duration.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}
