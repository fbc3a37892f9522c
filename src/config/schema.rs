//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the
//! admission pipeline. All types derive Serde traits for deserialization
//! from TOML files.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::ratelimit::types::{RateLimitConfig, RateLimitOverride, Scope, Strategy};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GuardConfig {
    /// Service listener and request identity handling.
    pub listener: ListenerConfig,

    /// Shared counter store backend.
    pub store: StoreConfig,

    /// Rate limiting policy.
    pub rate_limit: RateLimitSettings,

    /// Violation escalation and IP blocking.
    pub blocking: BlockingConfig,

    /// Cross-request threat correlation.
    pub correlator: CorrelatorConfig,

    /// Security event batching.
    pub event_buffer: EventBufferConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Operator API.
    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Take the client IP from the first `X-Forwarded-For` hop.
    pub trust_forwarded_for: bool,

    /// Accept `x-user-id` / `x-user-role` from a trusted gateway.
    pub trust_identity_headers: bool,

    /// Request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            trust_forwarded_for: false,
            trust_identity_headers: false,
            request_timeout_secs: 30,
        }
    }
}

/// Which store backs counters, violations and blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// In-process maps. Not authoritative across instances.
    Memory,
    /// Shared Redis.
    Redis,
}

/// Store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,

    /// Redis connection URL, required for the redis backend.
    pub redis_url: Option<String>,

    /// Namespace for every key.
    pub key_prefix: String,

    /// Deadline per round trip in milliseconds.
    pub timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            redis_url: None,
            key_prefix: "admission".to_string(),
            timeout_ms: 50,
        }
    }
}

/// Endpoint-specific limit, matched by longest path prefix.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EndpointLimit {
    pub path_prefix: String,

    #[serde(flatten)]
    pub overrides: RateLimitOverride,
}

/// Rate limiting policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitSettings {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Role used for anonymous callers and unknown roles. Must exist in `roles`.
    pub default_role: String,

    /// Per-role base limits.
    pub roles: BTreeMap<String, RateLimitConfig>,

    /// Endpoint overrides on top of the role limit.
    pub endpoints: Vec<EndpointLimit>,

    pub adaptive: AdaptiveConfig,

    pub blacklist: BlacklistConfig,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        let mut roles = BTreeMap::new();
        roles.insert(
            "anonymous".to_string(),
            RateLimitConfig::new(60_000, 100, Strategy::SlidingWindow, Scope::Ip),
        );
        roles.insert(
            "user".to_string(),
            RateLimitConfig::new(60_000, 300, Strategy::SlidingWindow, Scope::User),
        );
        roles.insert(
            "admin".to_string(),
            RateLimitConfig {
                burst_multiplier: 2.0,
                ..RateLimitConfig::new(60_000, 1_000, Strategy::TokenBucket, Scope::User)
            },
        );

        Self {
            enabled: true,
            default_role: "anonymous".to_string(),
            roles,
            endpoints: vec![EndpointLimit {
                path_prefix: "/api/auth".to_string(),
                overrides: RateLimitOverride {
                    window_ms: Some(15 * 60_000),
                    max_requests: Some(10),
                    strategy: Some(Strategy::FixedWindow),
                    scope: Some(Scope::Ip),
                    burst_multiplier: None,
                },
            }],
            adaptive: AdaptiveConfig::default(),
            blacklist: BlacklistConfig::default(),
        }
    }
}

/// Load-based scaling of limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdaptiveConfig {
    pub enabled: bool,

    /// CPU utilisation (0..1) above which limits shrink.
    pub cpu_threshold: f64,

    /// Memory utilisation (0..1) above which limits shrink.
    pub memory_threshold: f64,

    /// Multiplier applied per exceeded threshold (0 < f <= 1).
    pub reduction_factor: f64,

    /// Load sampling interval in seconds.
    pub sample_interval_secs: u64,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            cpu_threshold: 0.80,
            memory_threshold: 0.85,
            reduction_factor: 0.5,
            sample_interval_secs: 5,
        }
    }
}

/// Externally flagged identities.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BlacklistConfig {
    /// IP addresses or user ids.
    pub identities: Vec<String>,

    /// Divisor applied to `max_requests` for flagged identities (>= 1).
    pub penalty_factor: f64,
}

impl Default for BlacklistConfig {
    fn default() -> Self {
        Self {
            identities: Vec::new(),
            penalty_factor: 4.0,
        }
    }
}

/// Violation escalation thresholds and block durations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BlockingConfig {
    pub enabled: bool,

    pub max_violations_per_hour: u64,

    pub max_violations_per_day: u64,

    /// Duration of a temporary block in seconds.
    pub temporary_block_secs: u64,

    /// Duration of a permanent block in seconds.
    pub permanent_block_secs: u64,

    /// Schedule a best-effort unblock when a temporary block lapses.
    pub auto_unblock_enabled: bool,

    /// IPs or CIDRs that are never blocked.
    pub whitelist: Vec<String>,

    /// Treat loopback addresses as whitelisted.
    pub whitelist_loopback: bool,

    /// How long violations are retained, in seconds.
    pub violation_retention_secs: u64,

    /// Interval of the expired-block sweep, in seconds.
    pub sweep_interval_secs: u64,

    /// Number of unblock records kept for operators.
    pub history_capacity: usize,
}

impl Default for BlockingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_violations_per_hour: 10,
            max_violations_per_day: 50,
            temporary_block_secs: 3_600,
            permanent_block_secs: 30 * 24 * 3_600,
            auto_unblock_enabled: true,
            whitelist: Vec::new(),
            whitelist_loopback: true,
            violation_retention_secs: 7 * 24 * 3_600,
            sweep_interval_secs: 60,
            history_capacity: 500,
        }
    }
}

/// Threat correlation settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CorrelatorConfig {
    pub enabled: bool,

    /// Look-back window in seconds.
    pub window_secs: u64,

    /// Auth failures / rate-limit hits that raise `rapid_auth_attempts`.
    pub rapid_auth_threshold: usize,

    /// Distinct providers that raise `multiple_provider_attempts`.
    pub provider_threshold: usize,

    /// Case-insensitive user-agent fragments of automation clients.
    pub bot_signatures: Vec<String>,

    /// Cap on events kept per source within the window.
    pub max_events_per_source: usize,

    /// Capacity of the alert broadcast channel.
    pub alert_channel_capacity: usize,
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_secs: 15 * 60,
            rapid_auth_threshold: 10,
            provider_threshold: 3,
            bot_signatures: [
                "curl",
                "wget",
                "python-requests",
                "python-urllib",
                "httpie",
                "go-http-client",
                "libwww-perl",
                "scrapy",
                "headlesschrome",
                "phantomjs",
                "selenium",
                "puppeteer",
                "playwright",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            max_events_per_source: 500,
            alert_channel_capacity: 256,
        }
    }
}

/// Event buffer settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EventBufferConfig {
    /// Pending events that trigger an immediate flush.
    pub capacity: usize,

    /// Background flush interval in milliseconds.
    pub flush_interval_ms: u64,

    /// Events retained in memory for the operator surface.
    pub retained_events: usize,
}

impl Default for EventBufferConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            flush_interval_ms: 5_000,
            retained_events: 10_000,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Placeholder key shipped in defaults; rejected when admin is enabled.
pub const PLACEHOLDER_API_KEY: &str = "CHANGE_ME_IN_PRODUCTION";

/// Operator API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: PLACEHOLDER_API_KEY.to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_consistent() {
        let config = GuardConfig::default();
        assert!(config.rate_limit.roles.contains_key(&config.rate_limit.default_role));
        assert_eq!(config.blocking.max_violations_per_hour, 10);
        assert_eq!(config.correlator.window_secs, 900);
        assert_eq!(config.event_buffer.capacity, 100);
    }

    #[test]
    fn test_endpoint_limit_flattens_overrides() {
        let parsed: EndpointLimit = toml::from_str(
            r#"
            path_prefix = "/api/upload"
            max_requests = 3
            strategy = "token_bucket"
            "#,
        )
        .unwrap();
        assert_eq!(parsed.overrides.max_requests, Some(3));
        assert_eq!(parsed.overrides.strategy, Some(Strategy::TokenBucket));
        assert_eq!(parsed.overrides.window_ms, None);
    }
}
