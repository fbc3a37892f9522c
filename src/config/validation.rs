//! Configuration validation.
//!
//! Serde handles syntax (including the mandatory `scope` / `strategy`
//! fields); this module checks value ranges and cross-field consistency.
//! All errors are collected, not just the first.

use ipnet::IpNet;
use std::net::IpAddr;
use thiserror::Error;

use crate::blocking::engine::MAX_BLOCK_DURATION;
use crate::config::schema::{GuardConfig, StoreBackend, PLACEHOLDER_API_KEY};
use crate::ratelimit::types::{RateLimitConfig, MAX_WINDOW_MS};

/// One semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Parse a whitelist entry as a single address or a CIDR block.
pub fn parse_network(entry: &str) -> Option<IpNet> {
    let entry = entry.trim();
    entry
        .parse::<IpNet>()
        .ok()
        .or_else(|| entry.parse::<IpAddr>().ok().map(IpNet::from))
}

fn check_limit(field: &str, limit: &RateLimitConfig, errors: &mut Vec<ValidationError>) {
    if limit.window_ms == 0 {
        errors.push(ValidationError::new(format!("{field}.window_ms"), "must be greater than zero"));
    }
    if limit.window_ms > MAX_WINDOW_MS {
        errors.push(ValidationError::new(format!("{field}.window_ms"), format!("must be at most {MAX_WINDOW_MS}")));
    }
    if limit.max_requests == 0 {
        errors.push(ValidationError::new(format!("{field}.max_requests"), "must be greater than zero"));
    }
    if !(limit.burst_multiplier >= 1.0) {
        errors.push(ValidationError::new(format!("{field}.burst_multiplier"), "must be at least 1.0"));
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &GuardConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.request_timeout_secs == 0 {
        errors.push(ValidationError::new("listener.request_timeout_secs", "must be greater than zero"));
    }

    // Store
    if config.store.backend == StoreBackend::Redis
        && config.store.redis_url.as_deref().map_or(true, str::is_empty)
    {
        errors.push(ValidationError::new("store.redis_url", "required for the redis backend"));
    }
    if !(1..=1_000).contains(&config.store.timeout_ms) {
        errors.push(ValidationError::new("store.timeout_ms", "must be between 1 and 1000"));
    }

    // Rate limiting
    let rate_limit = &config.rate_limit;
    if !rate_limit.roles.contains_key(&rate_limit.default_role) {
        errors.push(ValidationError::new(
            "rate_limit.default_role",
            format!("role '{}' is not defined in rate_limit.roles", rate_limit.default_role),
        ));
    }
    for (role, limit) in &rate_limit.roles {
        check_limit(&format!("rate_limit.roles.{role}"), limit, &mut errors);
    }
    for (i, endpoint) in rate_limit.endpoints.iter().enumerate() {
        let field = format!("rate_limit.endpoints[{i}]");
        if !endpoint.path_prefix.starts_with('/') {
            errors.push(ValidationError::new(format!("{field}.path_prefix"), "must start with '/'"));
        }
        if endpoint.overrides.window_ms == Some(0) {
            errors.push(ValidationError::new(format!("{field}.window_ms"), "must be greater than zero"));
        }
        if endpoint.overrides.window_ms.is_some_and(|ms| ms > MAX_WINDOW_MS) {
            errors.push(ValidationError::new(format!("{field}.window_ms"), format!("must be at most {MAX_WINDOW_MS}")));
        }
        if endpoint.overrides.max_requests == Some(0) {
            errors.push(ValidationError::new(format!("{field}.max_requests"), "must be greater than zero"));
        }
        if endpoint.overrides.burst_multiplier.is_some_and(|m| !(m >= 1.0)) {
            errors.push(ValidationError::new(format!("{field}.burst_multiplier"), "must be at least 1.0"));
        }
    }
    let adaptive = &rate_limit.adaptive;
    if !(adaptive.reduction_factor > 0.0 && adaptive.reduction_factor <= 1.0) {
        errors.push(ValidationError::new("rate_limit.adaptive.reduction_factor", "must be in (0, 1]"));
    }
    if !(adaptive.cpu_threshold > 0.0) || !(adaptive.memory_threshold > 0.0) {
        errors.push(ValidationError::new("rate_limit.adaptive", "thresholds must be positive"));
    }
    if adaptive.enabled && adaptive.sample_interval_secs == 0 {
        errors.push(ValidationError::new("rate_limit.adaptive.sample_interval_secs", "must be greater than zero"));
    }
    if !(rate_limit.blacklist.penalty_factor >= 1.0) {
        errors.push(ValidationError::new("rate_limit.blacklist.penalty_factor", "must be at least 1.0"));
    }

    // Blocking
    let blocking = &config.blocking;
    if blocking.max_violations_per_hour == 0 {
        errors.push(ValidationError::new("blocking.max_violations_per_hour", "must be greater than zero"));
    }
    if blocking.max_violations_per_day == 0 {
        errors.push(ValidationError::new("blocking.max_violations_per_day", "must be greater than zero"));
    }
    if blocking.temporary_block_secs == 0 || blocking.permanent_block_secs == 0 {
        errors.push(ValidationError::new("blocking", "block durations must be greater than zero"));
    }
    let max_block_secs = MAX_BLOCK_DURATION.as_secs();
    for (field, secs) in [
        ("blocking.temporary_block_secs", blocking.temporary_block_secs),
        ("blocking.permanent_block_secs", blocking.permanent_block_secs),
    ] {
        if secs > max_block_secs {
            errors.push(ValidationError::new(field, format!("must be at most {max_block_secs}")));
        }
    }
    if blocking.violation_retention_secs < 24 * 3_600 {
        errors.push(ValidationError::new(
            "blocking.violation_retention_secs",
            "must cover at least the daily escalation window",
        ));
    }
    if blocking.sweep_interval_secs == 0 {
        errors.push(ValidationError::new("blocking.sweep_interval_secs", "must be greater than zero"));
    }
    for entry in &blocking.whitelist {
        if parse_network(entry).is_none() {
            errors.push(ValidationError::new(
                "blocking.whitelist",
                format!("'{entry}' is not an IP address or CIDR block"),
            ));
        }
    }

    // Correlator
    let correlator = &config.correlator;
    if correlator.window_secs == 0 {
        errors.push(ValidationError::new("correlator.window_secs", "must be greater than zero"));
    }
    if correlator.rapid_auth_threshold == 0 || correlator.provider_threshold == 0 {
        errors.push(ValidationError::new("correlator", "thresholds must be greater than zero"));
    }
    if correlator.max_events_per_source < correlator.rapid_auth_threshold {
        errors.push(ValidationError::new(
            "correlator.max_events_per_source",
            "must be at least rapid_auth_threshold",
        ));
    }
    if correlator.alert_channel_capacity == 0 {
        errors.push(ValidationError::new("correlator.alert_channel_capacity", "must be greater than zero"));
    }

    // Event buffer
    if config.event_buffer.capacity == 0 {
        errors.push(ValidationError::new("event_buffer.capacity", "must be greater than zero"));
    }
    if config.event_buffer.flush_interval_ms == 0 {
        errors.push(ValidationError::new("event_buffer.flush_interval_ms", "must be greater than zero"));
    }

    // Admin
    if config.admin.enabled && (config.admin.api_key.is_empty() || config.admin.api_key == PLACEHOLDER_API_KEY) {
        errors.push(ValidationError::new("admin.api_key", "must be set when the admin API is enabled"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert_eq!(validate_config(&GuardConfig::default()), Ok(()));
    }

    #[test]
    fn test_collects_every_error() {
        let mut config = GuardConfig::default();
        config.store.backend = StoreBackend::Redis;
        config.rate_limit.default_role = "ghost".into();
        config.blocking.whitelist.push("not-an-ip".into());
        config.admin.enabled = true;

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"store.redis_url"));
        assert!(fields.contains(&"rate_limit.default_role"));
        assert!(fields.contains(&"blocking.whitelist"));
        assert!(fields.contains(&"admin.api_key"));
    }

    #[test]
    fn test_rejects_block_durations_beyond_maximum() {
        let mut config = GuardConfig::default();
        config.blocking.permanent_block_secs = u64::MAX;
        config.blocking.temporary_block_secs = MAX_BLOCK_DURATION.as_secs() + 1;

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"blocking.permanent_block_secs"));
        assert!(fields.contains(&"blocking.temporary_block_secs"));

        config.blocking.permanent_block_secs = MAX_BLOCK_DURATION.as_secs();
        config.blocking.temporary_block_secs = 3_600;
        assert_eq!(validate_config(&config), Ok(()));
    }

    #[test]
    fn test_parse_network_accepts_addresses_and_cidrs() {
        assert!(parse_network("10.0.0.0/8").is_some());
        assert!(parse_network("192.168.1.10").is_some());
        assert!(parse_network("::1").is_some());
        assert!(parse_network("10.0.0.0/40").is_none());
    }
}
