//! Limit resolution and pure scaling functions.
//!
//! # Resolution order (last wins)
//! ```text
//! role default → endpoint default (longest prefix) → caller override
//!     → adapt_for_load (system pressure)
//!     → apply_blacklist_penalty (flagged identity)
//! ```
//!
//! Scaling functions never touch shared state: they map a config and a
//! sample to a new config.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;

use crate::config::schema::{AdaptiveConfig, EndpointLimit, RateLimitSettings};
use crate::config::validation::ValidationError;
use crate::config::ConfigError;
use crate::ratelimit::load::LoadSample;
use crate::ratelimit::types::{normalize_endpoint, Identity, RateLimitConfig, RateLimitOverride};

/// Immutable snapshot of the rate-limit policy. Swapped whole on reload.
#[derive(Debug, Clone)]
pub struct PolicyTable {
    enabled: bool,
    roles: HashMap<String, RateLimitConfig>,
    default_limit: RateLimitConfig,
    endpoints: Vec<EndpointLimit>,
    blacklist: HashSet<String>,
    penalty_factor: f64,
    adaptive: AdaptiveConfig,
}

impl PolicyTable {
    /// Build from validated settings.
    pub fn from_settings(settings: &RateLimitSettings) -> Result<Self, ConfigError> {
        let default_limit = settings
            .roles
            .get(&settings.default_role)
            .cloned()
            .ok_or_else(|| {
                ConfigError::Validation(vec![ValidationError {
                    field: "rate_limit.default_role".to_string(),
                    message: format!("role '{}' is not defined", settings.default_role),
                }])
            })?;

        let mut endpoints = settings.endpoints.clone();
        endpoints.sort_by(|a, b| b.path_prefix.len().cmp(&a.path_prefix.len()));

        Ok(Self {
            enabled: settings.enabled,
            roles: settings.roles.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            default_limit,
            endpoints,
            blacklist: settings
                .blacklist
                .identities
                .iter()
                .map(|s| s.trim().to_string())
                .collect(),
            penalty_factor: settings.blacklist.penalty_factor,
            adaptive: settings.adaptive.clone(),
        })
    }

    /// Whether rate limiting is switched on.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Resolve the limit for a request.
    pub fn resolve(
        &self,
        role: Option<&str>,
        endpoint: &str,
        caller: Option<&RateLimitOverride>,
    ) -> RateLimitConfig {
        let mut limit = role
            .and_then(|r| self.roles.get(r))
            .unwrap_or(&self.default_limit)
            .clone();

        let path = normalize_endpoint(endpoint);
        if let Some(endpoint_limit) = self
            .endpoints
            .iter()
            .find(|e| path.starts_with(e.path_prefix.as_str()))
        {
            limit = limit.with_overrides(&endpoint_limit.overrides);
        }

        if let Some(overrides) = caller {
            limit = limit.with_overrides(overrides);
        }
        limit
    }

    /// Whether the identity or its IP is externally flagged.
    pub fn is_blacklisted(&self, identity: &Identity, ip: IpAddr) -> bool {
        if self.blacklist.is_empty() {
            return false;
        }
        let by_user = match identity {
            Identity::User(id) => self.blacklist.contains(id),
            Identity::Ip(_) => false,
        };
        by_user || self.blacklist.contains(&ip.to_string())
    }

    pub fn penalty_factor(&self) -> f64 {
        self.penalty_factor
    }

    pub fn adaptive(&self) -> &AdaptiveConfig {
        &self.adaptive
    }
}

fn scaled_max(max: u64, factor: f64) -> u64 {
    ((max as f64) * factor).floor().max(1.0) as u64
}

/// Shrink `max_requests` once per load threshold exceeded. Pure.
pub fn adapt_for_load(base: &RateLimitConfig, load: &LoadSample, adaptive: &AdaptiveConfig) -> RateLimitConfig {
    if !adaptive.enabled {
        return base.clone();
    }

    let mut factor = 1.0;
    if load.cpu > adaptive.cpu_threshold {
        factor *= adaptive.reduction_factor;
    }
    if load.memory > adaptive.memory_threshold {
        factor *= adaptive.reduction_factor;
    }

    RateLimitConfig {
        max_requests: scaled_max(base.max_requests, factor),
        ..base.clone()
    }
}

/// Divide `max_requests` by the penalty factor (>= 1). Pure.
pub fn apply_blacklist_penalty(base: &RateLimitConfig, penalty_factor: f64) -> RateLimitConfig {
    let factor = if penalty_factor >= 1.0 { penalty_factor } else { 1.0 };
    RateLimitConfig {
        max_requests: scaled_max(base.max_requests, 1.0 / factor),
        ..base.clone()
    }
}
