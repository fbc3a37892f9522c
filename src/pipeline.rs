//! Admission pipeline wiring.
//!
//! # Data Flow
//! ```text
//! AdmissionRequest
//!     → IpBlockingEngine.is_blocked ──blocked──▶ event(ip_blocked) → Blocked
//!     → PolicyTable.resolve → adapt_for_load → apply_blacklist_penalty
//!     → RateLimitEvaluator.evaluate
//!         ├─ allowed → Allowed
//!         └─ denied  → record_violation(rate_limit_exceeded)
//!                    → event(rate_limit_exceeded) → RateLimited
//! ```
//!
//! Every collaborator is passed in; there is no process-global state.

use arc_swap::ArcSwap;
use serde::Serialize;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::blocking::engine::IpBlockingEngine;
use crate::blocking::types::{IpBlockInfo, IpViolation, ViolationType};
use crate::clock::Clock;
use crate::config::schema::GuardConfig;
use crate::config::ConfigError;
use crate::events::buffer::EventBuffer;
use crate::events::sink::MemoryEventSink;
use crate::events::types::{origin, DetectorReport, SecurityEvent, SecurityEventType};
use crate::observability::metrics;
use crate::ratelimit::evaluator::RateLimitEvaluator;
use crate::ratelimit::load::LoadMonitor;
use crate::ratelimit::policy::{adapt_for_load, apply_blacklist_penalty, PolicyTable};
use crate::ratelimit::types::{Identity, RateLimitDecision, RateLimitKey, RateLimitOverride};
use crate::severity::Severity;
use crate::store::{BlockRegistry, CounterStore, ViolationLog};
use crate::threat::correlator::ThreatCorrelator;

/// Backing stores injected into the pipeline.
#[derive(Clone)]
pub struct Stores {
    pub counters: Arc<dyn CounterStore>,
    pub violations: Arc<dyn ViolationLog>,
    pub blocks: Arc<dyn BlockRegistry>,
}

/// What the pipeline needs to know about one request.
#[derive(Debug, Clone, Default)]
pub struct AdmissionRequest {
    pub ip: Option<IpAddr>,
    pub user_id: Option<String>,
    pub role: Option<String>,
    pub endpoint: String,
    pub user_agent: Option<String>,
    pub request_id: Option<String>,
    pub overrides: Option<RateLimitOverride>,
}

impl AdmissionRequest {
    pub fn new(ip: IpAddr, endpoint: impl Into<String>) -> Self {
        Self {
            ip: Some(ip),
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>, role: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self.role = Some(role.into());
        self
    }
}

/// Outcome of one admission check.
#[derive(Debug, Clone, PartialEq)]
pub enum AdmissionDecision {
    /// Proceed. `None` when rate limiting is switched off.
    Allowed(Option<RateLimitDecision>),
    RateLimited(RateLimitDecision),
    Blocked(IpBlockInfo),
}

impl AdmissionDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AdmissionDecision::Allowed(_))
    }

    fn outcome(&self) -> &'static str {
        match self {
            AdmissionDecision::Allowed(Some(d)) if d.degraded => "degraded",
            AdmissionDecision::Allowed(_) => "allowed",
            AdmissionDecision::RateLimited(_) => "rate_limited",
            AdmissionDecision::Blocked(_) => "blocked",
        }
    }
}

/// Operator-facing snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStatus {
    pub version: &'static str,
    pub store_backend: &'static str,
    pub rate_limiting_enabled: bool,
    pub pending_events: usize,
    pub retained_events: usize,
    pub active_alerts: usize,
    pub tracked_sources: usize,
}

/// The admission-control pipeline with its collaborators.
pub struct AdmissionPipeline {
    policy: ArcSwap<PolicyTable>,
    evaluator: RateLimitEvaluator,
    blocking: Arc<IpBlockingEngine>,
    correlator: Arc<ThreatCorrelator>,
    events: Arc<EventBuffer>,
    sink: Arc<MemoryEventSink>,
    load: Arc<LoadMonitor>,
    clock: Arc<dyn Clock>,
}

impl AdmissionPipeline {
    /// Wire every component from configuration and injected stores.
    pub fn new(config: &GuardConfig, stores: Stores, clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
        let policy = PolicyTable::from_settings(&config.rate_limit)?;
        let timeout = Duration::from_millis(config.store.timeout_ms);

        let evaluator = RateLimitEvaluator::new(stores.counters, clock.clone(), timeout);
        let blocking = Arc::new(IpBlockingEngine::new(
            stores.violations,
            stores.blocks,
            clock.clone(),
            config.blocking.clone(),
            timeout,
        ));
        let correlator = Arc::new(
            ThreatCorrelator::new(&config.correlator, clock.clone()).with_recorder(blocking.clone()),
        );
        let sink = Arc::new(MemoryEventSink::new(config.event_buffer.retained_events));
        let events = Arc::new(
            EventBuffer::new(&config.event_buffer, sink.clone(), clock.clone()).with_observer(correlator.clone()),
        );

        Ok(Self {
            policy: ArcSwap::from_pointee(policy),
            evaluator,
            blocking,
            correlator,
            events,
            sink,
            load: Arc::new(LoadMonitor::new()),
            clock,
        })
    }

    /// Decide whether a request may proceed.
    pub async fn check(&self, request: &AdmissionRequest) -> AdmissionDecision {
        let decision = self.decide(request).await;
        metrics::record_decision(decision.outcome());
        decision
    }

    async fn decide(&self, request: &AdmissionRequest) -> AdmissionDecision {
        let Some(ip) = request.ip else {
            // No client address: nothing to block or key on.
            tracing::debug!(endpoint = %request.endpoint, "Request without client address admitted");
            return AdmissionDecision::Allowed(None);
        };

        if let Some(block) = self.blocking.is_blocked(ip).await {
            tracing::debug!(ip = %ip, until = %block.blocked_until, "Request from blocked IP refused");
            let event = self
                .event(request, ip, SecurityEventType::IpBlocked, Severity::Medium, origin::IP_BLOCKING)
                .blocked(true)
                .with_details(serde_json::json!({
                    "reason": block.reason,
                    "permanent": block.is_permanent,
                }));
            self.events.submit(event).await;
            return AdmissionDecision::Blocked(block);
        }

        let policy = self.policy.load_full();
        if !policy.enabled() {
            return AdmissionDecision::Allowed(None);
        }

        let identity = Identity::from_parts(request.user_id.as_deref(), ip);
        let mut limit = policy.resolve(request.role.as_deref(), &request.endpoint, request.overrides.as_ref());
        limit = adapt_for_load(&limit, &self.load.current(), policy.adaptive());
        if policy.is_blacklisted(&identity, ip) {
            limit = apply_blacklist_penalty(&limit, policy.penalty_factor());
        }

        let key = RateLimitKey::derive(limit.scope, &identity, ip, &request.endpoint);
        let decision = self.evaluator.evaluate(&key, &limit).await;
        if decision.allowed {
            return AdmissionDecision::Allowed(Some(decision));
        }

        tracing::info!(
            ip = %ip,
            identity = %identity,
            key = %key,
            limit = decision.limit,
            hits = decision.total_hits,
            "Rate limit exceeded"
        );

        let violation = IpViolation::new(
            ip,
            ViolationType::RateLimitExceeded,
            request.endpoint.clone(),
            Severity::Medium,
            self.clock.now(),
        )
        .with_details(serde_json::json!({
            "key": key.as_str(),
            "limit": decision.limit,
            "strategy": limit.strategy.as_str(),
        }));
        let escalated = self.blocking.record_violation(violation).await;

        let event = self
            .event(request, ip, SecurityEventType::RateLimitExceeded, Severity::Medium, origin::RATE_LIMITER)
            .blocked(escalated.is_some())
            .with_details(serde_json::json!({
                "limit": decision.limit,
                "total_hits": decision.total_hits,
                "scope": limit.scope.as_str(),
            }));
        self.events.submit(event).await;

        AdmissionDecision::RateLimited(decision)
    }

    fn event(
        &self,
        request: &AdmissionRequest,
        ip: IpAddr,
        event_type: SecurityEventType,
        severity: Severity,
        middleware: &str,
    ) -> SecurityEvent {
        let event = SecurityEvent::new(event_type, severity, ip.to_string(), request.endpoint.clone(), middleware, self.clock.now())
            .with_user(request.user_id.clone())
            .with_user_agent(request.user_agent.clone());
        match &request.request_id {
            Some(id) => event.with_correlation_id(id.clone()),
            None => event,
        }
    }

    /// Accept a report from any detector.
    pub async fn report(&self, report: DetectorReport) -> SecurityEvent {
        self.events.submit_report(report).await
    }

    /// Swap policy tables after a reload. The previous tables stay on error.
    pub fn apply_config(&self, config: &GuardConfig) -> Result<(), ConfigError> {
        let policy = PolicyTable::from_settings(&config.rate_limit)?;
        self.policy.store(Arc::new(policy));
        self.blocking.apply_config(config.blocking.clone());
        tracing::info!("Admission policy reloaded");
        Ok(())
    }

    pub fn status(&self) -> PipelineStatus {
        PipelineStatus {
            version: env!("CARGO_PKG_VERSION"),
            store_backend: self.evaluator.backend(),
            rate_limiting_enabled: self.policy.load().enabled(),
            pending_events: self.events.pending_len(),
            retained_events: self.sink.len(),
            active_alerts: self.correlator.active_alert_count(),
            tracked_sources: self.correlator.tracked_sources(),
        }
    }

    pub fn blocking(&self) -> &Arc<IpBlockingEngine> {
        &self.blocking
    }

    pub fn correlator(&self) -> &Arc<ThreatCorrelator> {
        &self.correlator
    }

    pub fn events(&self) -> &Arc<EventBuffer> {
        &self.events
    }

    pub fn sink(&self) -> &Arc<MemoryEventSink> {
        &self.sink
    }

    pub fn load_monitor(&self) -> &Arc<LoadMonitor> {
        &self.load
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::ratelimit::types::{Scope, Strategy};
    use crate::ratelimit::RateLimitConfig;
    use crate::store::{MemoryBlockRegistry, MemoryCounterStore, MemoryViolationLog};

    fn pipeline(config: &GuardConfig) -> (AdmissionPipeline, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::at_millis(1_700_000_000_000));
        let stores = Stores {
            counters: Arc::new(MemoryCounterStore::new(clock.clone())),
            violations: Arc::new(MemoryViolationLog::new()),
            blocks: Arc::new(MemoryBlockRegistry::new(clock.clone())),
        };
        (AdmissionPipeline::new(config, stores, clock.clone()).unwrap(), clock)
    }

    fn strict_config() -> GuardConfig {
        let mut config = GuardConfig::default();
        config.rate_limit.roles.insert(
            "anonymous".into(),
            RateLimitConfig::new(60_000, 2, Strategy::FixedWindow, Scope::Ip),
        );
        config.rate_limit.endpoints.clear();
        config
    }

    #[tokio::test]
    async fn test_denial_records_violation_and_event() {
        let (pipeline, _clock) = pipeline(&strict_config());
        let ip: IpAddr = "203.0.113.9".parse().unwrap();
        let request = AdmissionRequest::new(ip, "/api/items");

        assert!(pipeline.check(&request).await.is_allowed());
        assert!(pipeline.check(&request).await.is_allowed());
        assert!(matches!(pipeline.check(&request).await, AdmissionDecision::RateLimited(_)));

        let summary = pipeline.blocking().violation_summary(ip).await.unwrap();
        assert_eq!(summary.counts.hourly_count, 1);
        assert_eq!(pipeline.events().pending_len(), 1);
    }

    #[tokio::test]
    async fn test_repeated_denials_escalate_to_block() {
        let (pipeline, _clock) = pipeline(&strict_config());
        let ip: IpAddr = "203.0.113.10".parse().unwrap();
        let request = AdmissionRequest::new(ip, "/api/items");

        for _ in 0..2 {
            pipeline.check(&request).await;
        }
        for _ in 0..10 {
            assert!(matches!(pipeline.check(&request).await, AdmissionDecision::RateLimited(_)));
        }
        match pipeline.check(&request).await {
            AdmissionDecision::Blocked(block) => assert!(!block.is_permanent),
            other => panic!("expected block, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_reload_swaps_policy() {
        let (pipeline, _clock) = pipeline(&strict_config());
        let ip: IpAddr = "203.0.113.11".parse().unwrap();
        let request = AdmissionRequest::new(ip, "/api/items");

        let mut relaxed = strict_config();
        relaxed.rate_limit.enabled = false;
        pipeline.apply_config(&relaxed).unwrap();

        for _ in 0..5 {
            assert_eq!(pipeline.check(&request).await, AdmissionDecision::Allowed(None));
        }
        assert!(!pipeline.status().rate_limiting_enabled);
    }

    #[tokio::test]
    async fn test_blacklisted_identity_gets_reduced_limit() {
        let mut config = strict_config();
        config.rate_limit.roles.insert(
            "anonymous".into(),
            RateLimitConfig::new(60_000, 8, Strategy::FixedWindow, Scope::Ip),
        );
        config.rate_limit.blacklist.identities = vec!["203.0.113.12".into()];
        let (pipeline, _clock) = pipeline(&config);
        let request = AdmissionRequest::new("203.0.113.12".parse().unwrap(), "/api/items");

        match pipeline.check(&request).await {
            AdmissionDecision::Allowed(Some(decision)) => assert_eq!(decision.limit, 2),
            other => panic!("unexpected {other:?}"),
        }
    }
}
