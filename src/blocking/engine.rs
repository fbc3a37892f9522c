//! Violation escalation and IP blocking.

use arc_swap::ArcSwap;
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::blocking::access::AccessList;
use crate::blocking::types::{IpBlockInfo, IpViolation, IpViolationCount};
use crate::clock::{delta, saturating_after, Clock};
use crate::config::schema::BlockingConfig;
use crate::observability::metrics;
use crate::resilience::timeouts::with_deadline;
use crate::severity::Severity;
use crate::store::{BlockRegistry, StoreResult, ViolationLog};

/// Sink for violations raised outside the request path (e.g. correlation).
#[async_trait]
pub trait ViolationRecorder: Send + Sync {
    /// Record a violation; returns the block it caused, if any.
    async fn record_violation(&self, violation: IpViolation) -> Option<IpBlockInfo>;
}

/// Who ended a block.
const UNBLOCKED_BY_EXPIRY: &str = "expiry";
const UNBLOCKED_BY_SWEEP: &str = "sweep";
const UNBLOCKED_BY_TIMER: &str = "auto_unblock";

/// Registry entries outlive `blocked_until` by this much so expiry is
/// observed by the read path, not by the store TTL.
const REGISTRY_GRACE: Duration = Duration::from_secs(3_600);

/// Longest block the engine will store. Longer requests are clamped.
pub const MAX_BLOCK_DURATION: Duration = Duration::from_secs(100 * 365 * 24 * 3_600);

/// Aggregate counts plus the retained violations for one IP.
#[derive(Debug, Clone, Serialize)]
pub struct ViolationSummary {
    #[serde(flatten)]
    pub counts: IpViolationCount,
    pub violations: Vec<IpViolation>,
}

/// Bounded record of ended blocks.
#[derive(Debug)]
struct UnblockHistory {
    entries: Mutex<VecDeque<IpBlockInfo>>,
    capacity: usize,
}

impl UnblockHistory {
    fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(1_024))),
            capacity,
        }
    }

    fn record(&self, mut info: IpBlockInfo, by: &str, at: DateTime<Utc>) {
        info.unblocked_at = Some(at);
        info.unblocked_by = Some(by.to_string());

        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if self.capacity == 0 {
            return;
        }
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(info);
    }

    /// Newest first.
    fn recent(&self) -> Vec<IpBlockInfo> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.iter().rev().cloned().collect()
    }
}

/// Config snapshot read on every call; swapped whole on reload.
#[derive(Debug)]
struct BlockingPolicy {
    config: BlockingConfig,
    access: AccessList,
}

/// Records violations, escalates to blocks and answers `is_blocked`.
///
/// Expiry is decided at read time against the injected clock. The
/// auto-unblock timer and the periodic sweep only clean up entries the
/// read path would treat as expired anyway.
pub struct IpBlockingEngine {
    violations: Arc<dyn ViolationLog>,
    registry: Arc<dyn BlockRegistry>,
    clock: Arc<dyn Clock>,
    policy: ArcSwap<BlockingPolicy>,
    history: Arc<UnblockHistory>,
    timeout: Duration,
}

impl IpBlockingEngine {
    pub fn new(
        violations: Arc<dyn ViolationLog>,
        registry: Arc<dyn BlockRegistry>,
        clock: Arc<dyn Clock>,
        config: BlockingConfig,
        timeout: Duration,
    ) -> Self {
        let history = Arc::new(UnblockHistory::new(config.history_capacity));
        Self {
            violations,
            registry,
            clock,
            policy: ArcSwap::from_pointee(BlockingPolicy {
                access: AccessList::from_config(&config),
                config,
            }),
            history,
            timeout,
        }
    }

    /// Swap in new thresholds and whitelist.
    pub fn apply_config(&self, config: BlockingConfig) {
        let access = AccessList::from_config(&config);
        tracing::info!(
            whitelist_entries = access.len(),
            max_per_hour = config.max_violations_per_hour,
            max_per_day = config.max_violations_per_day,
            "Blocking policy updated"
        );
        self.policy.store(Arc::new(BlockingPolicy { config, access }));
    }

    pub fn is_whitelisted(&self, ip: IpAddr) -> bool {
        self.policy.load().access.contains(ip)
    }

    /// Configured block length for a manual block without an explicit duration.
    pub fn default_block_duration(&self, permanent: bool) -> Duration {
        let policy = self.policy.load();
        if permanent {
            Duration::from_secs(policy.config.permanent_block_secs)
        } else {
            Duration::from_secs(policy.config.temporary_block_secs)
        }
    }

    /// Append a violation and escalate if thresholds are crossed.
    ///
    /// Escalation order, first match wins:
    /// 1. critical severity → permanent block
    /// 2. daily count at threshold → permanent block
    /// 3. hourly count at threshold → temporary block
    pub async fn record_violation(&self, violation: IpViolation) -> Option<IpBlockInfo> {
        let policy = self.policy.load_full();
        let config = &policy.config;
        let retention = Duration::from_secs(config.violation_retention_secs);

        metrics::record_violation(violation.violation_type.as_str(), violation.severity.as_str());
        tracing::debug!(
            ip = %violation.ip,
            violation_type = %violation.violation_type,
            severity = %violation.severity,
            endpoint = %violation.endpoint,
            "Violation recorded"
        );

        if let Err(error) = with_deadline(self.timeout, self.violations.append(&violation, retention)).await {
            self.degraded("violation_log", &error);
            return None;
        }

        if !config.enabled {
            return None;
        }
        if policy.access.contains(violation.ip) {
            tracing::debug!(ip = %violation.ip, "Whitelisted address, escalation skipped");
            return None;
        }

        let counts = if violation.severity == Severity::Critical {
            None
        } else {
            match self.violation_counts(violation.ip).await {
                Ok(counts) => Some(counts),
                Err(error) => {
                    self.degraded("violation_log", &error);
                    return None;
                }
            }
        };

        let (permanent, reason) = match counts {
            None => (true, format!("critical {}", violation.violation_type)),
            Some(c) if c.daily_count >= config.max_violations_per_day => (
                true,
                format!("{} violations in 24h (limit {})", c.daily_count, config.max_violations_per_day),
            ),
            Some(c) if c.hourly_count >= config.max_violations_per_hour => (
                false,
                format!("{} violations in 1h (limit {})", c.hourly_count, config.max_violations_per_hour),
            ),
            Some(_) => return None,
        };

        let duration = if permanent {
            Duration::from_secs(config.permanent_block_secs)
        } else {
            Duration::from_secs(config.temporary_block_secs)
        };

        match self.escalate(violation.ip, reason, duration, permanent, config).await {
            Ok(block) => block,
            Err(error) => {
                self.degraded("block_registry", &error);
                None
            }
        }
    }

    async fn escalate(
        &self,
        ip: IpAddr,
        reason: String,
        duration: Duration,
        permanent: bool,
        config: &BlockingConfig,
    ) -> StoreResult<Option<IpBlockInfo>> {
        if !permanent {
            let existing = with_deadline(self.timeout, self.registry.get(ip)).await?;
            if let Some(active) = existing.filter(|b| b.is_permanent && !b.is_expired_at(self.clock.now())) {
                tracing::debug!(ip = %ip, until = %active.blocked_until, "Permanent block kept over temporary escalation");
                return Ok(None);
            }
        }
        let block = self.put_block(ip, reason, duration, permanent, config).await?;
        Ok(Some(block))
    }

    /// Block `ip` for `duration`. Replaces any active block.
    pub async fn block(
        &self,
        ip: IpAddr,
        reason: impl Into<String>,
        duration: Duration,
        permanent: bool,
    ) -> StoreResult<IpBlockInfo> {
        let policy = self.policy.load_full();
        self.put_block(ip, reason.into(), duration, permanent, &policy.config).await
    }

    async fn put_block(
        &self,
        ip: IpAddr,
        reason: String,
        duration: Duration,
        permanent: bool,
        config: &BlockingConfig,
    ) -> StoreResult<IpBlockInfo> {
        let now = self.clock.now();
        let duration = duration.min(MAX_BLOCK_DURATION);
        let info = IpBlockInfo {
            ip,
            blocked_at: now,
            blocked_until: saturating_after(now, duration),
            reason,
            is_permanent: permanent,
            unblocked_at: None,
            unblocked_by: None,
        };

        let replaced = with_deadline(self.timeout, self.registry.put(&info, duration.saturating_add(REGISTRY_GRACE))).await?;
        if let Some(previous) = replaced.filter(|p| !p.is_expired_at(now)) {
            tracing::warn!(
                ip = %ip,
                previous_until = %previous.blocked_until,
                previous_permanent = previous.is_permanent,
                new_until = %info.blocked_until,
                "Replacing existing block"
            );
        }

        metrics::record_block(permanent);
        tracing::warn!(
            ip = %ip,
            reason = %info.reason,
            permanent,
            blocked_until = %info.blocked_until,
            "IP blocked"
        );

        if config.auto_unblock_enabled && !permanent {
            self.schedule_unblock(&info, duration);
        }
        Ok(info)
    }

    /// Best-effort cleanup once the block lapses. Skipped outside a runtime.
    fn schedule_unblock(&self, info: &IpBlockInfo, duration: Duration) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let registry = Arc::clone(&self.registry);
        let clock = Arc::clone(&self.clock);
        let history = Arc::clone(&self.history);
        let timeout = self.timeout;
        let ip = info.ip;
        let blocked_until = info.blocked_until;

        handle.spawn(async move {
            tokio::time::sleep(duration).await;
            let now = clock.now();
            let current = match with_deadline(timeout, registry.get(ip)).await {
                Ok(Some(current)) => current,
                _ => return,
            };
            // A newer block replaced this one; leave it alone.
            if current.blocked_until != blocked_until || !current.is_expired_at(now) {
                return;
            }
            if let Ok(Some(removed)) = with_deadline(timeout, registry.remove(ip)).await {
                tracing::info!(ip = %ip, "Temporary block lapsed, unblocked");
                metrics::record_unblock(UNBLOCKED_BY_TIMER);
                history.record(removed, UNBLOCKED_BY_TIMER, now);
            }
        });
    }

    /// Active block for `ip`, if any. Whitelisted addresses never touch the
    /// registry; an unreachable registry reads as not blocked.
    pub async fn is_blocked(&self, ip: IpAddr) -> Option<IpBlockInfo> {
        if self.policy.load().access.contains(ip) {
            return None;
        }

        let entry = match with_deadline(self.timeout, self.registry.get(ip)).await {
            Ok(entry) => entry?,
            Err(error) => {
                self.degraded("block_registry", &error);
                return None;
            }
        };

        let now = self.clock.now();
        if !entry.is_expired_at(now) {
            return Some(entry);
        }

        match with_deadline(self.timeout, self.registry.remove(ip)).await {
            Ok(Some(removed)) if removed.is_expired_at(now) => {
                tracing::info!(ip = %ip, "Block expired, unblocked on read");
                metrics::record_unblock(UNBLOCKED_BY_EXPIRY);
                self.history.record(removed, UNBLOCKED_BY_EXPIRY, now);
            }
            Ok(Some(newer)) => {
                // Raced with a fresh block; put it back.
                let ttl = newer.remaining_at(now) + REGISTRY_GRACE;
                if let Err(error) = with_deadline(self.timeout, self.registry.put(&newer, ttl)).await {
                    self.degraded("block_registry", &error);
                }
                return Some(newer);
            }
            Ok(None) => {}
            Err(error) => self.degraded("block_registry", &error),
        }
        None
    }

    /// Lift the block on `ip`. Returns the removed block.
    pub async fn unblock(&self, ip: IpAddr, by: &str, reason: &str) -> StoreResult<Option<IpBlockInfo>> {
        let removed = with_deadline(self.timeout, self.registry.remove(ip)).await?;
        if let Some(info) = &removed {
            tracing::info!(ip = %ip, unblocked_by = %by, reason = %reason, "IP unblocked");
            metrics::record_unblock("manual");
            self.history.record(info.clone(), by, self.clock.now());
        }
        Ok(removed)
    }

    /// Active blocks, soonest expiry first. Lapsed entries are skipped.
    pub async fn list_blocks(&self) -> StoreResult<Vec<IpBlockInfo>> {
        let now = self.clock.now();
        let mut blocks: Vec<IpBlockInfo> = with_deadline(self.timeout, self.registry.list())
            .await?
            .into_iter()
            .filter(|b| !b.is_expired_at(now))
            .collect();
        blocks.sort_by_key(|b| b.blocked_until);
        Ok(blocks)
    }

    /// Recently ended blocks, newest first.
    pub fn history(&self) -> Vec<IpBlockInfo> {
        self.history.recent()
    }

    /// Hourly and daily counts for `ip`.
    pub async fn violation_counts(&self, ip: IpAddr) -> StoreResult<IpViolationCount> {
        let now = self.clock.now();
        let day = with_deadline(self.timeout, self.violations.since(ip, now - TimeDelta::hours(24))).await?;
        Ok(count_violations(ip, &day, now))
    }

    /// Counts plus retained violations for operators.
    pub async fn violation_summary(&self, ip: IpAddr) -> StoreResult<ViolationSummary> {
        let now = self.clock.now();
        let retention = delta(Duration::from_secs(self.policy.load().config.violation_retention_secs));
        let since = now.checked_sub_signed(retention).unwrap_or(DateTime::<Utc>::MIN_UTC);
        let violations = with_deadline(self.timeout, self.violations.since(ip, since)).await?;
        Ok(ViolationSummary {
            counts: count_violations(ip, &violations, now),
            violations,
        })
    }

    /// Remove every lapsed block. Returns how many were removed.
    pub async fn sweep_expired(&self) -> StoreResult<usize> {
        let now = self.clock.now();
        let entries = with_deadline(self.timeout, self.registry.list()).await?;
        let mut removed = 0;

        for entry in entries.into_iter().filter(|b| b.is_expired_at(now)) {
            if let Some(info) = with_deadline(self.timeout, self.registry.remove(entry.ip)).await? {
                metrics::record_unblock(UNBLOCKED_BY_SWEEP);
                self.history.record(info, UNBLOCKED_BY_SWEEP, now);
                removed += 1;
            }
        }

        if removed > 0 {
            tracing::info!(removed, "Expired blocks swept");
        }
        Ok(removed)
    }

    fn degraded(&self, component: &'static str, error: &dyn std::fmt::Display) {
        tracing::warn!(
            degraded = true,
            component,
            error = %error,
            "Blocking store unavailable, failing open"
        );
        metrics::record_degraded(component);
    }
}

#[async_trait]
impl ViolationRecorder for IpBlockingEngine {
    async fn record_violation(&self, violation: IpViolation) -> Option<IpBlockInfo> {
        IpBlockingEngine::record_violation(self, violation).await
    }
}

fn count_violations(ip: IpAddr, violations: &[IpViolation], now: DateTime<Utc>) -> IpViolationCount {
    let hour_ago = now - TimeDelta::hours(1);
    let day_ago = now - TimeDelta::hours(24);
    IpViolationCount {
        ip,
        hourly_count: violations.iter().filter(|v| v.timestamp >= hour_ago).count() as u64,
        daily_count: violations.iter().filter(|v| v.timestamp >= day_ago).count() as u64,
    }
}
