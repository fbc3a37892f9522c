//! In-process store backends.
//!
//! Single-instance only: counters live in this process's memory, so two
//! replicas each see half the traffic. Used for local runs, tests, and as
//! the configured fallback when no Redis URL is given.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::blocking::types::{IpBlockInfo, IpViolation};
use crate::clock::{delta, Clock};
use crate::store::{
    BlockRegistry, BucketSpec, BucketState, CounterHit, CounterStore, StoreResult, ViolationLog,
    TOKEN_EPSILON,
};

#[derive(Debug, Clone, Copy)]
struct CounterEntry {
    value: u64,
    expires_at_ms: i64,
}

#[derive(Debug, Clone, Copy)]
struct BucketEntry {
    tokens: f64,
    last_ms: i64,
    expires_at_ms: i64,
}

fn ttl_ms(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)
}

/// Counter store backed by a sharded map. Expiry follows the injected clock.
pub struct MemoryCounterStore {
    clock: Arc<dyn Clock>,
    counters: DashMap<String, CounterEntry>,
    buckets: DashMap<String, BucketEntry>,
}

impl MemoryCounterStore {
    /// Create an empty store.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            counters: DashMap::new(),
            buckets: DashMap::new(),
        }
    }

    /// Drop expired counters and buckets. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let before = self.counters.len() + self.buckets.len();
        self.counters.retain(|_, entry| entry.expires_at_ms > now);
        self.buckets.retain(|_, entry| entry.expires_at_ms > now);
        before - (self.counters.len() + self.buckets.len())
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn incr(&self, key: &str, ttl: Duration) -> StoreResult<CounterHit> {
        let now = self.clock.now_millis();
        let mut entry = self
            .counters
            .entry(key.to_string())
            .or_insert(CounterEntry {
                value: 0,
                expires_at_ms: now.saturating_add(ttl_ms(ttl)),
            });

        if entry.expires_at_ms <= now {
            entry.value = 0;
            entry.expires_at_ms = now.saturating_add(ttl_ms(ttl));
        }
        entry.value += 1;

        let remaining = u64::try_from(entry.expires_at_ms - now).unwrap_or(0);
        Ok(CounterHit {
            count: entry.value,
            ttl_remaining: Duration::from_millis(remaining),
        })
    }

    async fn get(&self, key: &str) -> StoreResult<Option<u64>> {
        let now = self.clock.now_millis();
        Ok(self
            .counters
            .get(key)
            .filter(|entry| entry.expires_at_ms > now)
            .map(|entry| entry.value))
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.counters.remove(key);
        self.buckets.remove(key);
        Ok(())
    }

    async fn take_token(&self, key: &str, spec: BucketSpec, now_ms: i64) -> StoreResult<BucketState> {
        let mut entry = self.buckets.entry(key.to_string()).or_insert(BucketEntry {
            tokens: spec.capacity,
            last_ms: now_ms,
            expires_at_ms: now_ms.saturating_add(ttl_ms(spec.ttl)),
        });

        if entry.expires_at_ms <= now_ms {
            entry.tokens = spec.capacity;
            entry.last_ms = now_ms;
        }

        let elapsed = (now_ms - entry.last_ms).max(0) as f64;
        entry.tokens = (entry.tokens + elapsed * spec.refill_per_ms).min(spec.capacity);
        entry.last_ms = entry.last_ms.max(now_ms);
        entry.expires_at_ms = now_ms.saturating_add(ttl_ms(spec.ttl));

        let allowed = entry.tokens + TOKEN_EPSILON >= 1.0;
        if allowed {
            entry.tokens = (entry.tokens - 1.0).max(0.0);
        }

        Ok(BucketState {
            allowed,
            tokens: entry.tokens,
        })
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

/// Violation history held per IP.
#[derive(Default)]
pub struct MemoryViolationLog {
    entries: DashMap<IpAddr, Vec<IpViolation>>,
}

impl MemoryViolationLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ViolationLog for MemoryViolationLog {
    async fn append(&self, violation: &IpViolation, retention: Duration) -> StoreResult<()> {
        let cutoff = violation
            .timestamp
            .checked_sub_signed(delta(retention))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let mut history = self.entries.entry(violation.ip).or_default();
        history.retain(|v| v.timestamp > cutoff);
        history.push(violation.clone());
        history.sort_by_key(|v| v.timestamp);
        Ok(())
    }

    async fn since(&self, ip: IpAddr, since: DateTime<Utc>) -> StoreResult<Vec<IpViolation>> {
        Ok(self
            .entries
            .get(&ip)
            .map(|history| {
                history
                    .iter()
                    .filter(|v| v.timestamp >= since)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// Block registry with clock-driven TTL.
pub struct MemoryBlockRegistry {
    clock: Arc<dyn Clock>,
    blocks: DashMap<IpAddr, (IpBlockInfo, i64)>,
}

impl MemoryBlockRegistry {
    /// Create an empty registry.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            blocks: DashMap::new(),
        }
    }
}

#[async_trait]
impl BlockRegistry for MemoryBlockRegistry {
    async fn get(&self, ip: IpAddr) -> StoreResult<Option<IpBlockInfo>> {
        let now = self.clock.now_millis();
        Ok(self
            .blocks
            .get(&ip)
            .filter(|entry| entry.1 > now)
            .map(|entry| entry.0.clone()))
    }

    async fn put(&self, info: &IpBlockInfo, ttl: Duration) -> StoreResult<Option<IpBlockInfo>> {
        let now = self.clock.now_millis();
        let expires_at = now.saturating_add(ttl_ms(ttl));
        Ok(self
            .blocks
            .insert(info.ip, (info.clone(), expires_at))
            .filter(|(_, previous_expiry)| *previous_expiry > now)
            .map(|(previous, _)| previous))
    }

    async fn remove(&self, ip: IpAddr) -> StoreResult<Option<IpBlockInfo>> {
        Ok(self.blocks.remove(&ip).map(|(_, (info, _))| info))
    }

    async fn list(&self) -> StoreResult<Vec<IpBlockInfo>> {
        let now = self.clock.now_millis();
        Ok(self
            .blocks
            .iter()
            .filter(|entry| entry.value().1 > now)
            .map(|entry| entry.value().0.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::severity::Severity;
    use crate::blocking::types::ViolationType;

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::at_millis(1_700_000_000_000))
    }

    #[tokio::test]
    async fn test_incr_counts_and_expires() {
        let clock = clock();
        let store = MemoryCounterStore::new(clock.clone());
        let ttl = Duration::from_secs(60);

        assert_eq!(store.incr("k", ttl).await.unwrap().count, 1);
        let hit = store.incr("k", ttl).await.unwrap();
        assert_eq!(hit.count, 2);
        assert_eq!(hit.ttl_remaining, ttl);

        clock.advance(Duration::from_secs(59));
        assert_eq!(store.get("k").await.unwrap(), Some(2));

        clock.advance(Duration::from_secs(1));
        assert_eq!(store.get("k").await.unwrap(), None);
        assert_eq!(store.incr("k", ttl).await.unwrap().count, 1);
    }

    #[tokio::test]
    async fn test_bucket_never_exceeds_capacity() {
        let clock = clock();
        let store = MemoryCounterStore::new(clock.clone());
        let spec = BucketSpec {
            capacity: 3.0,
            refill_per_ms: 1.0,
            ttl: Duration::from_secs(10),
        };
        let now = clock.now_millis();

        let first = store.take_token("b", spec, now).await.unwrap();
        assert!(first.allowed);
        assert_eq!(first.tokens, 2.0);

        // A long idle period refills to capacity, not beyond.
        let later = store.take_token("b", spec, now + 60_000).await.unwrap();
        assert!(later.allowed);
        assert_eq!(later.tokens, 2.0);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let clock = clock();
        let store = MemoryCounterStore::new(clock.clone());
        store.incr("a", Duration::from_secs(1)).await.unwrap();
        store.incr("b", Duration::from_secs(10)).await.unwrap();

        clock.advance(Duration::from_secs(2));
        assert_eq!(store.purge_expired(), 1);
    }

    #[tokio::test]
    async fn test_violation_log_retention() {
        let clock = clock();
        let log = MemoryViolationLog::new();
        let ip: IpAddr = "10.1.1.1".parse().unwrap();
        let retention = Duration::from_secs(3600);

        let old = IpViolation::new(ip, ViolationType::AuthFailure, "/login", Severity::Low, clock.now());
        log.append(&old, retention).await.unwrap();

        clock.advance(Duration::from_secs(7200));
        let fresh = IpViolation::new(ip, ViolationType::AuthFailure, "/login", Severity::Low, clock.now());
        log.append(&fresh, retention).await.unwrap();

        let all = log.since(ip, DateTime::<Utc>::MIN_UTC).await.unwrap();
        assert_eq!(all, vec![fresh]);
    }

    #[tokio::test]
    async fn test_block_registry_replaces() {
        let clock = clock();
        let registry = MemoryBlockRegistry::new(clock.clone());
        let ip: IpAddr = "10.0.0.9".parse().unwrap();
        let now = clock.now();
        let block = IpBlockInfo {
            ip,
            blocked_at: now,
            blocked_until: now + chrono::TimeDelta::seconds(30),
            reason: "first".into(),
            is_permanent: false,
            unblocked_at: None,
            unblocked_by: None,
        };

        assert!(registry.put(&block, Duration::from_secs(30)).await.unwrap().is_none());
        let second = IpBlockInfo { reason: "second".into(), ..block.clone() };
        let replaced = registry.put(&second, Duration::from_secs(30)).await.unwrap();
        assert_eq!(replaced.map(|b| b.reason), Some("first".to_string()));
        assert_eq!(registry.list().await.unwrap().len(), 1);

        clock.advance(Duration::from_secs(31));
        assert!(registry.get(ip).await.unwrap().is_none());
    }
}
