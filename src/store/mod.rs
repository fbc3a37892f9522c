//! Shared state backends.
//!
//! # Data Flow
//! ```text
//! ratelimit evaluator ──incr / take_token──▶ CounterStore
//! blocking engine     ──append / since────▶ ViolationLog
//!                     ──get / put / remove─▶ BlockRegistry
//! ```
//!
//! Each call is a single round trip. Counter updates are atomic on the
//! backend (Lua scripts on Redis, shard-locked entries in memory); callers
//! never read-then-write.
//!
//! The in-memory backends are only authoritative for a single process. In a
//! multi-instance deployment they under-count, so production wiring uses
//! the Redis backends.

pub mod memory;
pub mod redis;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::net::IpAddr;
use std::time::Duration;
use thiserror::Error;

use crate::blocking::types::{IpBlockInfo, IpViolation};

pub use memory::{MemoryBlockRegistry, MemoryCounterStore, MemoryViolationLog};
pub use self::redis::RedisStore;

/// Failures talking to a backing store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// Connection refused, reset, or backend error reply.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Round trip exceeded its deadline.
    #[error("store round trip exceeded {0} ms")]
    Timeout(u64),

    /// Stored value could not be decoded.
    #[error("corrupt store value for '{key}': {reason}")]
    Corrupt { key: String, reason: String },
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Outcome of an atomic increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterHit {
    /// Post-increment value.
    pub count: u64,
    /// Time until the counter expires.
    pub ttl_remaining: Duration,
}

/// Parameters of a refill-and-consume bucket operation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketSpec {
    /// Maximum tokens held.
    pub capacity: f64,
    /// Tokens added per elapsed millisecond.
    pub refill_per_ms: f64,
    /// Idle expiry of the bucket state.
    pub ttl: Duration,
}

/// Bucket state after a take attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketState {
    pub allowed: bool,
    /// Tokens left after the attempt.
    pub tokens: f64,
}

/// Tolerance for floating token accumulation.
pub const TOKEN_EPSILON: f64 = 1e-9;

/// Atomic counters with expiry.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment `key`, creating it with `ttl` on first hit.
    async fn incr(&self, key: &str, ttl: Duration) -> StoreResult<CounterHit>;

    /// Read a counter without touching it.
    async fn get(&self, key: &str) -> StoreResult<Option<u64>>;

    /// Drop a counter.
    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// Refill the bucket at `key` for the time elapsed since its last
    /// update, then try to take one token. Never exceeds capacity.
    async fn take_token(&self, key: &str, spec: BucketSpec, now_ms: i64) -> StoreResult<BucketState>;

    /// Short backend name for logs and status.
    fn backend(&self) -> &'static str;
}

/// Append-only violation history.
#[async_trait]
pub trait ViolationLog: Send + Sync {
    /// Append a violation; entries older than `retention` may be discarded.
    async fn append(&self, violation: &IpViolation, retention: Duration) -> StoreResult<()>;

    /// Violations for `ip` at or after `since`, oldest first.
    async fn since(&self, ip: IpAddr, since: DateTime<Utc>) -> StoreResult<Vec<IpViolation>>;
}

/// Registry of active blocks, one per IP.
#[async_trait]
pub trait BlockRegistry: Send + Sync {
    /// Active block entry for `ip`, if the store still holds one.
    async fn get(&self, ip: IpAddr) -> StoreResult<Option<IpBlockInfo>>;

    /// Insert or replace the block for `info.ip`. Returns the replaced entry.
    async fn put(&self, info: &IpBlockInfo, ttl: Duration) -> StoreResult<Option<IpBlockInfo>>;

    /// Remove the block for `ip`. Returns the removed entry.
    async fn remove(&self, ip: IpAddr) -> StoreResult<Option<IpBlockInfo>>;

    /// All entries still held.
    async fn list(&self) -> StoreResult<Vec<IpBlockInfo>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(StoreError::Timeout(25).to_string(), "store round trip exceeded 25 ms");
        let err = StoreError::Corrupt {
            key: "block:1.2.3.4".into(),
            reason: "bad json".into(),
        };
        assert!(err.to_string().contains("block:1.2.3.4"));
    }
}
