//! Counting algorithms over a [`CounterStore`].
//!
//! | Strategy         | Store keys                    | Round trips |
//! |------------------|-------------------------------|-------------|
//! | `fixed_window`   | `<key>:fw` (TTL = window)     | 1 incr      |
//! | `sliding_window` | `<key>:sw:<index>` (TTL = 2w) | incr + get, issued concurrently |
//! | `token_bucket`   | `<key>:tb`                    | 1 take      |
//! | `leaky_bucket`   | `<key>:lb`                    | 1 take      |

use chrono::{DateTime, TimeZone, Utc};
use std::time::Duration;

use crate::clock::saturating_after;
use crate::ratelimit::types::{RateLimitConfig, RateLimitDecision, RateLimitKey, Strategy};
use crate::store::{BucketSpec, CounterStore, StoreResult};

/// Run the configured strategy for one request.
pub async fn evaluate(
    store: &dyn CounterStore,
    key: &RateLimitKey,
    config: &RateLimitConfig,
    now: DateTime<Utc>,
) -> StoreResult<RateLimitDecision> {
    match config.strategy {
        Strategy::FixedWindow => fixed_window(store, key, config, now).await,
        Strategy::SlidingWindow => sliding_window(store, key, config, now).await,
        Strategy::TokenBucket => {
            let capacity = config.max_requests as f64 * config.burst_multiplier.max(1.0);
            bucket(store, &key.child("tb"), config, capacity, now).await
        }
        Strategy::LeakyBucket => bucket(store, &key.child("lb"), config, config.max_requests as f64, now).await,
    }
}

/// Counter created on first hit; resets when its TTL lapses.
async fn fixed_window(
    store: &dyn CounterStore,
    key: &RateLimitKey,
    config: &RateLimitConfig,
    now: DateTime<Utc>,
) -> StoreResult<RateLimitDecision> {
    let hit = store.incr(&key.child("fw"), config.window()).await?;
    let allowed = hit.count <= config.max_requests;

    Ok(RateLimitDecision {
        allowed,
        limit: config.max_requests,
        total_hits: hit.count,
        remaining: config.max_requests.saturating_sub(hit.count),
        reset_time: saturating_after(now, hit.ttl_remaining),
        retry_after: (!allowed).then_some(hit.ttl_remaining),
        degraded: false,
    })
}

/// Weighted estimate over the current and previous aligned windows.
async fn sliding_window(
    store: &dyn CounterStore,
    key: &RateLimitKey,
    config: &RateLimitConfig,
    now: DateTime<Utc>,
) -> StoreResult<RateLimitDecision> {
    let window_ms = config.window_ms.max(1) as i64;
    let now_ms = now.timestamp_millis();
    let index = now_ms.div_euclid(window_ms);
    let elapsed_ms = now_ms.rem_euclid(window_ms);

    let current_key = key.child(format_args!("sw:{index}"));
    let previous_key = key.child(format_args!("sw:{}", index - 1));
    let (current, previous) = tokio::join!(
        store.incr(&current_key, Duration::from_millis(2 * window_ms as u64)),
        store.get(&previous_key),
    );
    let current = current?;
    let previous = previous?.unwrap_or(0);

    let weight = 1.0 - elapsed_ms as f64 / window_ms as f64;
    let estimate = previous as f64 * weight + current.count as f64;
    let total_hits = estimate.floor() as u64;
    let allowed = estimate <= config.max_requests as f64;

    let window_end_ms = (index + 1) * window_ms;
    let reset_time = Utc
        .timestamp_millis_opt(window_end_ms)
        .single()
        .unwrap_or(now);
    let until_reset = Duration::from_millis((window_end_ms - now_ms).max(0) as u64);

    Ok(RateLimitDecision {
        allowed,
        limit: config.max_requests,
        total_hits,
        remaining: config.max_requests.saturating_sub(total_hits),
        reset_time,
        retry_after: (!allowed).then_some(until_reset),
        degraded: false,
    })
}

/// Refill-and-take bucket. Refill rate is `max_requests / window`.
async fn bucket(
    store: &dyn CounterStore,
    bucket_key: &str,
    config: &RateLimitConfig,
    capacity: f64,
    now: DateTime<Utc>,
) -> StoreResult<RateLimitDecision> {
    let window_ms = config.window_ms.max(1) as f64;
    let refill_per_ms = config.max_requests as f64 / window_ms;
    let full_refill_ms = (capacity / refill_per_ms).ceil().max(window_ms) as u64;

    let spec = BucketSpec {
        capacity,
        refill_per_ms,
        ttl: Duration::from_millis(full_refill_ms),
    };
    let state = store.take_token(bucket_key, spec, now.timestamp_millis()).await?;

    let limit = capacity.floor() as u64;
    let remaining = state.tokens.floor().max(0.0) as u64;
    let deficit = (capacity - state.tokens).max(0.0);
    let refill_ms = |tokens: f64| (tokens * window_ms / config.max_requests.max(1) as f64).ceil() as u64;
    let until_full = Duration::from_millis(refill_ms(deficit));
    let retry_after = (!state.allowed)
        .then(|| Duration::from_millis(refill_ms((1.0 - state.tokens).max(0.0)).max(1)));

    Ok(RateLimitDecision {
        allowed: state.allowed,
        limit,
        total_hits: deficit.ceil() as u64,
        remaining,
        reset_time: saturating_after(now, until_full),
        retry_after,
        degraded: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::ratelimit::types::{Identity, Scope};
    use crate::store::MemoryCounterStore;
    use std::net::IpAddr;
    use std::sync::Arc;

    fn key() -> RateLimitKey {
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        RateLimitKey::derive(Scope::Ip, &Identity::Ip(ip), ip, "/login")
    }

    #[tokio::test]
    async fn test_fixed_window_denies_sixth_then_resets() {
        let clock = Arc::new(ManualClock::at_millis(1_700_000_000_000));
        let store = MemoryCounterStore::new(clock.clone());
        let config = RateLimitConfig::new(60_000, 5, Strategy::FixedWindow, Scope::Ip);
        let key = key();

        for i in 1..=5 {
            let decision = evaluate(&store, &key, &config, clock.now()).await.unwrap();
            assert!(decision.allowed, "request {i} should pass");
            assert_eq!(decision.remaining, 5 - i);
        }

        let denied = evaluate(&store, &key, &config, clock.now()).await.unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert_eq!(denied.retry_after_secs(), Some(60));

        clock.advance(Duration::from_secs(61));
        let fresh = evaluate(&store, &key, &config, clock.now()).await.unwrap();
        assert!(fresh.allowed);
        assert_eq!(fresh.total_hits, 1);
    }

    #[tokio::test]
    async fn test_sliding_window_weights_previous_window() {
        // Aligned to a window boundary.
        let clock = Arc::new(ManualClock::at_millis(1_700_000_040_000));
        let store = MemoryCounterStore::new(clock.clone());
        let config = RateLimitConfig::new(10_000, 4, Strategy::SlidingWindow, Scope::Ip);
        let key = key();

        for _ in 0..4 {
            assert!(evaluate(&store, &key, &config, clock.now()).await.unwrap().allowed);
        }

        // Half way into the next window, the previous 4 count as 2.
        clock.advance(Duration::from_millis(15_000));
        let first = evaluate(&store, &key, &config, clock.now()).await.unwrap();
        assert!(first.allowed);
        assert_eq!(first.total_hits, 3);
        let second = evaluate(&store, &key, &config, clock.now()).await.unwrap();
        assert!(second.allowed);
        let third = evaluate(&store, &key, &config, clock.now()).await.unwrap();
        assert!(!third.allowed);
        assert_eq!(third.retry_after, Some(Duration::from_millis(5_000)));
    }

    #[tokio::test]
    async fn test_token_bucket_refills_one_per_second() {
        let clock = Arc::new(ManualClock::at_millis(1_700_000_000_000));
        let store = MemoryCounterStore::new(clock.clone());
        let config = RateLimitConfig::new(10_000, 10, Strategy::TokenBucket, Scope::Ip);
        let key = key();

        for _ in 0..10 {
            assert!(evaluate(&store, &key, &config, clock.now()).await.unwrap().allowed);
        }
        let denied = evaluate(&store, &key, &config, clock.now()).await.unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.retry_after, Some(Duration::from_secs(1)));

        clock.advance(Duration::from_secs(1));
        assert!(evaluate(&store, &key, &config, clock.now()).await.unwrap().allowed);
        assert!(!evaluate(&store, &key, &config, clock.now()).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_token_bucket_burst_multiplier_raises_capacity() {
        let clock = Arc::new(ManualClock::at_millis(1_700_000_000_000));
        let store = MemoryCounterStore::new(clock.clone());
        let config = RateLimitConfig {
            burst_multiplier: 2.0,
            ..RateLimitConfig::new(10_000, 5, Strategy::TokenBucket, Scope::Ip)
        };
        let key = key();

        let first = evaluate(&store, &key, &config, clock.now()).await.unwrap();
        assert_eq!(first.limit, 10);
        for _ in 1..10 {
            assert!(evaluate(&store, &key, &config, clock.now()).await.unwrap().allowed);
        }
        assert!(!evaluate(&store, &key, &config, clock.now()).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_leaky_bucket_ignores_burst() {
        let clock = Arc::new(ManualClock::at_millis(1_700_000_000_000));
        let store = MemoryCounterStore::new(clock.clone());
        let config = RateLimitConfig {
            burst_multiplier: 3.0,
            ..RateLimitConfig::new(1_000, 2, Strategy::LeakyBucket, Scope::Ip)
        };
        let key = key();

        assert!(evaluate(&store, &key, &config, clock.now()).await.unwrap().allowed);
        assert!(evaluate(&store, &key, &config, clock.now()).await.unwrap().allowed);
        let denied = evaluate(&store, &key, &config, clock.now()).await.unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.limit, 2);

        clock.advance(Duration::from_millis(500));
        assert!(evaluate(&store, &key, &config, clock.now()).await.unwrap().allowed);
    }
}
