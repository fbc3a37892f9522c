//! Store-backed evaluation with a deadline and fail-open fallback.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use crate::clock::{saturating_after, Clock};
use crate::observability::metrics;
use crate::ratelimit::strategy;
use crate::ratelimit::types::{RateLimitConfig, RateLimitDecision, RateLimitKey};
use crate::resilience::timeouts::with_deadline;
use crate::store::CounterStore;

/// Evaluates limits against the shared counter store.
pub struct RateLimitEvaluator {
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
}

impl RateLimitEvaluator {
    pub fn new(store: Arc<dyn CounterStore>, clock: Arc<dyn Clock>, timeout: Duration) -> Self {
        Self { store, clock, timeout }
    }

    /// Backend name of the underlying store.
    pub fn backend(&self) -> &'static str {
        self.store.backend()
    }

    /// Count this request against `key` and decide.
    ///
    /// A store failure or a round trip slower than the deadline admits the
    /// request with `degraded = true`.
    pub async fn evaluate(&self, key: &RateLimitKey, config: &RateLimitConfig) -> RateLimitDecision {
        let now = self.clock.now();
        let outcome = with_deadline(
            self.timeout,
            strategy::evaluate(self.store.as_ref(), key, config, now),
        )
        .await;

        match outcome {
            Ok(decision) => decision,
            Err(error) => {
                tracing::warn!(
                    degraded = true,
                    component = "rate_limiter",
                    backend = self.store.backend(),
                    key = %key,
                    error = %error,
                    "Counter store unavailable, admitting request"
                );
                metrics::record_degraded("rate_limiter");
                fail_open(config, now)
            }
        }
    }
}

/// Decision used when the store cannot answer.
pub fn fail_open(config: &RateLimitConfig, now: DateTime<Utc>) -> RateLimitDecision {
    RateLimitDecision {
        allowed: true,
        limit: config.max_requests,
        total_hits: 0,
        remaining: config.max_requests,
        reset_time: saturating_after(now, config.window()),
        retry_after: None,
        degraded: true,
    }
}
