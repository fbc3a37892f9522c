//! Rate-limit response headers.

use axum::http::{HeaderMap, HeaderName, HeaderValue};

use crate::ratelimit::types::RateLimitDecision;

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");
pub const X_RATELIMIT_USED: HeaderName = HeaderName::from_static("x-ratelimit-used");

/// Write limit headers, plus `Retry-After` on denial.
pub fn apply_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(decision.reset_epoch_secs()));
    headers.insert(X_RATELIMIT_USED, HeaderValue::from(decision.total_hits));

    if let Some(secs) = decision.retry_after_secs() {
        headers.insert(axum::http::header::RETRY_AFTER, HeaderValue::from(secs));
    }
}
