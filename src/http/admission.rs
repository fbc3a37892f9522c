//! Admission middleware.
//!
//! Runs the pipeline before the wrapped handler. Allowed requests carry
//! the rate-limit headers; denied ones get a 429 or 403 JSON body and
//! never reach the handler.

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::blocking::types::IpBlockInfo;
use crate::http::client_ip::{client_ip, overrides, principal};
use crate::http::request::RequestIdExt;
use crate::pipeline::{AdmissionDecision, AdmissionPipeline, AdmissionRequest};
use crate::ratelimit::headers::apply_headers;
use crate::ratelimit::types::{ceil_secs, RateLimitDecision};

/// State for [`admission_middleware`].
#[derive(Clone)]
pub struct AdmissionState {
    pub pipeline: Arc<AdmissionPipeline>,
    pub trust_forwarded_for: bool,
    pub trust_identity_headers: bool,
}

/// Body of a 429 or 403 response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DenialBody {
    pub error: &'static str,
    pub message: String,
    pub limit: u64,
    pub remaining: u64,
    /// Epoch seconds.
    pub reset_time: i64,
    pub retry_after: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked_until: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_permanent: Option<bool>,
}

pub async fn admission_middleware(
    State(state): State<AdmissionState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let principal = principal(&request, state.trust_identity_headers);
    let admission = AdmissionRequest {
        ip: client_ip(&request, state.trust_forwarded_for),
        user_id: principal.as_ref().map(|p| p.user_id.clone()),
        role: principal.map(|p| p.role),
        endpoint: request.uri().path().to_string(),
        user_agent: request
            .headers()
            .get(axum::http::header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        request_id: request.request_id().map(str::to_string),
        overrides: overrides(&request),
    };

    match state.pipeline.check(&admission).await {
        AdmissionDecision::Allowed(decision) => {
            let mut response = next.run(request).await;
            if let Some(decision) = decision {
                apply_headers(response.headers_mut(), &decision);
            }
            response
        }
        AdmissionDecision::RateLimited(decision) => rate_limited(&decision),
        AdmissionDecision::Blocked(block) => blocked(&block, state.pipeline.clock().now()),
    }
}

fn rate_limited(decision: &RateLimitDecision) -> Response {
    let retry_after = decision.retry_after_secs().unwrap_or(0);
    let body = DenialBody {
        error: "Too Many Requests",
        message: format!("Rate limit exceeded. Try again in {retry_after} seconds."),
        limit: decision.limit,
        remaining: decision.remaining,
        reset_time: decision.reset_epoch_secs(),
        retry_after,
        reason: None,
        blocked_until: None,
        is_permanent: None,
    };
    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    apply_headers(response.headers_mut(), decision);
    response
}

fn blocked(block: &IpBlockInfo, now: DateTime<Utc>) -> Response {
    let remaining = block.remaining_at(now);
    let retry_after = ceil_secs(remaining);
    let body = DenialBody {
        error: "Forbidden",
        message: if block.is_permanent {
            "Access from this address has been permanently blocked.".to_string()
        } else {
            format!("Access from this address is blocked. Try again in {retry_after} seconds.")
        },
        limit: 0,
        remaining: 0,
        reset_time: block.blocked_until.timestamp(),
        retry_after,
        reason: Some(block.reason.clone()),
        blocked_until: Some(block.blocked_until),
        is_permanent: Some(block.is_permanent),
    };
    let mut response = (StatusCode::FORBIDDEN, Json(body)).into_response();
    if let Ok(value) = retry_after.to_string().parse() {
        response.headers_mut().insert(axum::http::header::RETRY_AFTER, value);
    }
    response
}
