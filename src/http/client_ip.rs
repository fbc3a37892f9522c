//! Client address and identity extraction.

use axum::extract::ConnectInfo;
use axum::http::{HeaderMap, Request};
use std::net::{IpAddr, SocketAddr};

use crate::ratelimit::types::RateLimitOverride;

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
pub const X_USER_ID: &str = "x-user-id";
pub const X_USER_ROLE: &str = "x-user-role";

/// Authenticated caller, inserted as a request extension by an upstream
/// auth layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: String,
    pub role: String,
}

/// First hop of `X-Forwarded-For`, if it parses.
pub fn forwarded_for(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get(X_FORWARDED_FOR)?
        .to_str()
        .ok()?
        .split(',')
        .next()?
        .trim()
        .parse()
        .ok()
}

/// Client IP: forwarded header when trusted, else the socket peer.
pub fn client_ip<B>(request: &Request<B>, trust_forwarded_for: bool) -> Option<IpAddr> {
    if trust_forwarded_for {
        if let Some(ip) = forwarded_for(request.headers()) {
            return Some(ip);
        }
    }
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_canonical())
}

/// Caller identity: the `Principal` extension, or gateway headers when trusted.
pub fn principal<B>(request: &Request<B>, trust_identity_headers: bool) -> Option<Principal> {
    if let Some(principal) = request.extensions().get::<Principal>() {
        return Some(principal.clone());
    }
    if !trust_identity_headers {
        return None;
    }

    let header = |name: &str| {
        request
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };
    let user_id = header(X_USER_ID)?;
    let role = header(X_USER_ROLE).unwrap_or_else(|| "user".to_string());
    Some(Principal { user_id, role })
}

/// Per-request limit override set by the application.
pub fn overrides<B>(request: &Request<B>) -> Option<RateLimitOverride> {
    request.extensions().get::<RateLimitOverride>().cloned()
}
