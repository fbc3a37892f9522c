//! Request identification.
//!
//! Every request gets an `x-request-id` as early as possible. An incoming
//! id from a trusted edge is kept; otherwise a UUID v4 is generated. The
//! id is echoed on the response and reused as the correlation id of any
//! security event the request produces.

use axum::http::{HeaderName, Request};
use tower::Layer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestId, SetRequestId};

pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Sets and propagates `x-request-id`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestIdLayer;

impl<S> Layer<S> for RequestIdLayer {
    type Service = SetRequestId<PropagateRequestId<S>, MakeRequestUuid>;

    fn layer(&self, inner: S) -> Self::Service {
        SetRequestId::new(
            PropagateRequestId::new(inner, X_REQUEST_ID),
            X_REQUEST_ID,
            MakeRequestUuid,
        )
    }
}

/// Read the request id set by [`RequestIdLayer`].
pub trait RequestIdExt {
    fn request_id(&self) -> Option<&str>;
}

impl<B> RequestIdExt for Request<B> {
    fn request_id(&self) -> Option<&str> {
        self.headers().get(X_REQUEST_ID).and_then(|v| v.to_str().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::routing::get;
    use axum::Router;
    use tower::ServiceExt;

    async fn echo(request: Request<Body>) -> String {
        request.request_id().unwrap_or("missing").to_string()
    }

    #[tokio::test]
    async fn test_generates_and_propagates_id() {
        let app = Router::new().route("/", get(echo)).layer(RequestIdLayer);
        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let header = response.headers().get(X_REQUEST_ID).unwrap().to_str().unwrap().to_string();
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(header.as_bytes(), &body[..]);
        assert_eq!(header.len(), 36);
    }

    #[tokio::test]
    async fn test_keeps_incoming_id() {
        let app = Router::new().route("/", get(echo)).layer(RequestIdLayer);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/")
                    .header("x-request-id", "edge-123")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.headers().get(X_REQUEST_ID).unwrap(), "edge-123");
    }
}
