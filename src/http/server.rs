//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router for the guarded service
//! - Wire up middleware (tracing, timeout, request ID, admission)
//! - Bind server to listener and shut down on the broadcast signal

use axum::{
    extract::State,
    http::{Request, StatusCode},
    middleware,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::schema::GuardConfig;
use crate::http::admission::{admission_middleware, AdmissionState};
use crate::http::request::{RequestIdExt, RequestIdLayer};
use crate::pipeline::AdmissionPipeline;

/// Put `router` behind the admission middleware.
pub fn guard(router: Router, state: AdmissionState) -> Router {
    router.layer(middleware::from_fn_with_state(state, admission_middleware))
}

/// HTTP server for the guarded service.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    /// Create a server around the default admitted-request handler.
    pub fn new(config: &GuardConfig, pipeline: Arc<AdmissionPipeline>) -> Self {
        let state = AdmissionState {
            pipeline: pipeline.clone(),
            trust_forwarded_for: config.listener.trust_forwarded_for,
            trust_identity_headers: config.listener.trust_identity_headers,
        };
        let service = guard(Router::new().fallback(admitted_handler), state);
        Self {
            router: Self::build_router(config, service, pipeline),
        }
    }

    /// Wrap an application router instead of the default handler.
    pub fn with_service(config: &GuardConfig, pipeline: Arc<AdmissionPipeline>, service: Router) -> Self {
        let state = AdmissionState {
            pipeline: pipeline.clone(),
            trust_forwarded_for: config.listener.trust_forwarded_for,
            trust_identity_headers: config.listener.trust_identity_headers,
        };
        Self {
            router: Self::build_router(config, guard(service, state), pipeline),
        }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &GuardConfig, service: Router, pipeline: Arc<AdmissionPipeline>) -> Router {
        Router::new()
            .route("/healthz", get(healthz))
            .with_state(pipeline)
            .merge(service)
            .layer(TimeoutLayer::new(Duration::from_secs(config.listener.request_timeout_secs)))
            .layer(RequestIdLayer)
            .layer(TraceLayer::new_for_http())
    }

    /// The full router, for in-process testing.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the server until the shutdown signal fires.
    pub async fn run(self, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

async fn admitted_handler(request: Request<axum::body::Body>) -> impl IntoResponse {
    tracing::debug!(
        request_id = request.request_id().unwrap_or("unknown"),
        path = %request.uri().path(),
        "Request admitted"
    );
    Json(serde_json::json!({
        "status": "admitted",
        "path": request.uri().path(),
        "requestId": request.request_id(),
    }))
}

async fn healthz(State(pipeline): State<Arc<AdmissionPipeline>>) -> impl IntoResponse {
    (StatusCode::OK, Json(pipeline.status()))
}
