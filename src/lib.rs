//! Admission control for HTTP services.
//!
//! Decides per request whether it may proceed, given rate limits, IP
//! blocks and correlated threat signals, and keeps an auditable trail of
//! security events and alerts.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────────────▶ http::admission ──▶ pipeline ──▶ blocking::IpBlockingEngine
//!                                            │                 │
//!                                            ▼                 ▼
//!                                   ratelimit::Evaluator    store (memory | redis)
//!                                            │
//!                      denial / block        ▼
//!                      ───────────────▶ events::EventBuffer ──▶ sink
//!                                            │
//!                                            ▼
//!                                   threat::ThreatCorrelator ──▶ alerts
//!                                            │
//!                                            └─ suspicious_activity ──▶ blocking
//! ```
//!
//! Cross-cutting: `config` (TOML, validation, hot reload), `observability`
//! (tracing, Prometheus), `lifecycle` (startup, signals, shutdown),
//! `admin` (operator API).

pub mod clock;
pub mod severity;

// Core subsystems
pub mod blocking;
pub mod events;
pub mod pipeline;
pub mod ratelimit;
pub mod store;
pub mod threat;

// Surfaces
pub mod admin;
pub mod http;

// Cross-cutting concerns
pub mod config;
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use config::schema::GuardConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use pipeline::{AdmissionDecision, AdmissionPipeline, AdmissionRequest, Stores};
