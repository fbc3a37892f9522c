//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, trace + timeout layers)
//!     → request.rs (x-request-id)
//!     → admission.rs
//!         → client_ip.rs (peer or X-Forwarded-For, Principal)
//!         → AdmissionPipeline.check
//!         ├─ allowed → service handler + X-RateLimit-* headers
//!         ├─ 429 rate limited
//!         └─ 403 blocked
//! ```

pub mod admission;
pub mod client_ip;
pub mod request;
pub mod server;

pub use admission::{admission_middleware, AdmissionState, DenialBody};
pub use client_ip::Principal;
pub use request::{RequestIdExt, RequestIdLayer, X_REQUEST_ID};
pub use server::{guard, HttpServer};
