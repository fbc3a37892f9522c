//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call into a shared store:
//!     → timeouts.rs (bound the round trip)
//!     → On timeout or error: caller logs degraded mode and fails open
//! ```
//!
//! # Design Decisions
//! - Every store round trip on the request path has a deadline
//! - No retries on the request path; a failed round trip degrades to allow

pub mod timeouts;
