//! Rate limiting subsystem.
//!
//! # Data Flow
//! ```text
//! Request (role, user, ip, endpoint)
//!     → policy.rs (role → endpoint → caller override)
//!     → policy.rs (adapt_for_load, apply_blacklist_penalty)
//!     → types.rs (RateLimitKey per scope)
//!     → evaluator.rs (deadline + fail-open)
//!         → strategy.rs (fixed / sliding / token / leaky)
//!             → store (atomic incr / take_token)
//!     → headers.rs (X-RateLimit-*, Retry-After)
//! ```
//!
//! # Design Decisions
//! - Counters live only in the shared store; no local cache
//! - The policy table is an immutable snapshot swapped on reload
//! - Load samples are taken off the request path by `load.rs`

pub mod evaluator;
pub mod headers;
pub mod load;
pub mod policy;
pub mod strategy;
pub mod types;

pub use evaluator::RateLimitEvaluator;
pub use load::{LoadMonitor, LoadSample};
pub use policy::{adapt_for_load, apply_blacklist_penalty, PolicyTable};
pub use types::{
    Identity, RateLimitConfig, RateLimitDecision, RateLimitKey, RateLimitOverride, Scope, Strategy,
};
