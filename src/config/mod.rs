//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize; missing scope/strategy is fatal)
//!     → validation.rs (semantic checks)
//!     → GuardConfig (validated, immutable)
//!     → components built from it at startup
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → atomic swap of the policy tables
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; reload swaps whole policy tables
//! - All fields have defaults to allow minimal configs, except the limit
//!   fields whose absence would silently weaken the security boundary
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AdaptiveConfig, AdminConfig, BlacklistConfig, BlockingConfig, CorrelatorConfig, EndpointLimit,
    EventBufferConfig, GuardConfig, ListenerConfig, LogFormat, ObservabilityConfig,
    RateLimitSettings, StoreBackend, StoreConfig,
};
