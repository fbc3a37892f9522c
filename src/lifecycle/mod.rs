//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Init logging/metrics → Build stores → Wire pipeline
//!     → Spawn background tasks → Bind listeners
//!
//! Background (maintenance.rs, events, load monitor, watcher):
//!     tokio::select! { tick => work, shutdown => exit loop }
//!
//! Shutdown (shutdown.rs, signals.rs):
//!     SIGTERM/SIGINT → broadcast → listeners drain → final event flush
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then core, then listeners
//! - One broadcast channel reaches every task
//! - The event buffer flushes once more after the signal

pub mod maintenance;
pub mod shutdown;
pub mod signals;
pub mod startup;

pub use maintenance::Maintenance;
pub use shutdown::Shutdown;
pub use startup::{run, start, Running, StartupError};
