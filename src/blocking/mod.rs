//! Violation recording and IP blocking subsystem.
//!
//! # Data Flow
//! ```text
//! Rate-limit denial / correlator feedback / detector
//!     → engine.rs record_violation
//!         → ViolationLog.append (retention 7d)
//!         → hourly / daily counts
//!         → escalation (critical → daily → hourly)
//!         → BlockRegistry.put (replace, never stack)
//!
//! Every request
//!     → engine.rs is_blocked
//!         → access.rs (whitelist / loopback short-circuit)
//!         → BlockRegistry.get
//!         → read-time expiry (delete + "not blocked")
//! ```
//!
//! # Design Decisions
//! - Read-time expiry against the injected clock is authoritative
//! - Auto-unblock timers and the sweep are best-effort cleanup only
//! - Registry or log failures fail open with a degraded warning

pub mod access;
pub mod engine;
pub mod types;

pub use access::AccessList;
pub use engine::{IpBlockingEngine, ViolationRecorder, ViolationSummary};
pub use types::{IpBlockInfo, IpViolation, IpViolationCount, ViolationType};
