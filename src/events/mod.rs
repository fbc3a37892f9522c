//! Security event subsystem.
//!
//! # Data Flow
//! ```text
//! Detectors (rate limiter, blocking, auth, injection, RPC guard, remote)
//!     → normalize.rs (DetectorReport → SecurityEvent, total)
//!     → buffer.rs submit
//!         ├─ critical         → flush now
//!         ├─ capacity reached → flush now
//!         └─ else             → wait for interval tick
//!     flush:
//!         → observers (threat correlator)
//!         → sink.rs (MemoryEventSink, bounded)
//!     operators:
//!         → sink.rs query (filter + paginate)
//!         → export.rs (JSON / CSV)
//! ```
//!
//! # Design Decisions
//! - Flushes are lossy: a failed sink write drops the batch and counts it
//! - Malformed reports classify as low severity instead of being rejected

pub mod buffer;
pub mod export;
pub mod normalize;
pub mod sink;
pub mod types;

pub use buffer::{EventBuffer, EventObserver, FlushTrigger};
pub use export::ExportFormat;
pub use normalize::normalize;
pub use sink::{EventPage, EventQuery, EventSink, MemoryEventSink, SinkError};
pub use types::{origin, DetectorReport, SecurityEvent, SecurityEventType};
