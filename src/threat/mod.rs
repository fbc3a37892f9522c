//! Threat correlation subsystem.
//!
//! # Data Flow
//! ```text
//! EventBuffer flush
//!     → correlator.rs on_event
//!         → per-IP window (last 15 min, capped)
//!         → rules.rs (each CorrelationRule independently)
//!         → dedup key <alert_type>:<source_ip>
//!         → alerts.rs AlertStore + broadcast channel
//!         → optional suspicious_activity violation → blocking
//!
//! Operators
//!     → active_alerts(severity?) / resolve(id, by, notes)
//! ```
//!
//! # Design Decisions
//! - Rules are trait objects; new rules do not touch existing ones
//! - Dedup uses a map entry, not a lock per identity
//! - Resolution is terminal and idempotent; resolved alerts are kept

pub mod alerts;
pub mod correlator;
pub mod rules;

pub use alerts::{AlertError, AlertStore, ResolveOutcome, SecurityAlert};
pub use correlator::ThreatCorrelator;
pub use rules::{BotSignatureRule, CorrelationRule, MultipleProviderRule, RapidAuthRule, RuleMatch};
