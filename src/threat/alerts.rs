//! Security alerts and their resolution workflow.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::severity::Severity;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AlertError {
    #[error("alert {0} not found")]
    NotFound(Uuid),
}

pub type AlertResult<T> = Result<T, AlertError>;

/// An alert raised by a correlation rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityAlert {
    pub alert_id: Uuid,
    /// Name of the rule that fired, e.g. `rapid_auth_attempts`.
    pub alert_type: String,
    pub severity: Severity,
    pub triggered_at: DateTime<Utc>,
    pub source_ip: String,
    pub source_event_ids: Vec<Uuid>,
    pub affected_identities: Vec<String>,
    pub description: String,
    pub recommendations: Vec<String>,
    pub resolved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution_notes: Option<String>,
}

/// Result of a resolve call. Resolving twice is not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolveOutcome {
    Resolved(SecurityAlert),
    AlreadyResolved(SecurityAlert),
}

impl ResolveOutcome {
    pub fn alert(&self) -> &SecurityAlert {
        match self {
            ResolveOutcome::Resolved(alert) | ResolveOutcome::AlreadyResolved(alert) => alert,
        }
    }
}

/// All alerts, resolved ones kept for audit.
#[derive(Debug, Default)]
pub struct AlertStore {
    alerts: DashMap<Uuid, SecurityAlert>,
}

impl AlertStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, alert: SecurityAlert) {
        self.alerts.insert(alert.alert_id, alert);
    }

    pub fn get(&self, id: Uuid) -> Option<SecurityAlert> {
        self.alerts.get(&id).map(|a| a.clone())
    }

    /// Unresolved alerts, optionally of one severity, newest first.
    pub fn active(&self, severity: Option<Severity>) -> Vec<SecurityAlert> {
        let mut active: Vec<SecurityAlert> = self
            .alerts
            .iter()
            .filter(|a| !a.resolved)
            .filter(|a| severity.map_or(true, |s| a.severity == s))
            .map(|a| a.clone())
            .collect();
        active.sort_by(|a, b| b.triggered_at.cmp(&a.triggered_at));
        active
    }

    pub fn active_count(&self) -> usize {
        self.alerts.iter().filter(|a| !a.resolved).count()
    }

    /// Every alert, newest first.
    pub fn all(&self) -> Vec<SecurityAlert> {
        let mut all: Vec<SecurityAlert> = self.alerts.iter().map(|a| a.clone()).collect();
        all.sort_by(|a, b| b.triggered_at.cmp(&a.triggered_at));
        all
    }

    /// Mark an alert resolved. Terminal; a second call changes nothing.
    pub fn resolve(&self, id: Uuid, by: &str, notes: Option<String>, now: DateTime<Utc>) -> AlertResult<ResolveOutcome> {
        let mut alert = self.alerts.get_mut(&id).ok_or(AlertError::NotFound(id))?;
        if alert.resolved {
            return Ok(ResolveOutcome::AlreadyResolved(alert.clone()));
        }
        alert.resolved = true;
        alert.resolved_by = Some(by.to_string());
        alert.resolved_at = Some(now);
        alert.resolution_notes = notes;
        Ok(ResolveOutcome::Resolved(alert.clone()))
    }
}
