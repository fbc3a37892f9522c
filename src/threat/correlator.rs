//! Per-source event windows, rule evaluation and alert dedup.

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::blocking::engine::ViolationRecorder;
use crate::blocking::types::{IpViolation, ViolationType};
use crate::clock::{delta, Clock};
use crate::config::schema::CorrelatorConfig;
use crate::events::buffer::EventObserver;
use crate::events::types::SecurityEvent;
use crate::observability::metrics;
use crate::severity::Severity;
use crate::threat::alerts::{AlertResult, AlertStore, ResolveOutcome, SecurityAlert};
use crate::threat::rules::{default_rules, CorrelationRule, RuleMatch};

/// When a dedup key last produced an alert.
#[derive(Debug, Clone, Copy)]
struct Fired {
    alert_id: Uuid,
    at: DateTime<Utc>,
}

/// Detects multi-event patterns per source IP and raises alerts.
///
/// Windows are updated per shard without a per-identity lock; concurrent
/// events for one IP may see a slightly stale window. Dedup goes through
/// a single map entry per `<alert_type>:<source_ip>` so concurrent matches
/// raise one alert.
pub struct ThreatCorrelator {
    enabled: bool,
    rules: Vec<Box<dyn CorrelationRule>>,
    windows: DashMap<String, VecDeque<SecurityEvent>>,
    fired: DashMap<String, Fired>,
    alerts: AlertStore,
    sender: broadcast::Sender<SecurityAlert>,
    recorder: Option<Arc<dyn ViolationRecorder>>,
    clock: Arc<dyn Clock>,
    window: TimeDelta,
    max_events_per_source: usize,
}

impl ThreatCorrelator {
    /// Correlator with the built-in rules.
    pub fn new(config: &CorrelatorConfig, clock: Arc<dyn Clock>) -> Self {
        Self::with_rules(config, default_rules(config), clock)
    }

    pub fn with_rules(config: &CorrelatorConfig, rules: Vec<Box<dyn CorrelationRule>>, clock: Arc<dyn Clock>) -> Self {
        let (sender, _) = broadcast::channel(config.alert_channel_capacity.max(1));
        Self {
            enabled: config.enabled,
            rules,
            windows: DashMap::new(),
            fired: DashMap::new(),
            alerts: AlertStore::new(),
            sender,
            recorder: None,
            clock,
            window: delta(Duration::from_secs(config.window_secs)),
            max_events_per_source: config.max_events_per_source.max(1),
        }
    }

    /// Feed rule matches that request it back as violations.
    pub fn with_recorder(mut self, recorder: Arc<dyn ViolationRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Receive alerts as they are raised.
    pub fn subscribe(&self) -> broadcast::Receiver<SecurityAlert> {
        self.sender.subscribe()
    }

    /// Add `event` to its source window and evaluate every rule.
    /// Returns the alerts raised by this event.
    pub async fn on_event(&self, event: &SecurityEvent) -> Vec<SecurityAlert> {
        if !self.enabled {
            return Vec::new();
        }

        let now = self.clock.now();
        let cutoff = self.cutoff(now);
        let snapshot: Vec<SecurityEvent> = {
            let mut window = self.windows.entry(event.source_ip.clone()).or_default();
            window.push_back(event.clone());
            // Reports may arrive out of timestamp order.
            window.retain(|e| e.timestamp >= cutoff);
            while window.len() > self.max_events_per_source {
                window.pop_front();
            }
            window.iter().cloned().collect()
        };

        let mut raised = Vec::new();
        for rule in &self.rules {
            let Some(found) = rule.evaluate(&snapshot, event) else {
                continue;
            };
            let dedup_key = format!("{}:{}", rule.alert_type(), event.source_ip);
            let Some(alert) = self.try_raise(&dedup_key, rule.alert_type(), event, &found, now) else {
                continue;
            };

            tracing::warn!(
                alert_id = %alert.alert_id,
                alert_type = %alert.alert_type,
                severity = %alert.severity,
                source_ip = %alert.source_ip,
                events = alert.source_event_ids.len(),
                "Security alert raised"
            );
            metrics::record_alert(&alert.alert_type, alert.severity.as_str());
            let _ = self.sender.send(alert.clone());

            if found.record_violation {
                self.feed_back(event, &alert).await;
            }
            raised.push(alert);
        }
        raised
    }

    /// Claim the dedup key and store the alert. `None` while an alert for
    /// the key is still armed.
    fn try_raise(
        &self,
        dedup_key: &str,
        alert_type: &str,
        event: &SecurityEvent,
        found: &RuleMatch,
        now: DateTime<Utc>,
    ) -> Option<SecurityAlert> {
        let alert = SecurityAlert {
            alert_id: Uuid::new_v4(),
            alert_type: alert_type.to_string(),
            severity: found.severity,
            triggered_at: now,
            source_ip: event.source_ip.clone(),
            source_event_ids: found.source_event_ids.clone(),
            affected_identities: found.affected_identities.clone(),
            description: found.description.clone(),
            recommendations: found.recommendations.clone(),
            resolved: false,
            resolved_by: None,
            resolved_at: None,
            resolution_notes: None,
        };
        let fired = Fired {
            alert_id: alert.alert_id,
            at: now,
        };

        // The alert is stored before the entry guard drops, so a concurrent
        // match on the same key always finds it.
        match self.fired.entry(dedup_key.to_string()) {
            Entry::Occupied(mut entry) => {
                let previous = *entry.get();
                let resolved = self.alerts.get(previous.alert_id).is_some_and(|a| a.resolved);
                if self.still_armed(previous.at, now) && !resolved {
                    return None;
                }
                self.alerts.insert(alert.clone());
                entry.insert(fired);
            }
            Entry::Vacant(entry) => {
                self.alerts.insert(alert.clone());
                entry.insert(fired);
            }
        }

        Some(alert)
    }

    async fn feed_back(&self, event: &SecurityEvent, alert: &SecurityAlert) {
        let Some(recorder) = &self.recorder else {
            return;
        };
        let Ok(ip) = event.source_ip.parse::<IpAddr>() else {
            tracing::debug!(source_ip = %event.source_ip, "Source is not an IP address, no violation recorded");
            return;
        };

        let violation = IpViolation::new(
            ip,
            ViolationType::SuspiciousActivity,
            event.endpoint.clone(),
            alert.severity,
            self.clock.now(),
        )
        .with_details(serde_json::json!({
            "alert_id": alert.alert_id,
            "alert_type": alert.alert_type,
        }));
        recorder.record_violation(violation).await;
    }

    /// Unresolved alerts, optionally of one severity.
    pub fn active_alerts(&self, severity: Option<Severity>) -> Vec<SecurityAlert> {
        self.alerts.active(severity)
    }

    pub fn active_alert_count(&self) -> usize {
        self.alerts.active_count()
    }

    pub fn all_alerts(&self) -> Vec<SecurityAlert> {
        self.alerts.all()
    }

    /// Resolve an alert; re-arms its dedup key.
    pub fn resolve(&self, alert_id: Uuid, by: &str, notes: Option<String>) -> AlertResult<ResolveOutcome> {
        let outcome = self.alerts.resolve(alert_id, by, notes, self.clock.now())?;
        if let ResolveOutcome::Resolved(alert) = &outcome {
            tracing::info!(alert_id = %alert_id, resolved_by = %by, alert_type = %alert.alert_type, "Alert resolved");
        }
        Ok(outcome)
    }

    /// Drop idle windows and lapsed dedup entries. Returns windows removed.
    pub fn prune(&self) -> usize {
        let now = self.clock.now();
        let cutoff = self.cutoff(now);

        let before = self.windows.len();
        self.windows
            .retain(|_, window| window.iter().any(|e| e.timestamp >= cutoff));
        self.fired.retain(|_, fired| self.still_armed(fired.at, now));
        before.saturating_sub(self.windows.len())
    }

    fn still_armed(&self, fired_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        fired_at.checked_add_signed(self.window).map_or(true, |until| until > now)
    }

    fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_signed(self.window).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Number of sources with a live window.
    pub fn tracked_sources(&self) -> usize {
        self.windows.len()
    }
}

#[async_trait]
impl EventObserver for ThreatCorrelator {
    async fn on_event(&self, event: &SecurityEvent) {
        ThreatCorrelator::on_event(self, event).await;
    }
}
