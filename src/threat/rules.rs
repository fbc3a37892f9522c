//! Correlation rules.
//!
//! A rule is a predicate over the recent events of one source IP. Rules
//! are independent; adding one never touches the others.

use std::collections::BTreeSet;
use uuid::Uuid;

use crate::config::schema::CorrelatorConfig;
use crate::events::types::{SecurityEvent, SecurityEventType};
use crate::severity::Severity;

/// What a rule found.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleMatch {
    pub severity: Severity,
    pub description: String,
    pub recommendations: Vec<String>,
    pub source_event_ids: Vec<Uuid>,
    pub affected_identities: Vec<String>,
    /// Feed a `suspicious_activity` violation back into blocking.
    pub record_violation: bool,
}

/// A pluggable detection predicate.
pub trait CorrelationRule: Send + Sync {
    /// Alert type emitted on a match; also the dedup namespace.
    fn alert_type(&self) -> &'static str;

    /// Inspect `window` (oldest first, `latest` included).
    fn evaluate(&self, window: &[SecurityEvent], latest: &SecurityEvent) -> Option<RuleMatch>;
}

fn identities<'a>(events: impl Iterator<Item = &'a SecurityEvent>, ip: &str) -> Vec<String> {
    let mut out: BTreeSet<String> = events
        .filter_map(|e| e.user_id.as_ref())
        .map(|id| format!("u:{id}"))
        .collect();
    out.insert(format!("ip:{ip}"));
    out.into_iter().collect()
}

/// Many auth failures or rate-limit hits from one IP.
#[derive(Debug, Clone)]
pub struct RapidAuthRule {
    pub threshold: usize,
}

impl CorrelationRule for RapidAuthRule {
    fn alert_type(&self) -> &'static str {
        "rapid_auth_attempts"
    }

    fn evaluate(&self, window: &[SecurityEvent], latest: &SecurityEvent) -> Option<RuleMatch> {
        let hits: Vec<&SecurityEvent> = window
            .iter()
            .filter(|e| {
                matches!(
                    e.event_type,
                    SecurityEventType::AuthFailure | SecurityEventType::RateLimitExceeded
                )
            })
            .collect();
        if hits.len() < self.threshold {
            return None;
        }

        Some(RuleMatch {
            severity: Severity::High,
            description: format!(
                "{} failed authentication or rate-limited requests from {} within the correlation window",
                hits.len(),
                latest.source_ip
            ),
            recommendations: vec![
                "Review authentication logs for credential stuffing".to_string(),
                "Consider blocking the source IP".to_string(),
                "Require additional verification for affected accounts".to_string(),
            ],
            source_event_ids: hits.iter().map(|e| e.event_id).collect(),
            affected_identities: identities(hits.iter().copied(), &latest.source_ip),
            record_violation: true,
        })
    }
}

/// One IP trying several identity providers.
#[derive(Debug, Clone)]
pub struct MultipleProviderRule {
    pub threshold: usize,
}

impl CorrelationRule for MultipleProviderRule {
    fn alert_type(&self) -> &'static str {
        "multiple_provider_attempts"
    }

    fn evaluate(&self, window: &[SecurityEvent], latest: &SecurityEvent) -> Option<RuleMatch> {
        let providers: BTreeSet<&str> = window
            .iter()
            .filter_map(|e| e.provider.as_deref())
            .collect();
        if providers.len() < self.threshold {
            return None;
        }

        let with_provider: Vec<&SecurityEvent> = window.iter().filter(|e| e.provider.is_some()).collect();
        Some(RuleMatch {
            severity: Severity::Medium,
            description: format!(
                "{} distinct identity providers attempted from {} ({})",
                providers.len(),
                latest.source_ip,
                providers.iter().copied().collect::<Vec<_>>().join(", ")
            ),
            recommendations: vec![
                "Check for account enumeration across providers".to_string(),
                "Monitor the source IP for further attempts".to_string(),
            ],
            source_event_ids: with_provider.iter().map(|e| e.event_id).collect(),
            affected_identities: identities(with_provider.iter().copied(), &latest.source_ip),
            record_violation: false,
        })
    }
}

/// User agent of a known automation client.
#[derive(Debug, Clone)]
pub struct BotSignatureRule {
    signatures: Vec<String>,
}

impl BotSignatureRule {
    pub fn new(signatures: &[String]) -> Self {
        Self {
            signatures: signatures
                .iter()
                .map(|s| s.trim().to_ascii_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }
}

impl CorrelationRule for BotSignatureRule {
    fn alert_type(&self) -> &'static str {
        "bot_detection"
    }

    fn evaluate(&self, _window: &[SecurityEvent], latest: &SecurityEvent) -> Option<RuleMatch> {
        let agent = latest.user_agent.as_deref()?.to_ascii_lowercase();
        let signature = self.signatures.iter().find(|s| agent.contains(s.as_str()))?;

        Some(RuleMatch {
            severity: Severity::Medium,
            description: format!(
                "Automation client '{signature}' detected from {}",
                latest.source_ip
            ),
            recommendations: vec![
                "Verify whether the client is an approved integration".to_string(),
                "Apply stricter rate limits to the source".to_string(),
            ],
            source_event_ids: vec![latest.event_id],
            affected_identities: identities(std::iter::once(latest), &latest.source_ip),
            record_violation: false,
        })
    }
}

/// The built-in rule set.
pub fn default_rules(config: &CorrelatorConfig) -> Vec<Box<dyn CorrelationRule>> {
    vec![
        Box::new(RapidAuthRule {
            threshold: config.rapid_auth_threshold,
        }),
        Box::new(MultipleProviderRule {
            threshold: config.provider_threshold,
        }),
        Box::new(BotSignatureRule::new(&config.bot_signatures)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::types::origin;
    use chrono::Utc;

    fn event(event_type: SecurityEventType) -> SecurityEvent {
        SecurityEvent::new(event_type, Severity::Medium, "1.2.3.4", "/login", origin::AUTH, Utc::now())
    }

    #[test]
    fn test_rapid_auth_counts_auth_and_rate_limit() {
        let rule = RapidAuthRule { threshold: 3 };
        let mut window = vec![
            event(SecurityEventType::AuthFailure),
            event(SecurityEventType::InjectionAttempt),
            event(SecurityEventType::RateLimitExceeded).with_user(Some("bob".into())),
        ];
        let latest = window[2].clone();
        assert!(rule.evaluate(&window, &latest).is_none());

        window.push(event(SecurityEventType::AuthFailure));
        let latest = window[3].clone();
        let found = rule.evaluate(&window, &latest).unwrap();
        assert_eq!(found.source_event_ids.len(), 3);
        assert_eq!(found.affected_identities, vec!["ip:1.2.3.4".to_string(), "u:bob".to_string()]);
        assert!(found.record_violation);
    }

    #[test]
    fn test_multiple_providers() {
        let rule = MultipleProviderRule { threshold: 3 };
        let window: Vec<_> = ["google", "github", "google", "apple"]
            .iter()
            .map(|p| event(SecurityEventType::AuthFailure).with_provider(*p))
            .collect();
        let found = rule.evaluate(&window, &window[3]).unwrap();
        assert_eq!(found.severity, Severity::Medium);
        assert!(found.description.contains("apple, github, google"));

        assert!(rule.evaluate(&window[..3], &window[2]).is_none());
    }

    #[test]
    fn test_bot_signature_is_case_insensitive() {
        let rule = BotSignatureRule::new(&["python-requests".to_string(), "HeadlessChrome".to_string()]);
        let bot = event(SecurityEventType::Other).with_user_agent(Some("Mozilla/5.0 HeadlessChrome/120".into()));
        let human = event(SecurityEventType::Other).with_user_agent(Some("Mozilla/5.0 Firefox/121".into()));
        let silent = event(SecurityEventType::Other);

        assert!(rule.evaluate(&[], &bot).is_some());
        assert!(rule.evaluate(&[], &human).is_none());
        assert!(rule.evaluate(&[], &silent).is_none());
    }
}
