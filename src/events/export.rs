//! Event export in structured (JSON) and flat (CSV) form.

use serde::Deserialize;

use crate::events::types::SecurityEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Json,
    Csv,
}

impl ExportFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Json => "application/json",
            ExportFormat::Csv => "text/csv; charset=utf-8",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
        }
    }
}

const CSV_COLUMNS: [&str; 13] = [
    "event_id",
    "timestamp",
    "event_type",
    "severity",
    "threat_level",
    "source_ip",
    "user_id",
    "endpoint",
    "middleware_origin",
    "blocked",
    "correlation_id",
    "user_agent",
    "provider",
];

/// Render events in `format`.
pub fn export(events: &[SecurityEvent], format: ExportFormat) -> serde_json::Result<String> {
    match format {
        ExportFormat::Json => to_json(events),
        ExportFormat::Csv => Ok(to_csv(events)),
    }
}

pub fn to_json(events: &[SecurityEvent]) -> serde_json::Result<String> {
    serde_json::to_string_pretty(events)
}

/// One row per event. `details` is omitted from the flat form.
pub fn to_csv(events: &[SecurityEvent]) -> String {
    let mut out = CSV_COLUMNS.join(",");
    out.push('\n');

    for event in events {
        let row = [
            event.event_id.to_string(),
            event.timestamp.to_rfc3339(),
            event.event_type.as_str().to_string(),
            event.severity.as_str().to_string(),
            event.threat_level.as_str().to_string(),
            event.source_ip.clone(),
            event.user_id.clone().unwrap_or_default(),
            event.endpoint.clone(),
            event.middleware_origin.clone(),
            event.blocked.to_string(),
            event.correlation_id.clone(),
            event.user_agent.clone().unwrap_or_default(),
            event.provider.clone().unwrap_or_default(),
        ];
        let fields: Vec<String> = row.iter().map(|f| escape_csv(f)).collect();
        out.push_str(&fields.join(","));
        out.push('\n');
    }
    out
}

fn escape_csv(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::types::{origin, SecurityEventType};
    use crate::severity::Severity;
    use chrono::{TimeZone, Utc};

    fn event() -> SecurityEvent {
        SecurityEvent::new(
            SecurityEventType::AuthFailure,
            Severity::Medium,
            "10.0.0.1",
            "/login",
            origin::AUTH,
            Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        )
        .with_user_agent(Some("Mozilla/5.0 (X11, \"Linux\")".into()))
    }

    #[test]
    fn test_csv_header_and_escaping() {
        let csv = to_csv(&[event()]);
        let mut lines = csv.lines();
        assert_eq!(lines.next().unwrap(), CSV_COLUMNS.join(","));
        let row = lines.next().unwrap();
        assert!(row.contains("auth_failure,medium,medium,10.0.0.1,,/login,auth,false"));
        assert!(row.contains("\"Mozilla/5.0 (X11, \"\"Linux\"\")\""));
        assert!(lines.next().is_none());
    }

    #[test]
    fn test_json_is_an_array() {
        let json = export(&[event(), event()], ExportFormat::Json).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.as_array().unwrap().len(), 2);
        assert_eq!(parsed[0]["event_type"], "auth_failure");
    }

    #[test]
    fn test_format_parses_from_query() {
        let format: ExportFormat = serde_json::from_str("\"csv\"").unwrap();
        assert_eq!(format, ExportFormat::Csv);
        assert_eq!(format.content_type(), "text/csv; charset=utf-8");
    }
}
