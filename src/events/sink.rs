//! Event persistence seam and the bounded in-memory sink.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{PoisonError, RwLock};
use thiserror::Error;

use crate::events::types::SecurityEvent;
use crate::severity::Severity;

/// Failures writing a batch.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SinkError {
    #[error("event sink unavailable: {0}")]
    Unavailable(String),

    #[error("event sink rejected batch: {0}")]
    Rejected(String),
}

pub type SinkResult<T> = Result<T, SinkError>;

/// Destination of flushed batches.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn write_batch(&self, events: &[SecurityEvent]) -> SinkResult<()>;
}

pub const DEFAULT_PER_PAGE: usize = 50;
pub const MAX_PER_PAGE: usize = 500;

fn default_page() -> usize {
    1
}

fn default_per_page() -> usize {
    DEFAULT_PER_PAGE
}

/// Operator query over retained events.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EventQuery {
    #[serde(default)]
    pub origin: Option<String>,
    #[serde(default)]
    pub threat_level: Option<String>,
    #[serde(default)]
    pub severity: Option<String>,
    /// 1-based.
    #[serde(default = "default_page")]
    pub page: usize,
    #[serde(default = "default_per_page")]
    pub per_page: usize,
}

impl Default for EventQuery {
    fn default() -> Self {
        Self {
            origin: None,
            threat_level: None,
            severity: None,
            page: default_page(),
            per_page: default_per_page(),
        }
    }
}

/// One page of query results.
#[derive(Debug, Clone, Serialize)]
pub struct EventPage {
    pub events: Vec<SecurityEvent>,
    pub total: usize,
    pub page: usize,
    pub per_page: usize,
}

/// Keeps the newest `capacity` events in memory.
#[derive(Debug)]
pub struct MemoryEventSink {
    events: RwLock<VecDeque<SecurityEvent>>,
    capacity: usize,
}

impl MemoryEventSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: RwLock::new(VecDeque::new()),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.events.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every retained event, newest first.
    pub fn all(&self) -> Vec<SecurityEvent> {
        let events = self.events.read().unwrap_or_else(PoisonError::into_inner);
        events.iter().rev().cloned().collect()
    }

    /// Filter and paginate, newest first. Unparseable level filters match nothing.
    pub fn query(&self, query: &EventQuery) -> EventPage {
        let threat_level = query.threat_level.as_deref().map(Severity::parse);
        let severity = query.severity.as_deref().map(Severity::parse);
        let origin = query.origin.as_deref().map(str::to_ascii_lowercase);
        let page = query.page.max(1);
        let per_page = query.per_page.clamp(1, MAX_PER_PAGE);

        let events = self.events.read().unwrap_or_else(PoisonError::into_inner);
        let matching: Vec<&SecurityEvent> = events
            .iter()
            .rev()
            .filter(|e| origin.as_deref().map_or(true, |o| e.middleware_origin == o))
            .filter(|e| threat_level.map_or(true, |level| level == Some(e.threat_level)))
            .filter(|e| severity.map_or(true, |level| level == Some(e.severity)))
            .collect();

        let total = matching.len();
        let events = matching
            .into_iter()
            .skip((page - 1).saturating_mul(per_page))
            .take(per_page)
            .cloned()
            .collect();

        EventPage {
            events,
            total,
            page,
            per_page,
        }
    }
}

#[async_trait]
impl EventSink for MemoryEventSink {
    async fn write_batch(&self, batch: &[SecurityEvent]) -> SinkResult<()> {
        let mut events = self.events.write().unwrap_or_else(PoisonError::into_inner);
        events.extend(batch.iter().cloned());
        while events.len() > self.capacity {
            events.pop_front();
        }
        Ok(())
    }
}
