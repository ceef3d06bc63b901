//! Durable, de-duplicated record of every event seen on the channels.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::{EventEnvelope, EventId, Result};

/// One audited event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventLogEntry {
    pub event_id: EventId,
    pub event_type: String,
    pub aggregate_id: String,
    /// The raw envelope as it was received.
    pub payload: serde_json::Value,
    /// Event time in epoch milliseconds.
    pub timestamp: i64,
}

impl EventLogEntry {
    /// Builds the audit entry for a received envelope.
    pub fn from_envelope(envelope: &EventEnvelope) -> Result<Self> {
        Ok(Self {
            event_id: envelope.event_id,
            event_type: envelope.event_type.clone(),
            aggregate_id: envelope.order_id.to_string(),
            payload: serde_json::to_value(envelope)?,
            timestamp: envelope.event_time,
        })
    }
}

/// Append-only event ledger keyed by event ID.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Records an entry unless one with the same `event_id` exists.
    ///
    /// Returns `true` if the entry was inserted, `false` for a duplicate.
    async fn record(&self, entry: EventLogEntry) -> Result<bool>;

    /// Returns all entries of one aggregate, oldest first.
    async fn entries_for(&self, aggregate_id: &str) -> Result<Vec<EventLogEntry>>;

    /// Returns all entries of one event type, oldest first.
    async fn entries_by_type(&self, event_type: &str) -> Result<Vec<EventLogEntry>>;

    /// Returns the number of recorded entries.
    async fn count(&self) -> Result<u64>;
}

#[derive(Default)]
struct LogState {
    entries: Vec<EventLogEntry>,
    seen: HashSet<EventId>,
}

/// In-memory event log for testing and single-process deployments.
#[derive(Clone, Default)]
pub struct InMemoryEventLog {
    state: Arc<RwLock<LogState>>,
}

impl InMemoryEventLog {
    /// Creates a new empty log.
    pub fn new() -> Self {
        Self::default()
    }

    fn sorted(mut entries: Vec<EventLogEntry>) -> Vec<EventLogEntry> {
        // Stable sort keeps insertion order for equal timestamps.
        entries.sort_by_key(|e| e.timestamp);
        entries
    }
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    async fn record(&self, entry: EventLogEntry) -> Result<bool> {
        let mut state = self.state.write().await;
        if !state.seen.insert(entry.event_id) {
            return Ok(false);
        }
        state.entries.push(entry);
        Ok(true)
    }

    async fn entries_for(&self, aggregate_id: &str) -> Result<Vec<EventLogEntry>> {
        let state = self.state.read().await;
        Ok(Self::sorted(
            state
                .entries
                .iter()
                .filter(|e| e.aggregate_id == aggregate_id)
                .cloned()
                .collect(),
        ))
    }

    async fn entries_by_type(&self, event_type: &str) -> Result<Vec<EventLogEntry>> {
        let state = self.state.read().await;
        Ok(Self::sorted(
            state
                .entries
                .iter()
                .filter(|e| e.event_type == event_type)
                .cloned()
                .collect(),
        ))
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.state.read().await.entries.len() as u64)
    }
}
