//! Audit consumer writing every event to the event log.

use std::sync::Arc;

use async_trait::async_trait;
use event_bus::{EventEnvelope, EventLog, EventLogEntry, Topics};

use crate::error::HandlerError;
use crate::handler::EventHandler;

/// Records each event seen on any saga topic exactly once.
pub struct EventLogRecorder {
    log: Arc<dyn EventLog>,
}

impl EventLogRecorder {
    /// Creates a recorder writing to `log`.
    pub fn new(log: Arc<dyn EventLog>) -> Self {
        Self { log }
    }

    /// Returns the log this recorder writes to.
    pub fn log(&self) -> &Arc<dyn EventLog> {
        &self.log
    }
}

#[async_trait]
impl EventHandler for EventLogRecorder {
    fn component(&self) -> &'static str {
        "event-audit"
    }

    fn topics(&self, topics: &Topics) -> Vec<String> {
        topics.all()
    }

    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        let entry = EventLogEntry::from_envelope(envelope)?;
        if !self.log.record(entry).await? {
            tracing::debug!(event_id = %envelope.event_id, "event already recorded");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{LineItem, OrderId};
    use event_bus::{EventContext, InMemoryEventLog, OrderCreated};

    #[tokio::test]
    async fn records_each_event_once() {
        let log = Arc::new(InMemoryEventLog::new());
        let recorder = EventLogRecorder::new(log.clone());
        let order_id = OrderId::new();
        let env = EventEnvelope::wrap(
            &Topics::default(),
            &OrderCreated {
                order_id,
                customer_id: "c1".to_string(),
                amount: 1000,
                currency: "KRW".to_string(),
                items: vec![LineItem::new("X", 2)],
            },
            EventContext::root(),
        )
        .unwrap();

        recorder.handle(&env).await.unwrap();
        recorder.handle(&env).await.unwrap();

        assert_eq!(log.count().await.unwrap(), 1);
        let entries = log.entries_for(&order_id.to_string()).await.unwrap();
        assert_eq!(entries[0].event_type, "OrderCreated");
        assert_eq!(recorder.topics(&Topics::default()).len(), 6);
    }
}
