use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::OrderId;
use tokio::sync::{RwLock, mpsc};

use crate::{
    EventBusError, EventEnvelope, Result,
    bus::{EventBus, PartitionReceiver, partition_for},
};

#[derive(Default)]
struct TopicState {
    /// Append-only history of the topic.
    log: Vec<EventEnvelope>,
    /// Partition senders of every consumer group subscribed to the topic.
    groups: HashMap<String, Vec<mpsc::UnboundedSender<EventEnvelope>>>,
}

impl TopicState {
    fn deliver(&mut self, envelope: &EventEnvelope) {
        self.groups.retain(|group, senders| {
            let partition = partition_for(&envelope.order_id, senders.len());
            if senders[partition].send(envelope.clone()).is_err() {
                tracing::debug!(%group, "consumer group gone, dropping subscription");
                return false;
            }
            true
        });
    }
}

/// In-memory, partitioned event channel.
///
/// Each topic is an append-only log. A consumer group that joins late starts
/// at the earliest offset, so a group that rejoins after a restart sees the
/// whole history again (at-least-once delivery).
#[derive(Clone, Default)]
pub struct InMemoryEventBus {
    topics: Arc<RwLock<HashMap<String, TopicState>>>,
}

impl InMemoryEventBus {
    /// Creates a new empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every event published on `topic`, in publish order.
    pub async fn published(&self, topic: &str) -> Vec<EventEnvelope> {
        self.topics
            .read()
            .await
            .get(topic)
            .map(|state| state.log.clone())
            .unwrap_or_default()
    }

    /// Returns every event published for `order_id` across all topics,
    /// ordered by event time.
    pub async fn published_for(&self, order_id: OrderId) -> Vec<EventEnvelope> {
        let topics = self.topics.read().await;
        let mut events: Vec<_> = topics
            .values()
            .flat_map(|state| state.log.iter())
            .filter(|e| e.order_id == order_id)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.event_time);
        events
    }

    /// Returns the total number of events published.
    pub async fn event_count(&self) -> usize {
        self.topics
            .read()
            .await
            .values()
            .map(|state| state.log.len())
            .sum()
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, envelope: EventEnvelope) -> Result<()> {
        let mut topics = self.topics.write().await;
        let state = topics.entry(envelope.topic.clone()).or_default();

        state.deliver(&envelope);
        state.log.push(envelope);

        metrics::counter!("event_bus_published_total").increment(1);
        Ok(())
    }

    async fn subscribe(
        &self,
        topics: &[String],
        group: &str,
        partitions: usize,
    ) -> Result<Vec<PartitionReceiver>> {
        if topics.is_empty() {
            return Err(EventBusError::InvalidSubscription(
                "at least one topic is required".to_string(),
            ));
        }
        if partitions == 0 {
            return Err(EventBusError::InvalidSubscription(
                "partitions must be greater than zero".to_string(),
            ));
        }

        let mut state = self.topics.write().await;

        for topic in topics {
            let live = state
                .get(topic)
                .and_then(|s| s.groups.get(group))
                .is_some_and(|senders| senders.iter().any(|tx| !tx.is_closed()));
            if live {
                return Err(EventBusError::AlreadySubscribed {
                    topic: topic.clone(),
                    group: group.to_string(),
                });
            }
        }

        let (senders, receivers): (Vec<_>, Vec<_>) =
            (0..partitions).map(|_| mpsc::unbounded_channel()).unzip();

        for topic in topics {
            let topic_state = state.entry(topic.clone()).or_default();
            for envelope in &topic_state.log {
                let partition = partition_for(&envelope.order_id, partitions);
                // Receivers are alive: they are still owned by this function.
                let _ = senders[partition].send(envelope.clone());
            }
            topic_state
                .groups
                .insert(group.to_string(), senders.clone());
        }

        tracing::debug!(%group, ?topics, partitions, "consumer group subscribed");
        Ok(receivers)
    }
}
