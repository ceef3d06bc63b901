use std::hash::{DefaultHasher, Hash, Hasher};

use async_trait::async_trait;
use common::OrderId;
use tokio::sync::mpsc;

use crate::{EventContext, EventContract, EventEnvelope, Result, Topics};

/// The receiving end of one partition of a consumer group.
pub type PartitionReceiver = mpsc::UnboundedReceiver<EventEnvelope>;

/// Core trait for event channel implementations.
///
/// Delivery is at-least-once: a consumer may see the same event (same
/// `event_id`) more than once and must be idempotent. Events with the same
/// `order_id` land on the same partition and arrive in publish order.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Appends an event to the topic named in the envelope.
    async fn publish(&self, envelope: EventEnvelope) -> Result<()>;

    /// Joins consumer group `group` on the given topics.
    ///
    /// Returns one receiver per partition. Each event published to any of the
    /// topics is delivered to exactly one partition of the group, chosen by
    /// [`partition_for`].
    async fn subscribe(
        &self,
        topics: &[String],
        group: &str,
        partitions: usize,
    ) -> Result<Vec<PartitionReceiver>>;
}

/// Extension trait providing typed publication.
#[async_trait]
pub trait EventBusExt: EventBus {
    /// Wraps `contract` in an envelope and publishes it on its topic.
    async fn publish_contract<C: EventContract>(
        &self,
        topics: &Topics,
        contract: &C,
        ctx: EventContext,
    ) -> Result<EventEnvelope> {
        let envelope = EventEnvelope::wrap(topics, contract, ctx)?;
        self.publish(envelope.clone()).await?;
        Ok(envelope)
    }
}

// Blanket implementation for all EventBus implementations
impl<T: EventBus + ?Sized> EventBusExt for T {}

/// Picks the partition of `order_id` among `partitions`.
pub fn partition_for(order_id: &OrderId, partitions: usize) -> usize {
    if partitions <= 1 {
        return 0;
    }
    let mut hasher = DefaultHasher::new();
    order_id.hash(&mut hasher);
    (hasher.finish() % partitions as u64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_is_stable_for_an_order() {
        let order_id = OrderId::new();
        let first = partition_for(&order_id, 8);
        for _ in 0..10 {
            assert_eq!(partition_for(&order_id, 8), first);
        }
        assert!(first < 8);
    }

    #[test]
    fn single_partition_always_zero() {
        assert_eq!(partition_for(&OrderId::new(), 1), 0);
        assert_eq!(partition_for(&OrderId::new(), 0), 0);
    }

    #[test]
    fn orders_spread_over_partitions() {
        let used: std::collections::HashSet<usize> = (0..200)
            .map(|_| partition_for(&OrderId::new(), 4))
            .collect();
        assert!(used.len() > 1);
    }
}
