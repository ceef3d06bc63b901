use std::sync::Arc;

use async_trait::async_trait;
use event_bus::{EventEnvelope, Topics};

use crate::error::HandlerError;

/// A saga component reacting to events from a consumer group.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Name used as the consumer group and in logs and metrics.
    fn component(&self) -> &'static str;

    /// Topics this component consumes.
    fn topics(&self, topics: &Topics) -> Vec<String>;

    /// Processes one delivery. Must be idempotent: the same event may be
    /// delivered more than once.
    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError>;
}

#[async_trait]
impl<H: EventHandler + ?Sized> EventHandler for Arc<H> {
    fn component(&self) -> &'static str {
        (**self).component()
    }

    fn topics(&self, topics: &Topics) -> Vec<String> {
        (**self).topics(topics)
    }

    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        (**self).handle(envelope).await
    }
}

/// Error for an event type a handler is not subscribed for.
pub(crate) fn unexpected(component: &str, envelope: &EventEnvelope) -> HandlerError {
    HandlerError::Corrupt(format!(
        "{component} cannot handle {} on {}",
        envelope.event_type, envelope.topic
    ))
}
