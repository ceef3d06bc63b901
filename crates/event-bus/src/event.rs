use common::{OrderId, now_millis};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::contracts::EventContract;
use crate::topic::Topics;
use crate::{EventBusError, Result};

/// Unique identifier for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Creates a new random event ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an event ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for EventId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Identifies one attempt of an order saga.
///
/// Every event caused (directly or transitively) by the same `OrderCreated`
/// carries the same correlation ID. A retry starts a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Creates a new random correlation ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Causal metadata travelling with an event.
///
/// Handlers derive the context of what they emit from the event they are
/// handling, so cross-hop tracing never depends on ambient state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventContext {
    pub correlation_id: CorrelationId,
    pub causation_id: Option<EventId>,
}

impl EventContext {
    /// Context for the first event of a new saga attempt.
    pub fn root() -> Self {
        Self {
            correlation_id: CorrelationId::new(),
            causation_id: None,
        }
    }

    /// Context for an event emitted in reaction to `cause`.
    pub fn follow(cause: &EventEnvelope) -> Self {
        Self {
            correlation_id: cause.correlation_id,
            causation_id: Some(cause.event_id),
        }
    }
}

/// An event as it travels over a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    /// Unique identifier for this event. Redeliveries keep it.
    pub event_id: EventId,

    /// The contract name (e.g. "OrderCreated").
    pub event_type: String,

    /// Version of the payload schema.
    pub schema_version: u16,

    /// The channel this event was published on.
    pub topic: String,

    /// Partition key. All events of one order share a partition.
    pub order_id: OrderId,

    /// When the event was produced, in epoch milliseconds.
    pub event_time: i64,

    /// The saga attempt this event belongs to.
    pub correlation_id: CorrelationId,

    /// The event whose handling produced this one, if any.
    pub causation_id: Option<EventId>,

    /// The contract payload as JSON.
    pub payload: serde_json::Value,
}

impl EventEnvelope {
    /// Creates a new event envelope builder.
    pub fn builder() -> EventEnvelopeBuilder {
        EventEnvelopeBuilder::default()
    }

    /// Wraps a typed contract for publication on its topic.
    pub fn wrap<C: EventContract>(topics: &Topics, contract: &C, ctx: EventContext) -> Result<Self> {
        EventEnvelope::builder()
            .event_type(C::EVENT_TYPE)
            .schema_version(C::SCHEMA_VERSION)
            .topic(topics.of::<C>())
            .order_id(contract.order_id())
            .context(ctx)
            .payload(contract)?
            .build()
    }

    /// Returns true if this envelope carries the contract `C`.
    pub fn is<C: EventContract>(&self) -> bool {
        self.event_type == C::EVENT_TYPE
    }

    /// Decodes the payload into the contract `C`.
    ///
    /// Fails with [`EventBusError::CorruptEvent`] when the event type does not
    /// match, the payload does not parse, or the payload names another order
    /// than the envelope.
    pub fn decode<C: EventContract>(&self) -> Result<C> {
        if !self.is::<C>() {
            return Err(self.corrupt(format!(
                "expected {}, found {}",
                C::EVENT_TYPE,
                self.event_type
            )));
        }
        if self.schema_version > C::SCHEMA_VERSION {
            return Err(self.corrupt(format!(
                "unsupported schema version {} for {}",
                self.schema_version,
                C::EVENT_TYPE
            )));
        }
        let contract: C = serde_json::from_value(self.payload.clone())
            .map_err(|e| self.corrupt(e.to_string()))?;
        if contract.order_id() != self.order_id {
            return Err(self.corrupt(format!(
                "payload order {} does not match key {}",
                contract.order_id(),
                self.order_id
            )));
        }
        Ok(contract)
    }

    fn corrupt(&self, reason: String) -> EventBusError {
        EventBusError::CorruptEvent {
            event_id: self.event_id,
            reason,
        }
    }
}

/// Builder for constructing event envelopes.
#[derive(Debug, Default)]
pub struct EventEnvelopeBuilder {
    event_id: Option<EventId>,
    event_type: Option<String>,
    schema_version: Option<u16>,
    topic: Option<String>,
    order_id: Option<OrderId>,
    event_time: Option<i64>,
    context: Option<EventContext>,
    payload: Option<serde_json::Value>,
}

impl EventEnvelopeBuilder {
    /// Sets the event ID. If not set, a new ID will be generated.
    pub fn event_id(mut self, id: EventId) -> Self {
        self.event_id = Some(id);
        self
    }

    /// Sets the event type.
    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    /// Sets the schema version. Defaults to 1.
    pub fn schema_version(mut self, version: u16) -> Self {
        self.schema_version = Some(version);
        self
    }

    /// Sets the topic.
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Sets the partition key.
    pub fn order_id(mut self, order_id: OrderId) -> Self {
        self.order_id = Some(order_id);
        self
    }

    /// Sets the event time. If not set, the current time will be used.
    pub fn event_time(mut self, millis: i64) -> Self {
        self.event_time = Some(millis);
        self
    }

    /// Sets the causal context. If not set, a root context is used.
    pub fn context(mut self, ctx: EventContext) -> Self {
        self.context = Some(ctx);
        self
    }

    /// Sets the payload from a serializable value.
    pub fn payload<T: Serialize>(mut self, payload: &T) -> Result<Self> {
        self.payload = Some(serde_json::to_value(payload)?);
        Ok(self)
    }

    /// Sets the payload from a raw JSON value.
    pub fn payload_raw(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Builds the event envelope.
    pub fn build(self) -> Result<EventEnvelope> {
        let missing = |field: &str| EventBusError::InvalidEnvelope(format!("{field} is required"));
        let ctx = self.context.unwrap_or_else(EventContext::root);

        Ok(EventEnvelope {
            event_id: self.event_id.unwrap_or_default(),
            event_type: self.event_type.ok_or_else(|| missing("event_type"))?,
            schema_version: self.schema_version.unwrap_or(1),
            topic: self.topic.ok_or_else(|| missing("topic"))?,
            order_id: self.order_id.ok_or_else(|| missing("order_id"))?,
            event_time: self.event_time.unwrap_or_else(now_millis),
            correlation_id: ctx.correlation_id,
            causation_id: ctx.causation_id,
            payload: self.payload.ok_or_else(|| missing("payload"))?,
        })
    }
}
