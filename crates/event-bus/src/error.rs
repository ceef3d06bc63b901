use thiserror::Error;

use crate::EventId;

/// Errors that can occur when publishing, consuming or logging events.
#[derive(Debug, Error)]
pub enum EventBusError {
    /// A subscription request was malformed (no topics, zero partitions).
    #[error("Invalid subscription: {0}")]
    InvalidSubscription(String),

    /// A live consumer group already owns this topic.
    #[error("Consumer group '{group}' is already subscribed to topic '{topic}'")]
    AlreadySubscribed { topic: String, group: String },

    /// An envelope was built without one of its required fields.
    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(String),

    /// An event could not be decoded into the contract its type names.
    #[error("Corrupt event {event_id}: {reason}")]
    CorruptEvent { event_id: EventId, reason: String },

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EventBusError {
    /// Returns true for failures caused by malformed events rather than by
    /// infrastructure. Redelivering such an event can never succeed.
    pub fn is_corrupt_event(&self) -> bool {
        matches!(
            self,
            EventBusError::CorruptEvent { .. } | EventBusError::InvalidEnvelope(_)
        )
    }
}

/// Result type for event bus operations.
pub type Result<T> = std::result::Result<T, EventBusError>;
