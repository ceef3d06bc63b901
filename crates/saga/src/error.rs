//! Saga error types.

use common::OrderId;
use domain::{OrderStatus, StoreError};
use event_bus::EventBusError;
use thiserror::Error;

/// Errors surfaced to callers of the saga's synchronous operations.
#[derive(Debug, Error)]
pub enum SagaError {
    /// The order is not in a state that allows the operation.
    #[error("Invalid state: order {order_id} is {status}")]
    InvalidState {
        order_id: OrderId,
        status: OrderStatus,
    },

    /// Order not found.
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// Store error.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Event bus error.
    #[error("Event bus error: {0}")]
    Bus(#[from] EventBusError),
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;

/// Why an event handler could not process an event.
///
/// Business rejections are not errors; they are published as events.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Infrastructure was unavailable. The event is redelivered.
    #[error("Transient failure: {0}")]
    Transient(String),

    /// The event can never be processed. It is logged and dropped.
    #[error("Corrupt event: {0}")]
    Corrupt(String),

    /// The event names an order this component does not know. It is logged
    /// and dropped.
    #[error("Unknown order: {0}")]
    UnknownOrder(OrderId),
}

impl HandlerError {
    /// Returns true if the event should be delivered again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, HandlerError::Transient(_))
    }

    /// Returns the label used for this failure in logs and metrics.
    pub fn outcome(&self) -> &'static str {
        match self {
            HandlerError::Transient(_) => "transient",
            HandlerError::Corrupt(_) => "corrupt",
            HandlerError::UnknownOrder(_) => "unknown_order",
        }
    }
}

impl From<StoreError> for HandlerError {
    fn from(err: StoreError) -> Self {
        if err.is_transient() {
            HandlerError::Transient(err.to_string())
        } else {
            HandlerError::Corrupt(err.to_string())
        }
    }
}

impl From<EventBusError> for HandlerError {
    fn from(err: EventBusError) -> Self {
        if err.is_corrupt_event() {
            HandlerError::Corrupt(err.to_string())
        } else {
            HandlerError::Transient(err.to_string())
        }
    }
}

impl From<SagaError> for HandlerError {
    fn from(err: SagaError) -> Self {
        match err {
            SagaError::Store(e) => e.into(),
            SagaError::Bus(e) => e.into(),
            SagaError::OrderNotFound(id) => HandlerError::UnknownOrder(id),
            other @ SagaError::InvalidState { .. } => HandlerError::Corrupt(other.to_string()),
        }
    }
}
