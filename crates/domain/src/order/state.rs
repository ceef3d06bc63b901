//! Order state machine.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The status of an order in its saga.
///
/// State transitions:
/// ```text
/// Pending ──┬──► InventoryReserved ──┬──► Completed
///           │                        │
///           └──► InventoryRejected   └──► PaymentFailed
/// ```
///
/// `retry` resets any non-completed order back to `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Order was accepted and awaits the inventory step.
    #[default]
    Pending,

    /// Stock was reserved, payment is being decided.
    InventoryReserved,

    /// Stock could not be reserved (terminal unless retried).
    InventoryRejected,

    /// Payment was declined and the reservation compensated (terminal unless retried).
    PaymentFailed,

    /// Shipment was scheduled (terminal).
    Completed,
}

impl OrderStatus {
    /// Returns true if the inventory step may record a reservation.
    pub fn can_reserve_inventory(&self) -> bool {
        matches!(self, OrderStatus::Pending)
    }

    /// Returns true if the inventory step may record a rejection.
    pub fn can_reject_inventory(&self) -> bool {
        matches!(self, OrderStatus::Pending)
    }

    /// Returns true if a payment outcome may be recorded.
    pub fn can_decide_payment(&self) -> bool {
        matches!(self, OrderStatus::InventoryReserved)
    }

    /// Returns true if the order may move to `PaymentFailed`.
    pub fn can_fail_payment(&self) -> bool {
        matches!(self, OrderStatus::InventoryReserved)
    }

    /// Returns true if the order may be completed.
    pub fn can_complete(&self) -> bool {
        matches!(self, OrderStatus::InventoryReserved)
    }

    /// Returns true if the order may be reset to `Pending` and resubmitted.
    pub fn can_retry(&self) -> bool {
        matches!(
            self,
            OrderStatus::Pending
                | OrderStatus::InventoryReserved
                | OrderStatus::InventoryRejected
                | OrderStatus::PaymentFailed
        )
    }

    /// Returns true if no event moves the order out of this state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::InventoryRejected | OrderStatus::PaymentFailed | OrderStatus::Completed
        )
    }

    /// Returns the status name as stored and shown on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::InventoryReserved => "INVENTORY_RESERVED",
            OrderStatus::InventoryRejected => "INVENTORY_REJECTED",
            OrderStatus::PaymentFailed => "PAYMENT_FAILED",
            OrderStatus::Completed => "COMPLETED",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned when a string names no order status.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown order status: {0}")]
pub struct UnknownOrderStatus(pub String);

impl std::str::FromStr for OrderStatus {
    type Err = UnknownOrderStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(OrderStatus::Pending),
            "INVENTORY_RESERVED" => Ok(OrderStatus::InventoryReserved),
            "INVENTORY_REJECTED" => Ok(OrderStatus::InventoryRejected),
            "PAYMENT_FAILED" => Ok(OrderStatus::PaymentFailed),
            "COMPLETED" => Ok(OrderStatus::Completed),
            other => Err(UnknownOrderStatus(other.to_string())),
        }
    }
}
