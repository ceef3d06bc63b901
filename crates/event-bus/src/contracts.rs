//! Typed payloads for the six saga channels.
//!
//! ```text
//! OrderCreated ──► InventoryReserved ──► PaymentAuthorized ──► FulfillmentScheduled
//!      │                   │
//!      └─► InventoryRejected └─► PaymentFailed (compensates the reservation)
//! ```

use common::{LineItem, OrderId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A message type that can travel over a channel.
pub trait EventContract: Serialize + DeserializeOwned + Send + Sync {
    /// Name stored in [`EventEnvelope::event_type`](crate::EventEnvelope).
    const EVENT_TYPE: &'static str;

    /// Topic name below the namespace, e.g. `created` for `orders.v1.created`.
    const TOPIC_SUFFIX: &'static str;

    /// Payload schema version.
    const SCHEMA_VERSION: u16 = 1;

    /// The order this event belongs to; also the partition key.
    fn order_id(&self) -> OrderId;
}

/// An order was accepted and awaits inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreated {
    pub order_id: OrderId,
    pub customer_id: String,
    pub amount: i64,
    pub currency: String,
    pub items: Vec<LineItem>,
}

/// Stock for every line of an order was decremented.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryReserved {
    pub order_id: OrderId,
    pub reservations: Vec<LineItem>,
}

/// Why the inventory step refused an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectReason {
    /// At least one SKU is unknown or understocked.
    OutOfStock,
    /// The order carried no line items.
    NoItems,
}

impl RejectReason {
    /// Returns the wire name of the reason.
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::OutOfStock => "OUT_OF_STOCK",
            RejectReason::NoItems => "NO_ITEMS",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The inventory step refused an order without touching stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryRejected {
    pub order_id: OrderId,
    pub reason: RejectReason,
    pub requested: Vec<LineItem>,
}

/// The payment adapter authorized the order amount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentAuthorized {
    pub order_id: OrderId,
    pub auth_id: String,
    pub items: Vec<LineItem>,
}

/// The payment adapter declined, timed out or was unreachable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentFailed {
    pub order_id: OrderId,
    pub reason: String,
    pub items: Vec<LineItem>,
}

/// A shipment was scheduled for a paid order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FulfillmentScheduled {
    pub order_id: OrderId,
    pub shipping_id: String,
    pub items: Vec<LineItem>,
}

macro_rules! impl_contract {
    ($ty:ty, $event_type:literal, $suffix:literal) => {
        impl EventContract for $ty {
            const EVENT_TYPE: &'static str = $event_type;
            const TOPIC_SUFFIX: &'static str = $suffix;

            fn order_id(&self) -> OrderId {
                self.order_id
            }
        }
    };
}

impl_contract!(OrderCreated, "OrderCreated", "created");
impl_contract!(InventoryReserved, "InventoryReserved", "inventory_reserved");
impl_contract!(InventoryRejected, "InventoryRejected", "inventory_rejected");
impl_contract!(PaymentAuthorized, "PaymentAuthorized", "payment_authorized");
impl_contract!(PaymentFailed, "PaymentFailed", "payment_failed");
impl_contract!(FulfillmentScheduled, "FulfillmentScheduled", "fulfillment_scheduled");
