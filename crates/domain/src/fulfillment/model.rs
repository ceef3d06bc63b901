use chrono::{DateTime, Utc};
use common::OrderId;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Progress of a shipment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FulfillmentStatus {
    #[default]
    Pending,
    Scheduled,
    Failed,
}

impl FulfillmentStatus {
    /// Returns the status name as stored and shown on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            FulfillmentStatus::Pending => "PENDING",
            FulfillmentStatus::Scheduled => "SCHEDULED",
            FulfillmentStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for FulfillmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned when a string names no fulfillment status.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown fulfillment status: {0}")]
pub struct UnknownFulfillmentStatus(pub String);

impl std::str::FromStr for FulfillmentStatus {
    type Err = UnknownFulfillmentStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(FulfillmentStatus::Pending),
            "SCHEDULED" => Ok(FulfillmentStatus::Scheduled),
            "FAILED" => Ok(FulfillmentStatus::Failed),
            other => Err(UnknownFulfillmentStatus(other.to_string())),
        }
    }
}

/// The shipment of one order. At most one exists per order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fulfillment {
    pub id: Uuid,
    pub order_id: OrderId,
    pub status: FulfillmentStatus,
    pub shipping_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Fulfillment {
    /// The default row for an order seen for the first time.
    pub fn pending(order_id: OrderId, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id,
            status: FulfillmentStatus::Pending,
            shipping_id: None,
            created_at,
            updated_at: created_at,
        }
    }

    /// Marks the shipment scheduled.
    ///
    /// `candidate_shipping_id` is only taken if no shipping ID was assigned
    /// before, so redeliveries keep the first one.
    pub fn schedule(&mut self, candidate_shipping_id: String, now: DateTime<Utc>) {
        self.status = FulfillmentStatus::Scheduled;
        if self.shipping_id.is_none() {
            self.shipping_id = Some(candidate_shipping_id);
        }
        self.updated_at = now;
    }
}
