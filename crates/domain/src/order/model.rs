//! The order row and the changes the coordinator applies to it.

use chrono::{DateTime, Utc};
use common::{LineItem, OrderId};
use serde::{Deserialize, Serialize};

use super::OrderStatus;

/// Outcome of the payment step, recorded on the order so a redelivered
/// `InventoryReserved` can replay it instead of deciding again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentRecord {
    Authorized {
        #[serde(rename = "authId")]
        auth_id: String,
    },
    Declined {
        reason: String,
    },
}

impl PaymentRecord {
    /// Returns true for an authorization.
    pub fn is_authorized(&self) -> bool {
        matches!(self, PaymentRecord::Authorized { .. })
    }
}

/// The fields a customer supplies when submitting an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOrder {
    pub customer_id: String,
    pub amount: i64,
    pub currency: String,
    pub items: Vec<LineItem>,
}

/// An order as owned by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: OrderId,
    pub customer_id: String,
    /// Amount in minor currency units.
    pub amount: i64,
    pub currency: String,
    pub status: OrderStatus,
    /// The submitted line items, kept so a retry can resubmit them.
    pub items: Vec<LineItem>,
    pub payment: Option<PaymentRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A status change requested by an event or by the retry operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderChange {
    InventoryReserved,
    InventoryRejected,
    PaymentDecided(PaymentRecord),
    PaymentFailed,
    FulfillmentScheduled,
    Retry,
}

impl OrderChange {
    /// Returns a short name for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderChange::InventoryReserved => "inventory_reserved",
            OrderChange::InventoryRejected => "inventory_rejected",
            OrderChange::PaymentDecided(_) => "payment_decided",
            OrderChange::PaymentFailed => "payment_failed",
            OrderChange::FulfillmentScheduled => "fulfillment_scheduled",
            OrderChange::Retry => "retry",
        }
    }
}

/// What applying a change to the current row would do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangePlan {
    /// The change is legal and alters the row.
    Apply,
    /// The row already reflects the change (duplicate delivery).
    Unchanged,
    /// The change does not originate from the current status.
    Reject,
}

/// Result of [`OrderStore::apply`](crate::OrderStore::apply).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeOutcome {
    /// The change was written; carries the new row.
    Applied(Order),
    /// Nothing to write; carries the current row.
    Unchanged(Order),
    /// The change is illegal from the current status; carries the current row.
    Rejected(Order),
    /// No order with this ID exists.
    NotFound,
}

impl Order {
    /// Creates a new pending order.
    pub fn new(id: OrderId, new: NewOrder, now: DateTime<Utc>) -> Self {
        Self {
            id,
            customer_id: new.customer_id,
            amount: new.amount,
            currency: new.currency,
            status: OrderStatus::Pending,
            items: new.items,
            payment: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Decides what `change` would do to this order without mutating it.
    pub fn plan(&self, change: &OrderChange) -> ChangePlan {
        use ChangePlan::*;

        match change {
            OrderChange::InventoryReserved => match self.status {
                OrderStatus::InventoryReserved => Unchanged,
                s if s.can_reserve_inventory() => Apply,
                _ => Reject,
            },
            OrderChange::InventoryRejected => match self.status {
                OrderStatus::InventoryRejected => Unchanged,
                s if s.can_reject_inventory() => Apply,
                _ => Reject,
            },
            OrderChange::PaymentDecided(_) => {
                if !self.status.can_decide_payment() {
                    Reject
                } else if self.payment.is_some() {
                    Unchanged
                } else {
                    Apply
                }
            }
            OrderChange::PaymentFailed => match self.status {
                OrderStatus::PaymentFailed => Unchanged,
                s if s.can_fail_payment() => Apply,
                _ => Reject,
            },
            OrderChange::FulfillmentScheduled => match self.status {
                OrderStatus::Completed => Unchanged,
                s if s.can_complete() => Apply,
                _ => Reject,
            },
            OrderChange::Retry => {
                if self.status.can_retry() {
                    Apply
                } else {
                    Reject
                }
            }
        }
    }

    /// Plans `change` and, if legal, applies it.
    ///
    /// Read, validate and write happen on the same value, so callers that
    /// hold the row lock get an atomic transition.
    pub fn apply_change(&mut self, change: OrderChange, now: DateTime<Utc>) -> ChangePlan {
        let plan = self.plan(&change);
        if plan != ChangePlan::Apply {
            return plan;
        }

        match change {
            OrderChange::InventoryReserved => self.status = OrderStatus::InventoryReserved,
            OrderChange::InventoryRejected => self.status = OrderStatus::InventoryRejected,
            OrderChange::PaymentDecided(record) => self.payment = Some(record),
            OrderChange::PaymentFailed => self.status = OrderStatus::PaymentFailed,
            OrderChange::FulfillmentScheduled => self.status = OrderStatus::Completed,
            OrderChange::Retry => {
                self.status = OrderStatus::Pending;
                self.payment = None;
            }
        }
        self.updated_at = now;
        plan
    }

    /// Converts a plan and the row it ran against into a store outcome.
    pub fn into_outcome(self, plan: ChangePlan) -> ChangeOutcome {
        match plan {
            ChangePlan::Apply => ChangeOutcome::Applied(self),
            ChangePlan::Unchanged => ChangeOutcome::Unchanged(self),
            ChangePlan::Reject => ChangeOutcome::Rejected(self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order_in(status: OrderStatus) -> Order {
        let mut order = Order::new(
            OrderId::new(),
            NewOrder {
                customer_id: "c1".to_string(),
                amount: 1000,
                currency: "KRW".to_string(),
                items: vec![LineItem::new("X", 2)],
            },
            Utc::now(),
        );
        order.status = status;
        order
    }

    fn declined() -> PaymentRecord {
        PaymentRecord::Declined {
            reason: "RANDOM_DECLINE".to_string(),
        }
    }

    #[test]
    fn test_new_order_is_pending_with_items() {
        let order = order_in(OrderStatus::Pending);
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.items, vec![LineItem::new("X", 2)]);
        assert!(order.payment.is_none());
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut order = order_in(OrderStatus::Pending);
        let now = Utc::now();

        assert_eq!(
            order.apply_change(OrderChange::InventoryReserved, now),
            ChangePlan::Apply
        );
        assert_eq!(
            order.apply_change(
                OrderChange::PaymentDecided(PaymentRecord::Authorized {
                    auth_id: "pay-1".to_string()
                }),
                now
            ),
            ChangePlan::Apply
        );
        assert_eq!(
            order.apply_change(OrderChange::FulfillmentScheduled, now),
            ChangePlan::Apply
        );
        assert_eq!(order.status, OrderStatus::Completed);
        assert!(order.payment.as_ref().unwrap().is_authorized());
    }

    #[test]
    fn test_duplicate_events_are_unchanged() {
        let mut order = order_in(OrderStatus::InventoryReserved);
        let before = order.clone();
        assert_eq!(
            order.apply_change(OrderChange::InventoryReserved, Utc::now()),
            ChangePlan::Unchanged
        );
        assert_eq!(order, before);

        assert_eq!(
            order_in(OrderStatus::InventoryRejected).plan(&OrderChange::InventoryRejected),
            ChangePlan::Unchanged
        );
        assert_eq!(
            order_in(OrderStatus::PaymentFailed).plan(&OrderChange::PaymentFailed),
            ChangePlan::Unchanged
        );
        assert_eq!(
            order_in(OrderStatus::Completed).plan(&OrderChange::FulfillmentScheduled),
            ChangePlan::Unchanged
        );
    }

    #[test]
    fn test_out_of_order_events_are_rejected() {
        assert_eq!(
            order_in(OrderStatus::Pending).plan(&OrderChange::FulfillmentScheduled),
            ChangePlan::Reject
        );
        assert_eq!(
            order_in(OrderStatus::Completed).plan(&OrderChange::InventoryReserved),
            ChangePlan::Reject
        );
        assert_eq!(
            order_in(OrderStatus::PaymentFailed).plan(&OrderChange::FulfillmentScheduled),
            ChangePlan::Reject
        );
        assert_eq!(
            order_in(OrderStatus::InventoryRejected).plan(&OrderChange::PaymentFailed),
            ChangePlan::Reject
        );
    }

    #[test]
    fn test_payment_decision_recorded_once() {
        let mut order = order_in(OrderStatus::InventoryReserved);
        let now = Utc::now();

        assert_eq!(
            order.apply_change(OrderChange::PaymentDecided(declined()), now),
            ChangePlan::Apply
        );
        let again = OrderChange::PaymentDecided(PaymentRecord::Authorized {
            auth_id: "pay-2".to_string(),
        });
        assert_eq!(order.apply_change(again, now), ChangePlan::Unchanged);
        assert_eq!(order.payment, Some(declined()));

        assert_eq!(
            order_in(OrderStatus::Pending).plan(&OrderChange::PaymentDecided(declined())),
            ChangePlan::Reject
        );
    }

    #[test]
    fn test_retry_resets_to_pending_and_clears_payment() {
        let mut order = order_in(OrderStatus::InventoryReserved);
        order.payment = Some(declined());
        order.status = OrderStatus::PaymentFailed;

        assert_eq!(
            order.apply_change(OrderChange::Retry, Utc::now()),
            ChangePlan::Apply
        );
        assert_eq!(order.status, OrderStatus::Pending);
        assert!(order.payment.is_none());
        assert_eq!(order.items, vec![LineItem::new("X", 2)]);
    }

    #[test]
    fn test_retry_rejected_when_completed() {
        let mut order = order_in(OrderStatus::Completed);
        assert_eq!(
            order.apply_change(OrderChange::Retry, Utc::now()),
            ChangePlan::Reject
        );
        assert_eq!(order.status, OrderStatus::Completed);
    }

    #[test]
    fn test_payment_record_wire_shape() {
        let json = serde_json::to_value(PaymentRecord::Authorized {
            auth_id: "pay-1".to_string(),
        })
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "status": "AUTHORIZED", "authId": "pay-1" })
        );
    }
}
