//! Topic naming.

use crate::contracts::{
    EventContract, FulfillmentScheduled, InventoryRejected, InventoryReserved, OrderCreated,
    PaymentAuthorized, PaymentFailed,
};

/// Default namespace prefix for every saga topic.
pub const DEFAULT_NAMESPACE: &str = "orders.v1";

/// Resolves contract types to topic names under a namespace.
///
/// With the default namespace the channels are `orders.v1.created`,
/// `orders.v1.inventory_reserved`, and so on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    namespace: String,
}

impl Topics {
    /// Creates topic names under the given namespace.
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    /// Returns the namespace prefix.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Returns the topic that carries contract `C`.
    pub fn of<C: EventContract>(&self) -> String {
        format!("{}.{}", self.namespace, C::TOPIC_SUFFIX)
    }

    /// Returns every saga topic.
    pub fn all(&self) -> Vec<String> {
        vec![
            self.of::<OrderCreated>(),
            self.of::<InventoryReserved>(),
            self.of::<InventoryRejected>(),
            self.of::<PaymentAuthorized>(),
            self.of::<PaymentFailed>(),
            self.of::<FulfillmentScheduled>(),
        ]
    }
}

impl Default for Topics {
    fn default() -> Self {
        Self::new(DEFAULT_NAMESPACE)
    }
}
