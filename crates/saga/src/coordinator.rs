//! Order coordinator.
//!
//! Owns the order row and moves it through the saga in reaction to events:
//!
//! ```text
//! PENDING ──InventoryReserved──► INVENTORY_RESERVED ──FulfillmentScheduled──► COMPLETED
//!    │                                  │
//!    └──InventoryRejected──► INVENTORY_REJECTED
//!                                       └──PaymentFailed──► PAYMENT_FAILED
//! ```
//!
//! Any order short of COMPLETED can be retried back to PENDING. The coordinator is
//! also the only caller of the payment adapter; the call fails closed, so a
//! slow or broken adapter ends in `PaymentFailed` and compensation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use common::OrderId;
use domain::{ChangeOutcome, NewOrder, Order, OrderChange, OrderStore, PaymentRecord};
use event_bus::{
    EventBus, EventBusExt, EventContext, EventEnvelope, FulfillmentScheduled, InventoryRejected,
    InventoryReserved, OrderCreated, PaymentAuthorized, PaymentFailed, Topics,
};

use crate::error::{HandlerError, Result, SagaError};
use crate::handler::{self, EventHandler};
use crate::services::payment::{
    ForceOutcome, PaymentDecision, PaymentGateway, PaymentRequest, reasons,
};

/// Drives orders through the saga.
pub struct OrderCoordinator {
    orders: Arc<dyn OrderStore>,
    bus: Arc<dyn EventBus>,
    topics: Topics,
    gateway: Arc<dyn PaymentGateway>,
    payment_timeout: Duration,
    force: Option<ForceOutcome>,
}

impl OrderCoordinator {
    /// Creates a coordinator.
    pub fn new(
        orders: Arc<dyn OrderStore>,
        bus: Arc<dyn EventBus>,
        topics: Topics,
        gateway: Arc<dyn PaymentGateway>,
        payment_timeout: Duration,
    ) -> Self {
        Self {
            orders,
            bus,
            topics,
            gateway,
            payment_timeout,
            force: None,
        }
    }

    /// Forces every payment decision made by this coordinator.
    pub fn with_forced_payment(mut self, force: Option<ForceOutcome>) -> Self {
        self.force = force;
        self
    }

    /// Accepts a new order and starts its saga.
    #[tracing::instrument(skip_all, fields(customer_id = %new.customer_id))]
    pub async fn submit(&self, new: NewOrder) -> Result<Order> {
        let order = Order::new(OrderId::new(), new, Utc::now());
        self.orders.insert(order.clone()).await?;
        self.start(&order).await?;

        metrics::counter!("orders_submitted_total").increment(1);
        tracing::info!(order_id = %order.id, items = order.items.len(), "order submitted");
        Ok(order)
    }

    /// Returns an order.
    pub async fn get(&self, order_id: OrderId) -> Result<Option<Order>> {
        Ok(self.orders.get(order_id).await?)
    }

    /// Returns all orders, newest first.
    pub async fn list(&self) -> Result<Vec<Order>> {
        Ok(self.orders.list().await?)
    }

    /// Restarts the saga of a rejected order with its stored items.
    ///
    /// Completed orders cannot be retried. The new attempt gets a fresh
    /// correlation ID; inventory that is still reserved is not taken twice.
    #[tracing::instrument(skip(self))]
    pub async fn retry(&self, order_id: OrderId) -> Result<Order> {
        match self.orders.apply(order_id, OrderChange::Retry).await? {
            ChangeOutcome::Applied(order) => {
                self.start(&order).await?;
                metrics::counter!("orders_retried_total").increment(1);
                tracing::info!("order retried");
                Ok(order)
            }
            ChangeOutcome::Unchanged(order) | ChangeOutcome::Rejected(order) => {
                Err(SagaError::InvalidState {
                    order_id,
                    status: order.status,
                })
            }
            ChangeOutcome::NotFound => Err(SagaError::OrderNotFound(order_id)),
        }
    }

    /// Handles `InventoryReserved`: decides payment and announces the result.
    ///
    /// The decision is stored on the order before it is published, so a
    /// redelivered event republishes the same decision instead of charging
    /// again.
    #[tracing::instrument(skip_all, fields(order_id = %envelope.order_id))]
    pub async fn on_inventory_reserved(&self, envelope: &EventEnvelope) -> Result<()> {
        let event: InventoryReserved = envelope.decode()?;

        let order = match self
            .orders
            .apply(event.order_id, OrderChange::InventoryReserved)
            .await?
        {
            ChangeOutcome::Applied(order) | ChangeOutcome::Unchanged(order) => order,
            ChangeOutcome::Rejected(order) => {
                tracing::warn!(status = %order.status, "ignoring InventoryReserved");
                return Ok(());
            }
            ChangeOutcome::NotFound => return Err(SagaError::OrderNotFound(event.order_id)),
        };

        let record = match order.payment.clone() {
            Some(record) => {
                tracing::debug!("replaying recorded payment decision");
                record
            }
            None => {
                let decision = self.authorize(&order).await;
                let record = if decision.is_authorized() {
                    match decision.auth_id {
                        Some(auth_id) => PaymentRecord::Authorized { auth_id },
                        None => PaymentRecord::Declined {
                            reason: reasons::MISSING_AUTH_ID.to_string(),
                        },
                    }
                } else {
                    PaymentRecord::Declined {
                        reason: decision
                            .reason
                            .unwrap_or_else(|| reasons::PAYMENT_UNAVAILABLE.to_string()),
                    }
                };
                match self
                    .orders
                    .apply(event.order_id, OrderChange::PaymentDecided(record.clone()))
                    .await?
                {
                    ChangeOutcome::Applied(_) => record,
                    // Another delivery recorded first; publish what it recorded.
                    ChangeOutcome::Unchanged(current) => current.payment.unwrap_or(record),
                    ChangeOutcome::Rejected(current) => {
                        tracing::warn!(status = %current.status, "order moved on, dropping decision");
                        return Ok(());
                    }
                    ChangeOutcome::NotFound => {
                        return Err(SagaError::OrderNotFound(event.order_id));
                    }
                }
            }
        };

        let ctx = EventContext::follow(envelope);
        match record {
            PaymentRecord::Authorized { auth_id } => {
                metrics::counter!("payment_decisions_total", "status" => "authorized")
                    .increment(1);
                let authorized = PaymentAuthorized {
                    order_id: event.order_id,
                    auth_id,
                    items: order.items.clone(),
                };
                self.bus
                    .publish_contract(&self.topics, &authorized, ctx)
                    .await?;
            }
            PaymentRecord::Declined { reason } => {
                metrics::counter!("payment_decisions_total", "status" => "declined")
                    .increment(1);
                let failed = PaymentFailed {
                    order_id: event.order_id,
                    reason,
                    items: order.items.clone(),
                };
                self.bus.publish_contract(&self.topics, &failed, ctx).await?;
            }
        }
        Ok(())
    }

    /// Handles `InventoryRejected`.
    #[tracing::instrument(skip_all, fields(order_id = %envelope.order_id))]
    pub async fn on_inventory_rejected(&self, envelope: &EventEnvelope) -> Result<()> {
        let event: InventoryRejected = envelope.decode()?;
        tracing::info!(reason = %event.reason, "inventory rejected order");
        self.transition(event.order_id, OrderChange::InventoryRejected)
            .await
    }

    /// Handles `PaymentFailed`.
    #[tracing::instrument(skip_all, fields(order_id = %envelope.order_id))]
    pub async fn on_payment_failed(&self, envelope: &EventEnvelope) -> Result<()> {
        let event: PaymentFailed = envelope.decode()?;
        tracing::info!(reason = %event.reason, "payment failed");
        self.transition(event.order_id, OrderChange::PaymentFailed)
            .await
    }

    /// Handles `FulfillmentScheduled`.
    #[tracing::instrument(skip_all, fields(order_id = %envelope.order_id))]
    pub async fn on_fulfillment_scheduled(&self, envelope: &EventEnvelope) -> Result<()> {
        let event: FulfillmentScheduled = envelope.decode()?;
        tracing::info!(shipping_id = %event.shipping_id, "fulfillment scheduled");
        self.transition(event.order_id, OrderChange::FulfillmentScheduled)
            .await?;
        metrics::counter!("orders_completed_total").increment(1);
        Ok(())
    }

    async fn start(&self, order: &Order) -> Result<()> {
        let created = OrderCreated {
            order_id: order.id,
            customer_id: order.customer_id.clone(),
            amount: order.amount,
            currency: order.currency.clone(),
            items: order.items.clone(),
        };
        self.bus
            .publish_contract(&self.topics, &created, EventContext::root())
            .await?;
        Ok(())
    }

    async fn transition(&self, order_id: OrderId, change: OrderChange) -> Result<()> {
        let name = change.as_str();
        match self.orders.apply(order_id, change).await? {
            ChangeOutcome::Applied(order) => {
                tracing::info!(status = %order.status, "order status changed");
                Ok(())
            }
            ChangeOutcome::Unchanged(_) => {
                tracing::debug!(change = name, "duplicate delivery");
                Ok(())
            }
            ChangeOutcome::Rejected(order) => {
                tracing::warn!(change = name, status = %order.status, "illegal transition ignored");
                Ok(())
            }
            ChangeOutcome::NotFound => Err(SagaError::OrderNotFound(order_id)),
        }
    }

    async fn authorize(&self, order: &Order) -> PaymentDecision {
        let request = PaymentRequest {
            order_id: order.id,
            amount: order.amount,
            currency: order.currency.clone(),
            items: order.items.clone(),
        };

        let start = std::time::Instant::now();
        let decision = match tokio::time::timeout(
            self.payment_timeout,
            self.gateway.authorize(&request, self.force),
        )
        .await
        {
            Ok(Ok(decision)) => decision,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "payment adapter unavailable");
                PaymentDecision::declined(reasons::PAYMENT_UNAVAILABLE)
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.payment_timeout.as_millis() as u64,
                    "payment adapter timed out"
                );
                PaymentDecision::declined(reasons::PAYMENT_TIMEOUT)
            }
        };
        metrics::histogram!("payment_call_duration_seconds")
            .record(start.elapsed().as_secs_f64());
        decision
    }
}

#[async_trait]
impl EventHandler for OrderCoordinator {
    fn component(&self) -> &'static str {
        "order-coordinator"
    }

    fn topics(&self, topics: &Topics) -> Vec<String> {
        vec![
            topics.of::<InventoryReserved>(),
            topics.of::<InventoryRejected>(),
            topics.of::<PaymentFailed>(),
            topics.of::<FulfillmentScheduled>(),
        ]
    }

    async fn handle(&self, envelope: &EventEnvelope) -> std::result::Result<(), HandlerError> {
        let result = if envelope.is::<InventoryReserved>() {
            self.on_inventory_reserved(envelope).await
        } else if envelope.is::<InventoryRejected>() {
            self.on_inventory_rejected(envelope).await
        } else if envelope.is::<PaymentFailed>() {
            self.on_payment_failed(envelope).await
        } else if envelope.is::<FulfillmentScheduled>() {
            self.on_fulfillment_scheduled(envelope).await
        } else {
            return Err(handler::unexpected(self.component(), envelope));
        };
        Ok(result?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::LineItem;
    use domain::{InMemoryOrderStore, OrderStatus};
    use event_bus::InMemoryEventBus;

    use crate::services::payment::{LocalPaymentGateway, PaymentDecider};

    fn coordinator(bus: Arc<InMemoryEventBus>, force: Option<ForceOutcome>) -> OrderCoordinator {
        OrderCoordinator::new(
            Arc::new(InMemoryOrderStore::new()),
            bus,
            Topics::default(),
            Arc::new(LocalPaymentGateway::new(PaymentDecider::new(0))),
            Duration::from_secs(1),
        )
        .with_forced_payment(force)
    }

    fn new_order() -> NewOrder {
        NewOrder {
            customer_id: "c1".to_string(),
            amount: 1000,
            currency: "KRW".to_string(),
            items: vec![LineItem::new("X", 2)],
        }
    }

    fn reserved(order_id: OrderId) -> EventEnvelope {
        EventEnvelope::wrap(
            &Topics::default(),
            &InventoryReserved {
                order_id,
                reservations: vec![LineItem::new("X", 2)],
            },
            EventContext::root(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_submit_publishes_order_created() {
        let bus = Arc::new(InMemoryEventBus::new());
        let c = coordinator(bus.clone(), None);
        let order = c.submit(new_order()).await.unwrap();

        assert_eq!(order.status, OrderStatus::Pending);
        let published = bus.published_for(order.id).await;
        assert_eq!(published.len(), 1);
        assert!(published[0].is::<OrderCreated>());
        assert_eq!(published[0].causation_id, None);
    }

    #[tokio::test]
    async fn test_redelivered_reservation_replays_decision() {
        let bus = Arc::new(InMemoryEventBus::new());
        let c = coordinator(bus.clone(), Some(ForceOutcome::Success));
        let order = c.submit(new_order()).await.unwrap();
        let env = reserved(order.id);

        c.on_inventory_reserved(&env).await.unwrap();
        c.on_inventory_reserved(&env).await.unwrap();

        let published = bus
            .published(&Topics::default().of::<PaymentAuthorized>())
            .await;
        assert_eq!(published.len(), 2);
        let first: PaymentAuthorized = published[0].decode().unwrap();
        let second: PaymentAuthorized = published[1].decode().unwrap();
        assert_eq!(first.auth_id, second.auth_id);
        assert_eq!(
            c.get(order.id).await.unwrap().unwrap().status,
            OrderStatus::InventoryReserved
        );
    }

    #[tokio::test]
    async fn test_unknown_order_is_reported() {
        let c = coordinator(Arc::new(InMemoryEventBus::new()), None);
        let err = c.handle(&reserved(OrderId::new())).await.unwrap_err();
        assert!(matches!(err, HandlerError::UnknownOrder(_)));
    }

    #[tokio::test]
    async fn test_retry_of_completed_order_is_invalid() {
        let bus = Arc::new(InMemoryEventBus::new());
        let c = coordinator(bus.clone(), Some(ForceOutcome::Success));
        let order = c.submit(new_order()).await.unwrap();
        c.on_inventory_reserved(&reserved(order.id)).await.unwrap();
        let scheduled = EventEnvelope::wrap(
            &Topics::default(),
            &FulfillmentScheduled {
                order_id: order.id,
                shipping_id: "shp-1".to_string(),
                items: vec![LineItem::new("X", 2)],
            },
            EventContext::root(),
        )
        .unwrap();
        c.on_fulfillment_scheduled(&scheduled).await.unwrap();

        let err = c.retry(order.id).await.unwrap_err();
        assert!(matches!(
            err,
            SagaError::InvalidState {
                status: OrderStatus::Completed,
                ..
            }
        ));
        assert!(matches!(
            c.retry(OrderId::new()).await,
            Err(SagaError::OrderNotFound(_))
        ));
    }
}
