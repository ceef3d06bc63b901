//! Fulfillment handler.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::OrderId;
use domain::{Fulfillment, FulfillmentStore};
use event_bus::{
    EventBus, EventBusExt, EventContext, EventEnvelope, FulfillmentScheduled, PaymentAuthorized,
    Topics,
};
use uuid::Uuid;

use crate::error::{HandlerError, Result};
use crate::handler::{self, EventHandler};

/// Schedules shipments for paid orders.
pub struct FulfillmentHandler {
    store: Arc<dyn FulfillmentStore>,
    bus: Arc<dyn EventBus>,
    topics: Topics,
}

impl FulfillmentHandler {
    /// Creates a handler over `store`, publishing on `bus`.
    pub fn new(store: Arc<dyn FulfillmentStore>, bus: Arc<dyn EventBus>, topics: Topics) -> Self {
        Self { store, bus, topics }
    }

    /// Handles `PaymentAuthorized`: schedules the shipment and announces it.
    ///
    /// The shipping ID is assigned once per order; redeliveries announce the
    /// same one again.
    #[tracing::instrument(skip_all, fields(order_id = %envelope.order_id))]
    pub async fn on_payment_authorized(&self, envelope: &EventEnvelope) -> Result<()> {
        let event: PaymentAuthorized = envelope.decode()?;
        let created_at = DateTime::from_timestamp_millis(envelope.event_time).unwrap_or_else(Utc::now);

        let fulfillment = self
            .store
            .schedule(event.order_id, created_at, format!("shp-{}", Uuid::new_v4()))
            .await?;
        let shipping_id = fulfillment.shipping_id.clone().unwrap_or_default();
        tracing::info!(%shipping_id, auth_id = %event.auth_id, "shipment scheduled");

        let scheduled = FulfillmentScheduled {
            order_id: event.order_id,
            shipping_id,
            items: event.items,
        };
        self.bus
            .publish_contract(&self.topics, &scheduled, EventContext::follow(envelope))
            .await?;
        metrics::counter!("fulfillments_scheduled_total").increment(1);
        Ok(())
    }

    /// Returns the fulfillment of an order.
    pub async fn get_by_order(&self, order_id: OrderId) -> Result<Option<Fulfillment>> {
        Ok(self.store.get_by_order(order_id).await?)
    }

    /// Returns page `page` (from zero) of `size` fulfillments, newest first.
    pub async fn list(&self, page: usize, size: usize) -> Result<Vec<Fulfillment>> {
        Ok(self.store.list(page.saturating_mul(size), size).await?)
    }
}

#[async_trait]
impl EventHandler for FulfillmentHandler {
    fn component(&self) -> &'static str {
        "fulfillment-handler"
    }

    fn topics(&self, topics: &Topics) -> Vec<String> {
        vec![topics.of::<PaymentAuthorized>()]
    }

    async fn handle(&self, envelope: &EventEnvelope) -> std::result::Result<(), HandlerError> {
        if envelope.is::<PaymentAuthorized>() {
            Ok(self.on_payment_authorized(envelope).await?)
        } else {
            Err(handler::unexpected(self.component(), envelope))
        }
    }
}
