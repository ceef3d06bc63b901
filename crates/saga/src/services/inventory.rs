//! Inventory reservation engine.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use common::{LineItem, Sku};
use domain::{InventoryRecord, InventoryStore, Reservation, ReserveOutcome};
use event_bus::{
    EventBus, EventBusExt, EventContext, EventEnvelope, InventoryRejected, InventoryReserved,
    OrderCreated, PaymentFailed, RejectReason, Topics,
};

use crate::error::{HandlerError, Result};
use crate::handler::{self, EventHandler};

/// Reserves stock for new orders and gives it back when payment fails.
///
/// A reservation is all-or-nothing: either every line of an order is held
/// or stock is left untouched and the order is rejected.
pub struct InventoryReservationEngine {
    store: Arc<dyn InventoryStore>,
    bus: Arc<dyn EventBus>,
    topics: Topics,
    reservation_ttl: Duration,
}

impl InventoryReservationEngine {
    /// Creates an engine over `store`, publishing on `bus`.
    pub fn new(
        store: Arc<dyn InventoryStore>,
        bus: Arc<dyn EventBus>,
        topics: Topics,
        reservation_ttl: Duration,
    ) -> Self {
        Self {
            store,
            bus,
            topics,
            reservation_ttl,
        }
    }

    /// Handles `OrderCreated`: reserves every line or rejects the order.
    ///
    /// Redelivery of an order that already holds reservations re-announces
    /// them without touching stock.
    #[tracing::instrument(skip_all, fields(order_id = %envelope.order_id))]
    pub async fn on_order_created(&self, envelope: &EventEnvelope) -> Result<()> {
        let event: OrderCreated = envelope.decode()?;
        let ctx = EventContext::follow(envelope);

        let existing = self.store.reservations_for(event.order_id).await?;
        if !existing.is_empty() {
            tracing::debug!(lines = existing.len(), "order already reserved");
            return self.announce_reserved(&event, &existing, ctx).await;
        }

        if event.items.is_empty() {
            return self.reject(&event, RejectReason::NoItems, ctx).await;
        }

        let expires_at = Utc::now()
            + chrono::Duration::from_std(self.reservation_ttl)
                .unwrap_or_else(|_| chrono::Duration::minutes(5));

        match self
            .store
            .reserve(event.order_id, &event.items, expires_at)
            .await?
        {
            ReserveOutcome::Reserved(rows) => {
                metrics::counter!("inventory_reservations_total", "outcome" => "reserved")
                    .increment(1);
                self.announce_reserved(&event, &rows, ctx).await
            }
            ReserveOutcome::AlreadyReserved(rows) => {
                self.announce_reserved(&event, &rows, ctx).await
            }
            ReserveOutcome::Insufficient(shortfalls) => {
                for s in &shortfalls {
                    tracing::info!(
                        sku = %s.sku,
                        requested = s.requested,
                        available = ?s.available,
                        "insufficient stock"
                    );
                }
                metrics::counter!("inventory_reservations_total", "outcome" => "rejected")
                    .increment(1);
                self.reject(&event, RejectReason::OutOfStock, ctx).await
            }
        }
    }

    /// Handles `PaymentFailed`: returns the order's reserved units to stock.
    ///
    /// Releasing an order with no reservations does nothing, so duplicate
    /// deliveries never restore stock twice.
    #[tracing::instrument(skip_all, fields(order_id = %envelope.order_id))]
    pub async fn on_payment_failed(&self, envelope: &EventEnvelope) -> Result<()> {
        let event: PaymentFailed = envelope.decode()?;
        let outcome = self.store.release(event.order_id).await?;

        if outcome.is_empty() {
            tracing::debug!("no reservations to release");
            return Ok(());
        }

        for sku in &outcome.missing_records {
            tracing::warn!(%sku, "inventory record missing, units not returned");
        }
        tracing::info!(
            lines = outcome.released.len(),
            reason = %event.reason,
            "reservation released"
        );
        metrics::counter!("inventory_compensations_total").increment(1);
        Ok(())
    }

    /// Sets the stock level of a SKU.
    pub async fn restock(&self, sku: &Sku, quantity: i64) -> Result<InventoryRecord> {
        let record = self.store.set_quantity(sku, quantity).await?;
        tracing::info!(%sku, quantity, "stock level set");
        Ok(record)
    }

    /// Deletes the record of a SKU. Returns false if it did not exist.
    pub async fn discontinue(&self, sku: &Sku) -> Result<bool> {
        let removed = self.store.remove(sku).await?;
        if removed {
            tracing::info!(%sku, "sku discontinued");
        }
        Ok(removed)
    }

    /// Returns the stock record of a SKU.
    pub async fn stock(&self, sku: &Sku) -> Result<Option<InventoryRecord>> {
        Ok(self.store.get(sku).await?)
    }

    /// Returns all stock records ordered by SKU.
    pub async fn stock_levels(&self) -> Result<Vec<InventoryRecord>> {
        Ok(self.store.list().await?)
    }

    async fn announce_reserved(
        &self,
        event: &OrderCreated,
        rows: &[Reservation],
        ctx: EventContext,
    ) -> Result<()> {
        let reserved = InventoryReserved {
            order_id: event.order_id,
            reservations: rows.iter().map(Reservation::line_item).collect::<Vec<LineItem>>(),
        };
        self.bus
            .publish_contract(&self.topics, &reserved, ctx)
            .await?;
        Ok(())
    }

    async fn reject(
        &self,
        event: &OrderCreated,
        reason: RejectReason,
        ctx: EventContext,
    ) -> Result<()> {
        tracing::info!(%reason, "order rejected by inventory");
        let rejected = InventoryRejected {
            order_id: event.order_id,
            reason,
            requested: event.items.clone(),
        };
        self.bus
            .publish_contract(&self.topics, &rejected, ctx)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl EventHandler for InventoryReservationEngine {
    fn component(&self) -> &'static str {
        "inventory-engine"
    }

    fn topics(&self, topics: &Topics) -> Vec<String> {
        vec![topics.of::<OrderCreated>(), topics.of::<PaymentFailed>()]
    }

    async fn handle(&self, envelope: &EventEnvelope) -> std::result::Result<(), HandlerError> {
        if envelope.is::<OrderCreated>() {
            Ok(self.on_order_created(envelope).await?)
        } else if envelope.is::<PaymentFailed>() {
            Ok(self.on_payment_failed(envelope).await?)
        } else {
            Err(handler::unexpected(self.component(), envelope))
        }
    }
}
