use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::OrderId;
use tokio::sync::{Mutex, RwLock};

use super::Fulfillment;
use crate::Result;

/// Persistence for shipments, keyed by order.
#[async_trait]
pub trait FulfillmentStore: Send + Sync {
    /// Loads the shipment of an order.
    async fn get_by_order(&self, order_id: OrderId) -> Result<Option<Fulfillment>>;

    /// Lists one page of shipments, newest first.
    async fn list(&self, offset: usize, limit: usize) -> Result<Vec<Fulfillment>>;

    /// Schedules the shipment of an order.
    ///
    /// Gets the existing row or a pending default created at `created_at`,
    /// then writes it back scheduled, all under the order's row lock.
    async fn schedule(
        &self,
        order_id: OrderId,
        created_at: DateTime<Utc>,
        candidate_shipping_id: String,
    ) -> Result<Fulfillment>;
}

/// In-memory fulfillment store with one lock per order.
#[derive(Clone, Default)]
pub struct InMemoryFulfillmentStore {
    rows: Arc<RwLock<HashMap<OrderId, Arc<Mutex<Option<Fulfillment>>>>>>,
}

impl InMemoryFulfillmentStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    async fn row(&self, order_id: OrderId) -> Arc<Mutex<Option<Fulfillment>>> {
        if let Some(row) = self.rows.read().await.get(&order_id) {
            return row.clone();
        }
        self.rows
            .write()
            .await
            .entry(order_id)
            .or_default()
            .clone()
    }
}

#[async_trait]
impl FulfillmentStore for InMemoryFulfillmentStore {
    async fn get_by_order(&self, order_id: OrderId) -> Result<Option<Fulfillment>> {
        let row = self.rows.read().await.get(&order_id).cloned();
        match row {
            Some(row) => Ok(row.lock().await.clone()),
            None => Ok(None),
        }
    }

    async fn list(&self, offset: usize, limit: usize) -> Result<Vec<Fulfillment>> {
        let handles: Vec<_> = self.rows.read().await.values().cloned().collect();
        let mut out = Vec::with_capacity(handles.len());
        for row in handles {
            if let Some(f) = row.lock().await.clone() {
                out.push(f);
            }
        }
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out.into_iter().skip(offset).take(limit).collect())
    }

    async fn schedule(
        &self,
        order_id: OrderId,
        created_at: DateTime<Utc>,
        candidate_shipping_id: String,
    ) -> Result<Fulfillment> {
        let row = self.row(order_id).await;
        let mut slot = row.lock().await;

        let mut fulfillment = slot
            .clone()
            .unwrap_or_else(|| Fulfillment::pending(order_id, created_at));
        fulfillment.schedule(candidate_shipping_id, Utc::now());

        *slot = Some(fulfillment.clone());
        Ok(fulfillment)
    }
}
