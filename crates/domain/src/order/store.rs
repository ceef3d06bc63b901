use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::OrderId;
use tokio::sync::{Mutex, RwLock};

use super::{ChangeOutcome, Order, OrderChange};
use crate::{Result, StoreError};

/// Persistence for orders.
///
/// `apply` is the only way to change a stored order: it reads the current
/// row, plans the change and writes it while holding that order's row lock.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Inserts a new order. Fails if the ID is taken.
    async fn insert(&self, order: Order) -> Result<()>;

    /// Loads one order.
    async fn get(&self, id: OrderId) -> Result<Option<Order>>;

    /// Lists all orders, newest first.
    async fn list(&self) -> Result<Vec<Order>>;

    /// Atomically applies `change` to the order `id`.
    async fn apply(&self, id: OrderId, change: OrderChange) -> Result<ChangeOutcome>;
}

/// In-memory order store with one lock per order row.
#[derive(Clone, Default)]
pub struct InMemoryOrderStore {
    rows: Arc<RwLock<HashMap<OrderId, Arc<Mutex<Order>>>>>,
}

impl InMemoryOrderStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    async fn row(&self, id: OrderId) -> Option<Arc<Mutex<Order>>> {
        self.rows.read().await.get(&id).cloned()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn insert(&self, order: Order) -> Result<()> {
        let mut rows = self.rows.write().await;
        if rows.contains_key(&order.id) {
            return Err(StoreError::DuplicateOrder(order.id));
        }
        rows.insert(order.id, Arc::new(Mutex::new(order)));
        Ok(())
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>> {
        match self.row(id).await {
            Some(row) => Ok(Some(row.lock().await.clone())),
            None => Ok(None),
        }
    }

    async fn list(&self) -> Result<Vec<Order>> {
        let handles: Vec<_> = self.rows.read().await.values().cloned().collect();
        let mut orders = Vec::with_capacity(handles.len());
        for row in handles {
            orders.push(row.lock().await.clone());
        }
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn apply(&self, id: OrderId, change: OrderChange) -> Result<ChangeOutcome> {
        let Some(row) = self.row(id).await else {
            return Ok(ChangeOutcome::NotFound);
        };

        let mut order = row.lock().await;
        let plan = order.apply_change(change, Utc::now());
        Ok(order.clone().into_outcome(plan))
    }
}
