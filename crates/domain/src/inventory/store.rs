use std::collections::HashMap;
use std::sync::{Arc, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{LineItem, OrderId, Sku, coalesce};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use super::model::{self, InventoryRecord, ReleaseOutcome, Reservation, ReserveOutcome};
use crate::{Result, StoreError};

/// Persistence for stock levels and the reservations held against them.
///
/// `reserve` and `release` are the only operations that move stock between
/// records and reservations. Both are atomic per order and serialize on the
/// SKUs they touch, always locking SKUs in sorted order.
#[async_trait]
pub trait InventoryStore: Send + Sync {
    /// Loads one inventory record.
    async fn get(&self, sku: &Sku) -> Result<Option<InventoryRecord>>;

    /// Lists all inventory records ordered by SKU.
    async fn list(&self) -> Result<Vec<InventoryRecord>>;

    /// Sets the stock level of a SKU, creating the record if needed.
    async fn set_quantity(&self, sku: &Sku, quantity: i64) -> Result<InventoryRecord>;

    /// Deletes the record of a SKU. Returns false if there was none.
    ///
    /// Reservations against the SKU are kept; releasing them later reports
    /// the SKU in [`ReleaseOutcome::missing_records`].
    async fn remove(&self, sku: &Sku) -> Result<bool>;

    /// Returns the reservations an order holds, in line order.
    async fn reservations_for(&self, order_id: OrderId) -> Result<Vec<Reservation>>;

    /// Reserves every line of an order, or nothing.
    ///
    /// Duplicate SKUs are merged first. If the order already holds
    /// reservations they are returned untouched.
    async fn reserve(
        &self,
        order_id: OrderId,
        items: &[LineItem],
        expires_at: DateTime<Utc>,
    ) -> Result<ReserveOutcome>;

    /// Returns the units held by an order to stock and deletes its
    /// reservations. Releasing an order without reservations is a no-op.
    async fn release(&self, order_id: OrderId) -> Result<ReleaseOutcome>;
}

type StockRow = Arc<Mutex<i64>>;

#[derive(Default)]
struct InventoryState {
    stock: RwLock<HashMap<Sku, StockRow>>,
    reservations: RwLock<HashMap<OrderId, Vec<Reservation>>>,
    order_locks: std::sync::Mutex<HashMap<OrderId, Arc<Mutex<()>>>>,
}

/// Holds an order's gate. The gate's entry is removed once nobody holds or
/// waits on it.
struct OrderGate {
    state: Arc<InventoryState>,
    order_id: OrderId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for OrderGate {
    fn drop(&mut self) {
        let mut locks = self
            .state
            .order_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.guard.take();
        if locks
            .get(&self.order_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.order_id);
        }
    }
}

/// In-memory inventory with one lock per SKU and one per order.
#[derive(Clone, Default)]
pub struct InMemoryInventoryStore {
    state: Arc<InventoryState>,
}

impl InMemoryInventoryStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    async fn order_lock(&self, order_id: OrderId) -> OrderGate {
        let lock = self
            .state
            .order_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(order_id)
            .or_default()
            .clone();
        OrderGate {
            state: self.state.clone(),
            order_id,
            guard: Some(lock.lock_owned().await),
        }
    }

    /// Locks the rows of `skus` in sorted order. Unknown SKUs are skipped.
    async fn lock_rows(&self, skus: &[Sku]) -> HashMap<Sku, OwnedMutexGuard<i64>> {
        let mut sorted: Vec<&Sku> = skus.iter().collect();
        sorted.sort();
        sorted.dedup();

        let rows: Vec<(Sku, StockRow)> = {
            let stock = self.state.stock.read().await;
            sorted
                .into_iter()
                .filter_map(|sku| stock.get(sku).map(|row| (sku.clone(), row.clone())))
                .collect()
        };

        let mut guards = HashMap::with_capacity(rows.len());
        for (sku, row) in rows {
            guards.insert(sku, row.lock_owned().await);
        }
        guards
    }
}

#[async_trait]
impl InventoryStore for InMemoryInventoryStore {
    async fn get(&self, sku: &Sku) -> Result<Option<InventoryRecord>> {
        let row = self.state.stock.read().await.get(sku).cloned();
        match row {
            Some(row) => Ok(Some(InventoryRecord {
                sku: sku.clone(),
                quantity: *row.lock().await,
            })),
            None => Ok(None),
        }
    }

    async fn list(&self) -> Result<Vec<InventoryRecord>> {
        let mut rows: Vec<(Sku, StockRow)> = self
            .state
            .stock
            .read()
            .await
            .iter()
            .map(|(sku, row)| (sku.clone(), row.clone()))
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));

        let mut records = Vec::with_capacity(rows.len());
        for (sku, row) in rows {
            let quantity = *row.lock().await;
            records.push(InventoryRecord { sku, quantity });
        }
        Ok(records)
    }

    async fn set_quantity(&self, sku: &Sku, quantity: i64) -> Result<InventoryRecord> {
        if quantity < 0 {
            return Err(StoreError::InvalidQuantity {
                sku: sku.clone(),
                quantity,
            });
        }

        let row = self
            .state
            .stock
            .write()
            .await
            .entry(sku.clone())
            .or_default()
            .clone();
        *row.lock().await = quantity;

        Ok(InventoryRecord {
            sku: sku.clone(),
            quantity,
        })
    }

    async fn remove(&self, sku: &Sku) -> Result<bool> {
        Ok(self.state.stock.write().await.remove(sku).is_some())
    }

    async fn reservations_for(&self, order_id: OrderId) -> Result<Vec<Reservation>> {
        Ok(self
            .state
            .reservations
            .read()
            .await
            .get(&order_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn reserve(
        &self,
        order_id: OrderId,
        items: &[LineItem],
        expires_at: DateTime<Utc>,
    ) -> Result<ReserveOutcome> {
        let _order = self.order_lock(order_id).await;

        let existing = self.reservations_for(order_id).await?;
        if !existing.is_empty() {
            return Ok(ReserveOutcome::AlreadyReserved(existing));
        }

        let items = coalesce(items);
        let skus: Vec<Sku> = items.iter().map(|i| i.sku.clone()).collect();
        let mut rows = self.lock_rows(&skus).await;

        let short = model::shortfalls(&items, |sku| rows.get(sku).map(|q| **q));
        if !short.is_empty() {
            return Ok(ReserveOutcome::Insufficient(short));
        }

        for item in &items {
            if let Some(quantity) = rows.get_mut(&item.sku) {
                **quantity -= i64::from(item.quantity);
            }
        }

        let reservations = model::reservations_for(order_id, &items, expires_at);
        self.state
            .reservations
            .write()
            .await
            .insert(order_id, reservations.clone());

        Ok(ReserveOutcome::Reserved(reservations))
    }

    async fn release(&self, order_id: OrderId) -> Result<ReleaseOutcome> {
        let _order = self.order_lock(order_id).await;

        let held = self.reservations_for(order_id).await?;
        if held.is_empty() {
            return Ok(ReleaseOutcome::default());
        }

        let skus: Vec<Sku> = held.iter().map(|r| r.sku.clone()).collect();
        let mut rows = self.lock_rows(&skus).await;

        let mut missing_records = Vec::new();
        for reservation in &held {
            match rows.get_mut(&reservation.sku) {
                Some(quantity) => **quantity += i64::from(reservation.quantity),
                None => missing_records.push(reservation.sku.clone()),
            }
        }

        self.state.reservations.write().await.remove(&order_id);

        Ok(ReleaseOutcome {
            released: held,
            missing_records,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::sync::atomic::{AtomicBool, Ordering};

    async fn stocked(levels: &[(&str, i64)]) -> InMemoryInventoryStore {
        let store = InMemoryInventoryStore::new();
        for (sku, qty) in levels {
            store.set_quantity(&Sku::from(*sku), *qty).await.unwrap();
        }
        store
    }

    async fn quantity(store: &InMemoryInventoryStore, sku: &str) -> Option<i64> {
        store
            .get(&Sku::from(sku))
            .await
            .unwrap()
            .map(|r| r.quantity)
    }

    fn expiry() -> DateTime<Utc> {
        Utc::now() + Duration::minutes(5)
    }

    #[tokio::test]
    async fn test_reserve_decrements_and_records_rows() {
        let store = stocked(&[("A", 10)]).await;
        let order_id = OrderId::new();

        let outcome = store
            .reserve(order_id, &[LineItem::new("A", 3)], expiry())
            .await
            .unwrap();

        let ReserveOutcome::Reserved(rows) = outcome else {
            panic!("expected Reserved, got {outcome:?}");
        };
        assert_eq!(rows.len(), 1);
        assert_eq!(quantity(&store, "A").await, Some(7));
        assert_eq!(store.reservations_for(order_id).await.unwrap(), rows);
    }

    #[tokio::test]
    async fn test_second_reserve_returns_existing_rows() {
        let store = stocked(&[("A", 10)]).await;
        let order_id = OrderId::new();
        let items = [LineItem::new("A", 3)];

        let ReserveOutcome::Reserved(first) = store.reserve(order_id, &items, expiry()).await.unwrap()
        else {
            panic!("expected Reserved");
        };
        let second = store.reserve(order_id, &items, expiry()).await.unwrap();

        assert_eq!(second, ReserveOutcome::AlreadyReserved(first));
        assert_eq!(quantity(&store, "A").await, Some(7));
    }

    #[tokio::test]
    async fn test_insufficient_stock_touches_nothing() {
        let store = stocked(&[("A", 10), ("B", 3)]).await;
        let order_id = OrderId::new();

        let outcome = store
            .reserve(
                order_id,
                &[LineItem::new("A", 5), LineItem::new("B", 999_999)],
                expiry(),
            )
            .await
            .unwrap();

        let ReserveOutcome::Insufficient(short) = outcome else {
            panic!("expected Insufficient, got {outcome:?}");
        };
        assert_eq!(short.len(), 1);
        assert_eq!(short[0].sku, Sku::from("B"));
        assert_eq!(quantity(&store, "A").await, Some(10));
        assert_eq!(quantity(&store, "B").await, Some(3));
        assert!(store.reservations_for(order_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_sku_is_short_and_not_created() {
        let store = InMemoryInventoryStore::new();
        let outcome = store
            .reserve(OrderId::new(), &[LineItem::new("GHOST", 1)], expiry())
            .await
            .unwrap();

        assert!(matches!(outcome, ReserveOutcome::Insufficient(ref s) if s[0].available.is_none()));
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_skus_are_merged() {
        let store = stocked(&[("A", 4)]).await;
        let order_id = OrderId::new();

        let outcome = store
            .reserve(
                order_id,
                &[LineItem::new("A", 3), LineItem::new("A", 2)],
                expiry(),
            )
            .await
            .unwrap();
        assert!(matches!(outcome, ReserveOutcome::Insufficient(_)));

        store.set_quantity(&Sku::from("A"), 5).await.unwrap();
        let outcome = store
            .reserve(
                order_id,
                &[LineItem::new("A", 3), LineItem::new("A", 2)],
                expiry(),
            )
            .await
            .unwrap();
        let ReserveOutcome::Reserved(rows) = outcome else {
            panic!("expected Reserved");
        };
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].quantity, 5);
        assert_eq!(quantity(&store, "A").await, Some(0));
    }

    #[tokio::test]
    async fn test_release_restores_stock_once() {
        let store = stocked(&[("A", 10)]).await;
        let order_id = OrderId::new();
        store
            .reserve(order_id, &[LineItem::new("A", 3)], expiry())
            .await
            .unwrap();

        let released = store.release(order_id).await.unwrap();
        assert_eq!(released.released.len(), 1);
        assert!(released.missing_records.is_empty());
        assert_eq!(quantity(&store, "A").await, Some(10));

        let again = store.release(order_id).await.unwrap();
        assert!(again.is_empty());
        assert_eq!(quantity(&store, "A").await, Some(10));
    }

    #[tokio::test]
    async fn test_release_after_sku_removed_reports_missing_record() {
        let store = stocked(&[("A", 10), ("B", 10)]).await;
        let order_id = OrderId::new();
        store
            .reserve(
                order_id,
                &[LineItem::new("A", 2), LineItem::new("B", 1)],
                expiry(),
            )
            .await
            .unwrap();

        assert!(store.remove(&Sku::from("B")).await.unwrap());
        assert!(!store.remove(&Sku::from("B")).await.unwrap());

        let released = store.release(order_id).await.unwrap();
        assert_eq!(released.missing_records, vec![Sku::from("B")]);
        assert_eq!(quantity(&store, "A").await, Some(10));
        assert_eq!(quantity(&store, "B").await, None);
        assert!(store.reservations_for(order_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_set_quantity_rejects_negative() {
        let store = InMemoryInventoryStore::new();
        let err = store.set_quantity(&Sku::from("A"), -1).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidQuantity { .. }));
    }

    #[tokio::test]
    async fn test_list_is_sorted_by_sku() {
        let store = stocked(&[("B", 1), ("A", 2)]).await;
        let skus: Vec<_> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.sku)
            .collect();
        assert_eq!(skus, vec![Sku::from("A"), Sku::from("B")]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_reservations_never_oversell() {
        let n = 50;
        let store = stocked(&[("HOT", n)]).await;

        let mut handles = Vec::new();
        for _ in 0..=n {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .reserve(OrderId::new(), &[LineItem::new("HOT", 1)], expiry())
                    .await
                    .unwrap()
            }));
        }

        let done = Arc::new(AtomicBool::new(false));
        let observer = {
            let store = store.clone();
            let done = done.clone();
            tokio::spawn(async move {
                let mut lowest = i64::MAX;
                while !done.load(Ordering::Acquire) {
                    if let Some(level) = quantity(&store, "HOT").await {
                        lowest = lowest.min(level);
                    }
                    tokio::task::yield_now().await;
                }
                lowest
            })
        };

        let mut reserved = 0;
        let mut rejected = 0;
        for handle in handles {
            match handle.await.unwrap() {
                ReserveOutcome::Reserved(_) => reserved += 1,
                ReserveOutcome::Insufficient(_) => rejected += 1,
                ReserveOutcome::AlreadyReserved(_) => unreachable!(),
            }
        }
        done.store(true, Ordering::Release);
        assert!(observer.await.unwrap() >= 0);

        assert_eq!(reserved, n);
        assert_eq!(rejected, 1);
        assert_eq!(quantity(&store, "HOT").await, Some(0));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_order_gates_are_dropped_when_idle() {
        let store = stocked(&[("A", 1_000)]).await;

        let mut handles = Vec::new();
        for _ in 0..200 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let order_id = OrderId::new();
                store
                    .reserve(order_id, &[LineItem::new("A", 1)], expiry())
                    .await
                    .unwrap();
                store.release(order_id).await.unwrap();
            }));
        }
        // Contend on one order so gates are shared while held.
        let shared = OrderId::new();
        for _ in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .reserve(shared, &[LineItem::new("A", 1)], expiry())
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        store.release(shared).await.unwrap();

        assert!(store.state.order_locks.lock().unwrap().is_empty());
        assert_eq!(quantity(&store, "A").await, Some(1_000));
    }
}
