use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{LineItem, OrderId, Sku, coalesce};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::inventory::model;
use crate::{
    ChangeOutcome, Fulfillment, FulfillmentStore, InventoryRecord, InventoryStore, Order,
    OrderChange, OrderStore, ReleaseOutcome, Reservation, ReserveOutcome, Result, StoreError,
};

/// PostgreSQL-backed implementation of all three entity stores.
///
/// Row locks are taken with `SELECT ... FOR UPDATE`; the reservation gate of
/// an order is serialized with a transaction-scoped advisory lock keyed by
/// the order ID.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        tracing::debug!("saga schema migrations applied");
        Ok(())
    }

    fn row_to_order(row: PgRow) -> Result<Order> {
        let status: String = row.try_get("status")?;
        let items: serde_json::Value = row.try_get("items")?;
        let payment: Option<serde_json::Value> = row.try_get("payment")?;

        Ok(Order {
            id: OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
            customer_id: row.try_get("customer_id")?,
            amount: row.try_get("amount")?,
            currency: row.try_get("currency")?,
            status: status
                .parse()
                .map_err(|e: crate::UnknownOrderStatus| StoreError::corrupt("orders", e.to_string()))?,
            items: serde_json::from_value(items)?,
            payment: payment.map(serde_json::from_value).transpose()?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_reservation(row: PgRow) -> Result<Reservation> {
        let quantity: i64 = row.try_get("quantity")?;
        let line_no: i32 = row.try_get("line_no")?;

        Ok(Reservation {
            id: row.try_get("id")?,
            order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
            sku: Sku::new(row.try_get::<String, _>("sku")?),
            quantity: u32::try_from(quantity)
                .map_err(|_| StoreError::corrupt("reservations", format!("quantity {quantity}")))?,
            line_no: u32::try_from(line_no)
                .map_err(|_| StoreError::corrupt("reservations", format!("line_no {line_no}")))?,
            expires_at: row.try_get("expires_at")?,
        })
    }

    fn row_to_fulfillment(row: PgRow) -> Result<Fulfillment> {
        let status: String = row.try_get("status")?;

        Ok(Fulfillment {
            id: row.try_get("id")?,
            order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
            status: status.parse().map_err(|e: crate::UnknownFulfillmentStatus| {
                StoreError::corrupt("fulfillments", e.to_string())
            })?,
            shipping_id: row.try_get("shipping_id")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    async fn lock_order_gate(tx: &mut Transaction<'_, Postgres>, order_id: OrderId) -> Result<()> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(order_id.to_string())
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn select_reservations(
        tx: &mut Transaction<'_, Postgres>,
        order_id: OrderId,
    ) -> Result<Vec<Reservation>> {
        let rows = sqlx::query(
            r#"
            SELECT id, order_id, sku, quantity, line_no, expires_at
            FROM reservations
            WHERE order_id = $1
            ORDER BY line_no ASC
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_all(&mut **tx)
        .await?;

        rows.into_iter().map(Self::row_to_reservation).collect()
    }

    /// Locks the inventory rows of `skus` in SKU order and returns their
    /// quantities. Unknown SKUs are absent from the result.
    async fn lock_stock(
        tx: &mut Transaction<'_, Postgres>,
        skus: &[String],
    ) -> Result<Vec<(String, i64)>> {
        let rows = sqlx::query(
            r#"
            SELECT sku, quantity
            FROM inventory
            WHERE sku = ANY($1)
            ORDER BY sku ASC
            FOR UPDATE
            "#,
        )
        .bind(skus)
        .fetch_all(&mut **tx)
        .await?;

        rows.into_iter()
            .map(|row| -> Result<(String, i64)> {
                Ok((row.try_get("sku")?, row.try_get("quantity")?))
            })
            .collect()
    }
}

#[async_trait]
impl OrderStore for PostgresStore {
    async fn insert(&self, order: Order) -> Result<()> {
        let id = order.id;
        sqlx::query(
            r#"
            INSERT INTO orders (id, customer_id, amount, currency, status, items, payment, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(&order.customer_id)
        .bind(order.amount)
        .bind(&order.currency)
        .bind(order.status.as_str())
        .bind(serde_json::to_value(&order.items)?)
        .bind(order.payment.as_ref().map(serde_json::to_value).transpose()?)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.is_unique_violation()
            {
                return StoreError::DuplicateOrder(id);
            }
            StoreError::Database(e)
        })?;

        Ok(())
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>> {
        let row = sqlx::query(
            r#"
            SELECT id, customer_id, amount, currency, status, items, payment, created_at, updated_at
            FROM orders
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_order).transpose()
    }

    async fn list(&self) -> Result<Vec<Order>> {
        let rows = sqlx::query(
            r#"
            SELECT id, customer_id, amount, currency, status, items, payment, created_at, updated_at
            FROM orders
            ORDER BY created_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_order).collect()
    }

    #[tracing::instrument(skip(self))]
    async fn apply(&self, id: OrderId, change: OrderChange) -> Result<ChangeOutcome> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            SELECT id, customer_id, amount, currency, status, items, payment, created_at, updated_at
            FROM orders
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Ok(ChangeOutcome::NotFound);
        };
        let mut order = Self::row_to_order(row)?;
        let plan = order.apply_change(change, Utc::now());

        if plan == crate::ChangePlan::Apply {
            sqlx::query(
                r#"
                UPDATE orders
                SET status = $2, payment = $3, updated_at = $4
                WHERE id = $1
                "#,
            )
            .bind(id.as_uuid())
            .bind(order.status.as_str())
            .bind(order.payment.as_ref().map(serde_json::to_value).transpose()?)
            .bind(order.updated_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(order.into_outcome(plan))
    }
}

#[async_trait]
impl InventoryStore for PostgresStore {
    async fn get(&self, sku: &Sku) -> Result<Option<InventoryRecord>> {
        let row = sqlx::query("SELECT sku, quantity FROM inventory WHERE sku = $1")
            .bind(sku.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| -> Result<InventoryRecord> {
            Ok(InventoryRecord {
                sku: Sku::new(row.try_get::<String, _>("sku")?),
                quantity: row.try_get("quantity")?,
            })
        })
        .transpose()
    }

    async fn list(&self) -> Result<Vec<InventoryRecord>> {
        let rows = sqlx::query("SELECT sku, quantity FROM inventory ORDER BY sku ASC")
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|row| -> Result<InventoryRecord> {
                Ok(InventoryRecord {
                    sku: Sku::new(row.try_get::<String, _>("sku")?),
                    quantity: row.try_get("quantity")?,
                })
            })
            .collect()
    }

    #[tracing::instrument(skip(self))]
    async fn remove(&self, sku: &Sku) -> Result<bool> {
        let deleted = sqlx::query("DELETE FROM inventory WHERE sku = $1")
            .bind(sku.as_str())
            .execute(&self.pool)
            .await?;
        Ok(deleted.rows_affected() > 0)
    }

    #[tracing::instrument(skip(self))]
    async fn set_quantity(&self, sku: &Sku, quantity: i64) -> Result<InventoryRecord> {
        if quantity < 0 {
            return Err(StoreError::InvalidQuantity {
                sku: sku.clone(),
                quantity,
            });
        }

        sqlx::query(
            r#"
            INSERT INTO inventory (sku, quantity)
            VALUES ($1, $2)
            ON CONFLICT (sku) DO UPDATE SET quantity = EXCLUDED.quantity
            "#,
        )
        .bind(sku.as_str())
        .bind(quantity)
        .execute(&self.pool)
        .await?;

        Ok(InventoryRecord {
            sku: sku.clone(),
            quantity,
        })
    }

    async fn reservations_for(&self, order_id: OrderId) -> Result<Vec<Reservation>> {
        let rows = sqlx::query(
            r#"
            SELECT id, order_id, sku, quantity, line_no, expires_at
            FROM reservations
            WHERE order_id = $1
            ORDER BY line_no ASC
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_reservation).collect()
    }

    #[tracing::instrument(skip(self, items))]
    async fn reserve(
        &self,
        order_id: OrderId,
        items: &[LineItem],
        expires_at: DateTime<Utc>,
    ) -> Result<ReserveOutcome> {
        let mut tx = self.pool.begin().await?;
        Self::lock_order_gate(&mut tx, order_id).await?;

        let existing = Self::select_reservations(&mut tx, order_id).await?;
        if !existing.is_empty() {
            tx.commit().await?;
            return Ok(ReserveOutcome::AlreadyReserved(existing));
        }

        let items = coalesce(items);
        let skus: Vec<String> = items.iter().map(|i| i.sku.as_str().to_string()).collect();
        let stock = Self::lock_stock(&mut tx, &skus).await?;

        let short = model::shortfalls(&items, |sku| {
            stock
                .iter()
                .find(|(s, _)| s == sku.as_str())
                .map(|(_, q)| *q)
        });
        if !short.is_empty() {
            tx.rollback().await?;
            tracing::debug!(shortfalls = short.len(), "reservation rolled back");
            return Ok(ReserveOutcome::Insufficient(short));
        }

        let reservations = model::reservations_for(order_id, &items, expires_at);
        for reservation in &reservations {
            sqlx::query("UPDATE inventory SET quantity = quantity - $2 WHERE sku = $1")
                .bind(reservation.sku.as_str())
                .bind(i64::from(reservation.quantity))
                .execute(&mut *tx)
                .await?;

            sqlx::query(
                r#"
                INSERT INTO reservations (id, order_id, sku, quantity, line_no, expires_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(reservation.id)
            .bind(order_id.as_uuid())
            .bind(reservation.sku.as_str())
            .bind(i64::from(reservation.quantity))
            .bind(reservation.line_no as i32)
            .bind(reservation.expires_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(ReserveOutcome::Reserved(reservations))
    }

    #[tracing::instrument(skip(self))]
    async fn release(&self, order_id: OrderId) -> Result<ReleaseOutcome> {
        let mut tx = self.pool.begin().await?;
        Self::lock_order_gate(&mut tx, order_id).await?;

        let held = Self::select_reservations(&mut tx, order_id).await?;
        if held.is_empty() {
            tx.commit().await?;
            return Ok(ReleaseOutcome::default());
        }

        let skus: Vec<String> = held.iter().map(|r| r.sku.as_str().to_string()).collect();
        Self::lock_stock(&mut tx, &skus).await?;

        let mut missing_records = Vec::new();
        for reservation in &held {
            let updated = sqlx::query("UPDATE inventory SET quantity = quantity + $2 WHERE sku = $1")
                .bind(reservation.sku.as_str())
                .bind(i64::from(reservation.quantity))
                .execute(&mut *tx)
                .await?;
            if updated.rows_affected() == 0 {
                missing_records.push(reservation.sku.clone());
            }
        }

        sqlx::query("DELETE FROM reservations WHERE order_id = $1")
            .bind(order_id.as_uuid())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(ReleaseOutcome {
            released: held,
            missing_records,
        })
    }
}

#[async_trait]
impl FulfillmentStore for PostgresStore {
    async fn get_by_order(&self, order_id: OrderId) -> Result<Option<Fulfillment>> {
        let row = sqlx::query(
            r#"
            SELECT id, order_id, status, shipping_id, created_at, updated_at
            FROM fulfillments
            WHERE order_id = $1
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_fulfillment).transpose()
    }

    async fn list(&self, offset: usize, limit: usize) -> Result<Vec<Fulfillment>> {
        let rows = sqlx::query(
            r#"
            SELECT id, order_id, status, shipping_id, created_at, updated_at
            FROM fulfillments
            ORDER BY created_at DESC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .bind(i64::try_from(offset).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_fulfillment).collect()
    }

    #[tracing::instrument(skip(self))]
    async fn schedule(
        &self,
        order_id: OrderId,
        created_at: DateTime<Utc>,
        candidate_shipping_id: String,
    ) -> Result<Fulfillment> {
        let mut tx = self.pool.begin().await?;

        // Get-or-default: make sure the row exists, then lock it.
        let default = Fulfillment::pending(order_id, created_at);
        sqlx::query(
            r#"
            INSERT INTO fulfillments (id, order_id, status, shipping_id, created_at, updated_at)
            VALUES ($1, $2, $3, NULL, $4, $4)
            ON CONFLICT (order_id) DO NOTHING
            "#,
        )
        .bind(default.id)
        .bind(order_id.as_uuid())
        .bind(default.status.as_str())
        .bind(default.created_at)
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query(
            r#"
            SELECT id, order_id, status, shipping_id, created_at, updated_at
            FROM fulfillments
            WHERE order_id = $1
            FOR UPDATE
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_one(&mut *tx)
        .await?;

        let mut fulfillment = Self::row_to_fulfillment(row)?;
        fulfillment.schedule(candidate_shipping_id, Utc::now());

        sqlx::query(
            r#"
            UPDATE fulfillments
            SET status = $2, shipping_id = $3, updated_at = $4
            WHERE order_id = $1
            "#,
        )
        .bind(order_id.as_uuid())
        .bind(fulfillment.status.as_str())
        .bind(&fulfillment.shipping_id)
        .bind(fulfillment.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(fulfillment)
    }
}
