//! PostgreSQL integration tests for the entity stores.
//!
//! These tests use a shared PostgreSQL container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p domain --test postgres_integration
//! ```

use std::sync::Arc;

use chrono::{Duration, Utc};
use common::{LineItem, OrderId, Sku};
use domain::{
    ChangeOutcome, FulfillmentStatus, FulfillmentStore, InventoryStore, NewOrder, Order,
    OrderChange, OrderStatus, OrderStore, PaymentRecord, PostgresStore, ReserveOutcome,
    StoreError,
};
use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::raw_sql(include_str!("../../../migrations/001_create_saga_tables.sql"))
                .execute(&temp_pool)
                .await
                .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

async fn get_test_store() -> PostgresStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(20)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE orders, inventory, reservations, fulfillments")
        .execute(&pool)
        .await
        .unwrap();

    PostgresStore::new(pool)
}

fn new_order() -> Order {
    Order::new(
        OrderId::new(),
        NewOrder {
            customer_id: "c1".to_string(),
            amount: 1000,
            currency: "KRW".to_string(),
            items: vec![LineItem::new("X", 2), LineItem::new("Y", 1)],
        },
        Utc::now(),
    )
}

fn expiry() -> chrono::DateTime<Utc> {
    Utc::now() + Duration::minutes(5)
}

async fn stock(store: &PostgresStore, sku: &str) -> Option<i64> {
    InventoryStore::get(store, &Sku::from(sku))
        .await
        .unwrap()
        .map(|r| r.quantity)
}

mod orders {
    use super::*;

    #[tokio::test]
    #[serial]
    async fn insert_get_round_trips_items_and_status() {
        let store = get_test_store().await;
        let order = new_order();
        let id = order.id;

        OrderStore::insert(&store, order.clone()).await.unwrap();
        let loaded = OrderStore::get(&store, id).await.unwrap().unwrap();

        assert_eq!(loaded.items, order.items);
        assert_eq!(loaded.status, OrderStatus::Pending);
        assert!(loaded.payment.is_none());
    }

    #[tokio::test]
    #[serial]
    async fn duplicate_insert_is_reported() {
        let store = get_test_store().await;
        let order = new_order();

        OrderStore::insert(&store, order.clone()).await.unwrap();
        let err = OrderStore::insert(&store, order).await.unwrap_err();

        assert!(matches!(err, StoreError::DuplicateOrder(_)));
    }

    #[tokio::test]
    #[serial]
    async fn apply_persists_transitions_and_payment() {
        let store = get_test_store().await;
        let order = new_order();
        let id = order.id;
        OrderStore::insert(&store, order).await.unwrap();

        store.apply(id, OrderChange::InventoryReserved).await.unwrap();
        let decided = store
            .apply(
                id,
                OrderChange::PaymentDecided(PaymentRecord::Authorized {
                    auth_id: "pay-1".to_string(),
                }),
            )
            .await
            .unwrap();
        assert!(matches!(decided, ChangeOutcome::Applied(_)));

        let loaded = OrderStore::get(&store, id).await.unwrap().unwrap();
        assert_eq!(loaded.status, OrderStatus::InventoryReserved);
        assert!(loaded.payment.unwrap().is_authorized());

        let stale = store.apply(id, OrderChange::InventoryRejected).await.unwrap();
        assert!(matches!(stale, ChangeOutcome::Rejected(_)));

        let missing = store
            .apply(OrderId::new(), OrderChange::Retry)
            .await
            .unwrap();
        assert_eq!(missing, ChangeOutcome::NotFound);
    }

    #[tokio::test]
    #[serial]
    async fn list_is_newest_first() {
        let store = get_test_store().await;
        let mut older = new_order();
        older.created_at -= Duration::seconds(30);
        let newer = new_order();

        OrderStore::insert(&store, older.clone()).await.unwrap();
        OrderStore::insert(&store, newer.clone()).await.unwrap();

        let ids: Vec<_> = OrderStore::list(&store)
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.id)
            .collect();
        assert_eq!(ids, vec![newer.id, older.id]);
    }
}

mod inventory {
    use super::*;

    #[tokio::test]
    #[serial]
    async fn reserve_is_all_or_nothing() {
        let store = get_test_store().await;
        store.set_quantity(&Sku::from("A"), 10).await.unwrap();
        store.set_quantity(&Sku::from("B"), 3).await.unwrap();
        let order_id = OrderId::new();

        let outcome = store
            .reserve(
                order_id,
                &[LineItem::new("A", 5), LineItem::new("B", 999_999)],
                expiry(),
            )
            .await
            .unwrap();

        assert!(matches!(outcome, ReserveOutcome::Insufficient(_)));
        assert_eq!(stock(&store, "A").await, Some(10));
        assert_eq!(stock(&store, "B").await, Some(3));
        assert!(store.reservations_for(order_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    #[serial]
    async fn reserve_twice_decrements_once() {
        let store = get_test_store().await;
        store.set_quantity(&Sku::from("A"), 10).await.unwrap();
        let order_id = OrderId::new();
        let items = [LineItem::new("A", 3)];

        let first = store.reserve(order_id, &items, expiry()).await.unwrap();
        let second = store.reserve(order_id, &items, expiry()).await.unwrap();

        let ReserveOutcome::Reserved(rows) = first else {
            panic!("expected Reserved, got {first:?}");
        };
        let ReserveOutcome::AlreadyReserved(again) = second else {
            panic!("expected AlreadyReserved, got {second:?}");
        };
        assert_eq!(
            rows.iter().map(|r| r.line_item()).collect::<Vec<_>>(),
            again.iter().map(|r| r.line_item()).collect::<Vec<_>>()
        );
        assert_eq!(stock(&store, "A").await, Some(7));
    }

    #[tokio::test]
    #[serial]
    async fn release_restores_and_is_idempotent() {
        let store = get_test_store().await;
        store.set_quantity(&Sku::from("A"), 10).await.unwrap();
        let order_id = OrderId::new();
        store
            .reserve(order_id, &[LineItem::new("A", 3)], expiry())
            .await
            .unwrap();
        assert_eq!(stock(&store, "A").await, Some(7));

        let released = store.release(order_id).await.unwrap();
        assert_eq!(released.released.len(), 1);
        assert_eq!(stock(&store, "A").await, Some(10));

        let again = store.release(order_id).await.unwrap();
        assert!(again.is_empty());
        assert_eq!(stock(&store, "A").await, Some(10));
    }

    #[tokio::test]
    #[serial]
    async fn release_reports_missing_records() {
        let store = get_test_store().await;
        store.set_quantity(&Sku::from("A"), 1).await.unwrap();
        let order_id = OrderId::new();
        store
            .reserve(order_id, &[LineItem::new("A", 1)], expiry())
            .await
            .unwrap();

        assert!(store.remove(&Sku::from("A")).await.unwrap());
        assert!(!store.remove(&Sku::from("A")).await.unwrap());

        let released = store.release(order_id).await.unwrap();
        assert_eq!(released.missing_records, vec![Sku::from("A")]);
        assert!(store.reservations_for(order_id).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[serial]
    async fn concurrent_reservations_never_oversell() {
        let store = get_test_store().await;
        let n: i64 = 10;
        store.set_quantity(&Sku::from("HOT"), n).await.unwrap();

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

        let mut rejected = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), ReserveOutcome::Insufficient(_)) {
                rejected += 1;
            }
        }

        assert_eq!(rejected, 1);
        assert_eq!(stock(&store, "HOT").await, Some(0));
    }
}

mod fulfillments {
    use super::*;

    #[tokio::test]
    #[serial]
    async fn schedule_is_idempotent_per_order() {
        let store = get_test_store().await;
        let order_id = OrderId::new();

        let first = store
            .schedule(order_id, Utc::now(), "shp-1".to_string())
            .await
            .unwrap();
        let second = store
            .schedule(order_id, Utc::now(), "shp-2".to_string())
            .await
            .unwrap();

        assert_eq!(first.status, FulfillmentStatus::Scheduled);
        assert_eq!(second.id, first.id);
        assert_eq!(second.shipping_id.as_deref(), Some("shp-1"));
        assert_eq!(FulfillmentStore::list(&store, 0, 20).await.unwrap().len(), 1);
        assert!(
            store
                .get_by_order(OrderId::new())
                .await
                .unwrap()
                .is_none()
        );
    }
}
