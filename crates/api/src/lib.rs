//! HTTP boundary for the order saga.
//!
//! Exposes order submission and queries, stock administration, fulfillment
//! lookup, the payment decision adapter and Prometheus metrics. All saga
//! work happens in the consumer groups started by [`saga::Saga::start`].

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use domain::PostgresStore;
use event_bus::{EventBus, InMemoryEventBus, PostgresEventLog};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{
    HttpPaymentGateway, LocalPaymentGateway, PaymentDecider, PaymentGateway, Saga, SagaConfig,
    SagaStores,
};
use sqlx::postgres::PgPoolOptions;
use tower_http::trace::TraceLayer;

use config::Config;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub saga: Arc<Saga>,
    /// Backs the payment adapter endpoint.
    pub payments: PaymentDecider,
    pub metrics: PrometheusHandle,
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/orders",
            post(routes::orders::create).get(routes::orders::list),
        )
        .route("/orders/{id}", get(routes::orders::get))
        .route("/orders/{id}/retry", post(routes::orders::retry))
        .route("/orders/{id}/events", get(routes::orders::events))
        .route("/inventory", get(routes::inventory::list))
        .route(
            "/inventory/{sku}",
            get(routes::inventory::get)
                .put(routes::inventory::put)
                .delete(routes::inventory::delete),
        )
        .route("/fulfillments", get(routes::fulfillments::list))
        .route("/fulfillments/{order_id}", get(routes::fulfillments::get))
        .route("/payments/authorize", post(routes::payments::authorize))
        .route("/metrics", get(routes::metrics::render))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Creates state over in-memory stores, an in-memory bus and in-process
/// payments.
pub fn create_default_state(config: SagaConfig, metrics: PrometheusHandle) -> Arc<AppState> {
    let decider = PaymentDecider::default();
    let saga = Saga::new(
        SagaStores::in_memory(),
        Arc::new(InMemoryEventBus::new()),
        Arc::new(LocalPaymentGateway::new(decider)),
        config,
    );
    Arc::new(AppState {
        saga: Arc::new(saga),
        payments: decider,
        metrics,
    })
}

/// Creates state as configured: PostgreSQL stores when `DATABASE_URL` is set
/// and a remote payment adapter when `PAYMENT_BASE_URL` is set.
pub async fn create_state(config: &Config, metrics: PrometheusHandle) -> domain::Result<Arc<AppState>> {
    let stores = match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new().max_connections(10).connect(url).await?;
            let store = PostgresStore::new(pool.clone());
            store.run_migrations().await?;
            tracing::info!("using PostgreSQL stores");
            SagaStores::postgres(store, PostgresEventLog::new(pool))
        }
        None => {
            tracing::info!("using in-memory stores");
            SagaStores::in_memory()
        }
    };

    let decider = PaymentDecider::new(config.payment_decline_rate);
    let gateway: Arc<dyn PaymentGateway> = match &config.payment_base_url {
        Some(base_url) => {
            let gateway = HttpPaymentGateway::new(base_url);
            tracing::info!(url = gateway.url(), "using remote payment adapter");
            Arc::new(gateway)
        }
        None => Arc::new(LocalPaymentGateway::new(decider)),
    };

    let bus: Arc<dyn EventBus> = Arc::new(InMemoryEventBus::new());
    let saga = Saga::new(stores, bus, gateway, config.saga_config());

    Ok(Arc::new(AppState {
        saga: Arc::new(saga),
        payments: decider,
        metrics,
    }))
}
