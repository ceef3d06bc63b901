//! Wiring of the saga components over one event bus.

use std::sync::Arc;

use domain::{
    FulfillmentStore, InMemoryFulfillmentStore, InMemoryInventoryStore, InMemoryOrderStore,
    InventoryStore, OrderStore, PostgresStore,
};
use event_bus::{EventBus, EventLog, InMemoryEventLog, PostgresEventLog, Topics};
use futures_util::future::join_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::audit::EventLogRecorder;
use crate::config::SagaConfig;
use crate::consumer::spawn_group;
use crate::coordinator::OrderCoordinator;
use crate::error::Result;
use crate::handler::EventHandler;
use crate::middleware::Instrumented;
use crate::services::{FulfillmentHandler, InventoryReservationEngine, PaymentGateway};

/// The stores each component owns.
#[derive(Clone)]
pub struct SagaStores {
    pub orders: Arc<dyn OrderStore>,
    pub inventory: Arc<dyn InventoryStore>,
    pub fulfillments: Arc<dyn FulfillmentStore>,
    pub event_log: Arc<dyn EventLog>,
}

impl SagaStores {
    /// Fresh in-memory stores.
    pub fn in_memory() -> Self {
        Self {
            orders: Arc::new(InMemoryOrderStore::new()),
            inventory: Arc::new(InMemoryInventoryStore::new()),
            fulfillments: Arc::new(InMemoryFulfillmentStore::new()),
            event_log: Arc::new(InMemoryEventLog::new()),
        }
    }

    /// Stores backed by PostgreSQL.
    pub fn postgres(store: PostgresStore, event_log: PostgresEventLog) -> Self {
        Self {
            orders: Arc::new(store.clone()),
            inventory: Arc::new(store.clone()),
            fulfillments: Arc::new(store),
            event_log: Arc::new(event_log),
        }
    }
}

/// The four saga components, built and ready to consume.
pub struct Saga {
    bus: Arc<dyn EventBus>,
    topics: Topics,
    config: SagaConfig,
    coordinator: Arc<OrderCoordinator>,
    inventory: Arc<InventoryReservationEngine>,
    fulfillment: Arc<FulfillmentHandler>,
    audit: Arc<EventLogRecorder>,
}

impl Saga {
    /// Builds every component over `stores` and `bus`.
    pub fn new(
        stores: SagaStores,
        bus: Arc<dyn EventBus>,
        gateway: Arc<dyn PaymentGateway>,
        config: SagaConfig,
    ) -> Self {
        let topics = config.topics();
        let coordinator = OrderCoordinator::new(
            stores.orders,
            bus.clone(),
            topics.clone(),
            gateway,
            config.payment_timeout,
        )
        .with_forced_payment(config.force_payment);
        let inventory = InventoryReservationEngine::new(
            stores.inventory,
            bus.clone(),
            topics.clone(),
            config.reservation_ttl,
        );
        let fulfillment = FulfillmentHandler::new(stores.fulfillments, bus.clone(), topics.clone());
        let audit = EventLogRecorder::new(stores.event_log);

        Self {
            bus,
            topics,
            config,
            coordinator: Arc::new(coordinator),
            inventory: Arc::new(inventory),
            fulfillment: Arc::new(fulfillment),
            audit: Arc::new(audit),
        }
    }

    pub fn coordinator(&self) -> &Arc<OrderCoordinator> {
        &self.coordinator
    }

    pub fn inventory(&self) -> &Arc<InventoryReservationEngine> {
        &self.inventory
    }

    pub fn fulfillment(&self) -> &Arc<FulfillmentHandler> {
        &self.fulfillment
    }

    pub fn event_log(&self) -> &Arc<dyn EventLog> {
        self.audit.log()
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    /// Returns the components in the order their groups are started.
    pub fn handlers(&self) -> Vec<Arc<dyn EventHandler>> {
        vec![
            self.coordinator.clone() as Arc<dyn EventHandler>,
            self.inventory.clone() as Arc<dyn EventHandler>,
            self.fulfillment.clone() as Arc<dyn EventHandler>,
            self.audit.clone() as Arc<dyn EventHandler>,
        ]
    }

    /// Starts the consumer groups `order-coordinator`, `inventory-engine`,
    /// `fulfillment-handler` and `event-audit`.
    pub async fn start(&self) -> Result<SagaRuntime> {
        let (shutdown, signal) = watch::channel(false);

        let mut workers = Vec::new();
        for handler in self.handlers() {
            workers.extend(
                spawn_group(
                    self.bus.as_ref(),
                    &self.topics,
                    Arc::new(Instrumented::new(handler)),
                    self.config.workers,
                    self.config.retry.clone(),
                    signal.clone(),
                )
                .await?,
            );
        }

        tracing::info!(
            namespace = self.topics.namespace(),
            workers = workers.len(),
            "saga runtime started"
        );
        Ok(SagaRuntime { shutdown, workers })
    }
}

/// Running consumer workers.
pub struct SagaRuntime {
    shutdown: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
}

impl SagaRuntime {
    /// Returns the number of partition workers.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Signals every worker to stop and waits for them.
    ///
    /// A worker finishes the event it is handling before it stops.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for result in join_all(self.workers).await {
            if let Err(e) = result {
                tracing::error!(error = %e, "consumer worker panicked");
            }
        }
        tracing::info!("saga runtime stopped");
    }
}
