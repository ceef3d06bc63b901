//! Event channels for the order saga.
//!
//! Services never call each other directly (except for the payment RPC); they
//! exchange typed, versioned events over named topics. This crate provides:
//! - [`EventEnvelope`] and the explicit causal [`EventContext`]
//! - the six saga contracts in [`contracts`]
//! - the [`EventBus`] trait and a partitioned [`InMemoryEventBus`]
//! - the de-duplicating audit [`EventLog`] (in-memory and PostgreSQL)

pub mod bus;
pub mod contracts;
pub mod error;
pub mod event;
pub mod log;
pub mod memory;
pub mod postgres;
pub mod topic;

pub use bus::{EventBus, EventBusExt, PartitionReceiver, partition_for};
pub use common::{LineItem, OrderId, Sku};
pub use contracts::{
    EventContract, FulfillmentScheduled, InventoryRejected, InventoryReserved, OrderCreated,
    PaymentAuthorized, PaymentFailed, RejectReason,
};
pub use error::{EventBusError, Result};
pub use event::{CorrelationId, EventContext, EventEnvelope, EventEnvelopeBuilder, EventId};
pub use log::{EventLog, EventLogEntry, InMemoryEventLog};
pub use memory::InMemoryEventBus;
pub use postgres::PostgresEventLog;
pub use topic::Topics;
