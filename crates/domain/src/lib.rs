//! Entity stores for the order saga.
//!
//! Each saga component owns one kind of row:
//! - the coordinator owns [`Order`]s, changed only through [`OrderStore::apply`]
//! - the inventory engine owns [`InventoryRecord`]s and [`Reservation`]s
//! - the fulfillment handler owns [`Fulfillment`]s
//!
//! Every store has an in-memory implementation and all three are implemented
//! over PostgreSQL by [`PostgresStore`].

pub mod error;
pub mod fulfillment;
pub mod inventory;
pub mod order;
pub mod postgres;

pub use error::{Result, StoreError};
pub use fulfillment::{
    Fulfillment, FulfillmentStatus, FulfillmentStore, InMemoryFulfillmentStore,
    UnknownFulfillmentStatus,
};
pub use inventory::{
    InMemoryInventoryStore, InventoryRecord, InventoryStore, ReleaseOutcome, Reservation,
    ReserveOutcome, Shortfall,
};
pub use order::{
    ChangeOutcome, ChangePlan, InMemoryOrderStore, NewOrder, Order, OrderChange, OrderStatus,
    OrderStore, PaymentRecord, UnknownOrderStatus,
};
pub use postgres::PostgresStore;
