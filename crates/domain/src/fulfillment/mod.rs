//! Shipments scheduled for paid orders.

mod model;
mod store;

pub use model::{Fulfillment, FulfillmentStatus, UnknownFulfillmentStatus};
pub use store::{FulfillmentStore, InMemoryFulfillmentStore};
