//! Stock records and the reservations held against them.

pub(crate) mod model;
mod store;

pub use model::{InventoryRecord, ReleaseOutcome, Reservation, ReserveOutcome, Shortfall};
pub use store::{InMemoryInventoryStore, InventoryStore};
