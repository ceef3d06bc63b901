//! Orders: the state machine, the row model and its store.

mod model;
mod state;
mod store;

pub use model::{ChangeOutcome, ChangePlan, NewOrder, Order, OrderChange, PaymentRecord};
pub use state::{OrderStatus, UnknownOrderStatus};
pub use store::{InMemoryOrderStore, OrderStore};
