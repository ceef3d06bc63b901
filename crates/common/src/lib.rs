//! Shared types for the order saga services.

pub mod types;

pub use types::{LineItem, OrderId, ParseOrderIdError, Sku, coalesce, now_millis};
