pub mod fulfillments;
pub mod inventory;
pub mod metrics;
pub mod orders;
pub mod payments;
