//! The saga's participant services.

pub mod fulfillment;
pub mod inventory;
pub mod payment;

pub use fulfillment::FulfillmentHandler;
pub use inventory::InventoryReservationEngine;
pub use payment::{
    FORCE_HEADER, ForceOutcome, HttpPaymentGateway, LocalPaymentGateway, PaymentDecider,
    PaymentDecision, PaymentError, PaymentGateway, PaymentRequest, PaymentStatus, reasons,
};
