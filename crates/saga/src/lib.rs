//! Choreographed order saga.
//!
//! Four components cooperate only through events on the bus:
//! - [`OrderCoordinator`] owns orders and calls the payment adapter
//! - [`InventoryReservationEngine`] reserves stock and compensates it
//! - the payment decision adapter ([`PaymentDecider`] behind a [`PaymentGateway`])
//! - [`FulfillmentHandler`] schedules shipments
//!
//! Delivery is at-least-once, so every handler is idempotent. [`Saga::start`]
//! runs each component as a consumer group with one worker per partition.

pub mod audit;
pub mod config;
pub mod consumer;
pub mod coordinator;
pub mod error;
pub mod handler;
pub mod middleware;
pub mod runtime;
pub mod services;

pub use audit::EventLogRecorder;
pub use config::SagaConfig;
pub use consumer::{RetryPolicy, RetryPolicyBuilder, spawn_group};
pub use coordinator::OrderCoordinator;
pub use error::{HandlerError, Result, SagaError};
pub use handler::EventHandler;
pub use middleware::Instrumented;
pub use runtime::{Saga, SagaRuntime, SagaStores};
pub use services::{
    FORCE_HEADER, ForceOutcome, FulfillmentHandler, HttpPaymentGateway, InventoryReservationEngine,
    LocalPaymentGateway, PaymentDecider, PaymentDecision, PaymentError, PaymentGateway,
    PaymentRequest, PaymentStatus, reasons,
};
