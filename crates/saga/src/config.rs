//! Saga runtime settings.

use std::time::Duration;

use event_bus::Topics;

use crate::consumer::RetryPolicy;
use crate::services::payment::ForceOutcome;

/// Settings shared by the saga components.
#[derive(Debug, Clone)]
pub struct SagaConfig {
    /// Topic namespace, e.g. `orders.v1`.
    pub namespace: String,
    /// Partition workers per consumer group.
    pub workers: usize,
    /// Upper bound on one payment adapter call.
    pub payment_timeout: Duration,
    /// Forces every payment decision when set.
    pub force_payment: Option<ForceOutcome>,
    /// Advisory lifetime of a reservation.
    pub reservation_ttl: Duration,
    /// Backoff for transient handler failures.
    pub retry: RetryPolicy,
}

impl SagaConfig {
    /// Returns the topic names under the configured namespace.
    pub fn topics(&self) -> Topics {
        Topics::new(self.namespace.clone())
    }
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            namespace: event_bus::topic::DEFAULT_NAMESPACE.to_string(),
            workers: 4,
            payment_timeout: Duration::from_secs(3),
            force_payment: None,
            reservation_ttl: Duration::from_secs(5 * 60),
            retry: RetryPolicy::default(),
        }
    }
}
