//! Consumer worker pools.
//!
//! Each consumer group gets one tokio task per partition. A task handles its
//! partition's events one at a time, so events of one order are processed in
//! publish order while different orders proceed in parallel.

use std::sync::Arc;
use std::time::Duration;

use event_bus::{EventBus, EventEnvelope, PartitionReceiver, Topics};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::handler::EventHandler;

/// Backoff for redelivering an event after a transient failure.
///
/// Redelivery never gives up; it stops only when the worker shuts down.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the first redelivery.
    pub initial_delay: Duration,
    /// Cap for the exponential backoff.
    pub max_delay: Duration,
    /// Multiplier applied per attempt.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy builder starting from the defaults.
    #[must_use]
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            policy: Self::default(),
        }
    }

    /// Delay before redelivery number `attempt` (zero-based):
    /// `initial_delay * multiplier ^ attempt`, capped at `max_delay`.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return self.initial_delay.min(self.max_delay);
        }
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let millis = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        if !millis.is_finite() || millis >= self.max_delay.as_millis() as f64 {
            return self.max_delay;
        }
        Duration::from_millis(millis as u64)
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    policy: RetryPolicy,
}

impl RetryPolicyBuilder {
    /// Sets the first redelivery delay.
    #[must_use]
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.policy.initial_delay = delay;
        self
    }

    /// Sets the backoff cap.
    #[must_use]
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.policy.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.policy.multiplier = multiplier;
        self
    }

    /// Builds the policy.
    #[must_use]
    pub fn build(self) -> RetryPolicy {
        self.policy
    }
}

/// Joins `handler`'s consumer group and spawns one worker per partition.
///
/// Workers run until `shutdown` turns `true` or the bus closes the
/// partition.
pub async fn spawn_group(
    bus: &dyn EventBus,
    topics: &Topics,
    handler: Arc<dyn EventHandler>,
    partitions: usize,
    retry: RetryPolicy,
    shutdown: watch::Receiver<bool>,
) -> Result<Vec<JoinHandle<()>>> {
    let group = handler.component();
    let receivers = bus
        .subscribe(&handler.topics(topics), group, partitions.max(1))
        .await?;

    tracing::info!(group, partitions = receivers.len(), "consumer group started");

    Ok(receivers
        .into_iter()
        .enumerate()
        .map(|(partition, rx)| {
            tokio::spawn(run_partition(
                handler.clone(),
                partition,
                rx,
                retry.clone(),
                shutdown.clone(),
            ))
        })
        .collect())
}

async fn run_partition(
    handler: Arc<dyn EventHandler>,
    partition: usize,
    mut rx: PartitionReceiver,
    retry: RetryPolicy,
    mut shutdown: watch::Receiver<bool>,
) {
    let group = handler.component();
    loop {
        let envelope = tokio::select! {
            _ = shutdown.changed() => break,
            next = rx.recv() => match next {
                Some(envelope) => envelope,
                None => break,
            },
        };

        if !deliver(handler.as_ref(), &envelope, &retry, &mut shutdown).await {
            break;
        }
    }
    tracing::debug!(group, partition, "partition worker stopped");
}

/// Delivers one event until it is handled or dropped.
///
/// Returns `false` if shutdown interrupted a redelivery wait.
async fn deliver(
    handler: &dyn EventHandler,
    envelope: &EventEnvelope,
    retry: &RetryPolicy,
    shutdown: &mut watch::Receiver<bool>,
) -> bool {
    let mut attempt = 0u32;
    loop {
        match handler.handle(envelope).await {
            Ok(()) => return true,
            Err(e) if e.is_retryable() => {
                let delay = retry.delay_for_attempt(attempt);
                tracing::warn!(
                    group = handler.component(),
                    event_id = %envelope.event_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "redelivering event"
                );
                metrics::counter!("saga_redeliveries_total", "component" => handler.component())
                    .increment(1);
                tokio::select! {
                    _ = shutdown.changed() => return false,
                    _ = tokio::time::sleep(delay) => {}
                }
                attempt = attempt.saturating_add(1);
            }
            Err(e) => {
                tracing::error!(
                    group = handler.component(),
                    event_id = %envelope.event_id,
                    event_type = %envelope.event_type,
                    order_id = %envelope.order_id,
                    error = %e,
                    "dropping event"
                );
                metrics::counter!(
                    "saga_events_dropped_total",
                    "component" => handler.component(),
                    "reason" => e.outcome(),
                )
                .increment(1);
                return true;
            }
        }
    }
}
