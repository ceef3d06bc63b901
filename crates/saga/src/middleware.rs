//! Handler instrumentation.
//!
//! Keeps per-step observability out of the saga logic: every delivery runs
//! inside a span and ends with one structured record of
//! (component, event type, order, duration, outcome).

use std::time::Instant;

use async_trait::async_trait;
use event_bus::{EventEnvelope, Topics};
use tracing::Instrument;

use crate::error::HandlerError;
use crate::handler::EventHandler;

/// Wraps a handler with tracing and metrics.
pub struct Instrumented<H> {
    inner: H,
}

impl<H: EventHandler> Instrumented<H> {
    /// Instruments `inner`.
    pub fn new(inner: H) -> Self {
        Self { inner }
    }

    /// Returns the wrapped handler.
    pub fn inner(&self) -> &H {
        &self.inner
    }
}

#[async_trait]
impl<H: EventHandler> EventHandler for Instrumented<H> {
    fn component(&self) -> &'static str {
        self.inner.component()
    }

    fn topics(&self, topics: &Topics) -> Vec<String> {
        self.inner.topics(topics)
    }

    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        let component = self.inner.component();
        let span = tracing::info_span!(
            "handle_event",
            component,
            event_type = %envelope.event_type,
            event_id = %envelope.event_id,
            order_id = %envelope.order_id,
            correlation_id = %envelope.correlation_id,
        );

        let start = Instant::now();
        let result = self.inner.handle(envelope).instrument(span.clone()).await;
        let elapsed = start.elapsed();

        let outcome = match &result {
            Ok(()) => "ok",
            Err(e) => e.outcome(),
        };

        span.in_scope(|| match &result {
            Ok(()) => tracing::info!(
                duration_ms = elapsed.as_millis() as u64,
                outcome,
                "event handled"
            ),
            Err(e) => tracing::warn!(
                duration_ms = elapsed.as_millis() as u64,
                outcome,
                error = %e,
                "event handling failed"
            ),
        });

        metrics::counter!(
            "saga_events_handled_total",
            "component" => component,
            "event_type" => envelope.event_type.clone(),
            "outcome" => outcome,
        )
        .increment(1);
        metrics::histogram!("saga_handler_duration_seconds", "component" => component)
            .record(elapsed.as_secs_f64());

        result
    }
}
