//! Payment decision adapter endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use saga::{FORCE_HEADER, ForceOutcome, PaymentDecision, PaymentRequest};
use serde::Deserialize;

use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ForceQuery {
    pub force: Option<String>,
}

/// POST /payments/authorize — decide a payment.
///
/// The `X-Force-Payment` header wins over the `force` query parameter.
/// Declines are answered with 200 and a `DECLINED` body.
#[tracing::instrument(skip_all)]
pub async fn authorize(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ForceQuery>,
    Json(req): Json<PaymentRequest>,
) -> Json<PaymentDecision> {
    let header = headers
        .get(FORCE_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.trim().is_empty());
    let force = header
        .or(query.force.as_deref())
        .and_then(ForceOutcome::parse);

    let decision = state.payments.decide(&req, force);
    let status = if decision.is_authorized() {
        "authorized"
    } else {
        "declined"
    };
    metrics::counter!("payment_adapter_requests_total", "status" => status).increment(1);
    Json(decision)
}
