//! Order submission, query and retry endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::{LineItem, OrderId};
use domain::{NewOrder, Order, OrderStatus};
use event_bus::{EventLog, EventLogEntry};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;

// -- Request types --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub customer_id: String,
    pub amount: i64,
    pub currency: String,
    #[serde(default)]
    pub items: Vec<LineItem>,
}

impl CreateOrderRequest {
    fn validate(self) -> Result<NewOrder, ApiError> {
        if self.customer_id.trim().is_empty() {
            return Err(ApiError::BadRequest("customerId is required".to_string()));
        }
        if self.currency.trim().is_empty() {
            return Err(ApiError::BadRequest("currency is required".to_string()));
        }
        if self.amount <= 0 {
            return Err(ApiError::BadRequest("amount must be positive".to_string()));
        }
        if self.items.is_empty() {
            return Err(ApiError::BadRequest("at least one item is required".to_string()));
        }
        if let Some(item) = self
            .items
            .iter()
            .find(|i| i.quantity == 0 || i.sku.as_str().trim().is_empty())
        {
            return Err(ApiError::BadRequest(format!(
                "invalid item {:?}: sku must be set and qty positive",
                item.sku.as_str()
            )));
        }

        Ok(NewOrder {
            customer_id: self.customer_id,
            amount: self.amount,
            currency: self.currency,
            items: self.items,
        })
    }
}

// -- Response types --

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderResponse {
    pub order_id: OrderId,
    pub status: OrderStatus,
}

// -- Handlers --

/// POST /orders — accept an order and start its saga.
#[tracing::instrument(skip(state, req))]
pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<CreateOrderResponse>), ApiError> {
    let new = req.validate()?;
    let order = state.saga.coordinator().submit(new).await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateOrderResponse {
            order_id: order.id,
            status: order.status,
        }),
    ))
}

/// GET /orders — all orders, newest first.
#[tracing::instrument(skip(state))]
pub async fn list(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Order>>, ApiError> {
    Ok(Json(state.saga.coordinator().list().await?))
}

/// GET /orders/{id} — one order.
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Order>, ApiError> {
    let order_id = parse_order_id(&id)?;
    state
        .saga
        .coordinator()
        .get(order_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Order {id} not found")))
}

/// POST /orders/{id}/retry — restart the saga of a stuck order.
#[tracing::instrument(skip(state))]
pub async fn retry(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Order>, ApiError> {
    let order_id = parse_order_id(&id)?;
    Ok(Json(state.saga.coordinator().retry(order_id).await?))
}

/// GET /orders/{id}/events — audit log entries of an order, oldest first.
#[tracing::instrument(skip(state))]
pub async fn events(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<EventLogEntry>>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let entries = state
        .saga
        .event_log()
        .entries_for(&order_id.to_string())
        .await?;
    Ok(Json(entries))
}

fn parse_order_id(id: &str) -> Result<OrderId, ApiError> {
    id.parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid ID format: {e}")))
}
