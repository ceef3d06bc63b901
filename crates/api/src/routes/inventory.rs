//! Stock level endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::Sku;
use domain::InventoryRecord;
use serde::Deserialize;

use crate::AppState;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct SetStockRequest {
    pub qty: i64,
}

/// GET /inventory — all stock levels ordered by SKU.
#[tracing::instrument(skip(state))]
pub async fn list(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<InventoryRecord>>, ApiError> {
    Ok(Json(state.saga.inventory().stock_levels().await?))
}

/// GET /inventory/{sku}
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(sku): Path<String>,
) -> Result<Json<InventoryRecord>, ApiError> {
    state
        .saga
        .inventory()
        .stock(&Sku::new(sku.as_str()))
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("SKU {sku} not found")))
}

/// PUT /inventory/{sku} — set the stock level, creating the SKU if needed.
#[tracing::instrument(skip(state))]
pub async fn put(
    State(state): State<Arc<AppState>>,
    Path(sku): Path<String>,
    Json(req): Json<SetStockRequest>,
) -> Result<Json<InventoryRecord>, ApiError> {
    if sku.trim().is_empty() {
        return Err(ApiError::BadRequest("sku is required".to_string()));
    }
    Ok(Json(state.saga.inventory().restock(&Sku::new(sku), req.qty).await?))
}

/// DELETE /inventory/{sku}
#[tracing::instrument(skip(state))]
pub async fn delete(
    State(state): State<Arc<AppState>>,
    Path(sku): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.saga.inventory().discontinue(&Sku::new(sku.as_str())).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("SKU {sku} not found")))
    }
}
