//! Fulfillment lookup.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use common::OrderId;
use domain::Fulfillment;
use serde::Deserialize;

use crate::AppState;
use crate::error::ApiError;

const MAX_PAGE_SIZE: usize = 100;

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default)]
    pub page: usize,
    #[serde(default = "default_page_size")]
    pub size: usize,
}

fn default_page_size() -> usize {
    20
}

/// GET /fulfillments?page=&size= — newest first, pages counted from zero.
#[tracing::instrument(skip(state))]
pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Vec<Fulfillment>>, ApiError> {
    if query.size == 0 || query.size > MAX_PAGE_SIZE {
        return Err(ApiError::BadRequest(format!(
            "size must be between 1 and {MAX_PAGE_SIZE}"
        )));
    }
    Ok(Json(
        state.saga.fulfillment().list(query.page, query.size).await?,
    ))
}

/// GET /fulfillments/{order_id}
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<String>,
) -> Result<Json<Fulfillment>, ApiError> {
    let id: OrderId = order_id
        .parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid ID format: {e}")))?;
    state
        .saga
        .fulfillment()
        .get_by_order(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("No fulfillment for order {order_id}")))
}
