use axum::{
    extract::{Path, State},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use super::common::{created_response, success_response};
use crate::{
    errors::ServiceError,
    services::{catalog::CreateProductRequest, stock_ledger::Reconciliation},
    AppState,
};

#[derive(Debug, Serialize, Deserialize)]
pub struct AdjustmentRequest {
    /// Signed quantity: positive to add stock, negative to write it off.
    pub qty: Decimal,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StockLevel {
    pub product_id: Uuid,
    pub sku: String,
    pub qty_on_hand: Decimal,
    pub min_qty: Decimal,
    pub below_minimum: bool,
    pub movement_sum: Decimal,
    pub balanced: bool,
}

pub async fn create_product(
    State(state): State<AppState>,
    Json(payload): Json<CreateProductRequest>,
) -> Result<Response, ServiceError> {
    let product = state.catalog.create_product(payload).await?;
    Ok(created_response(product))
}

pub async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    Ok(success_response(state.catalog.get_product(id).await?))
}

/// On-hand together with the journal total it must equal.
pub async fn get_stock(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    let product = state.catalog.get_product(id).await?;
    let Reconciliation {
        on_hand,
        movement_sum,
        balanced,
        ..
    } = state.ledger.reconcile(id).await?;

    Ok(success_response(StockLevel {
        product_id: product.id,
        below_minimum: product.is_below_minimum(),
        sku: product.sku,
        qty_on_hand: on_hand,
        min_qty: product.min_qty,
        movement_sum,
        balanced,
    }))
}

pub async fn list_movements(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    Ok(success_response(state.ledger.list_movements(id).await?))
}

pub async fn create_adjustment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<AdjustmentRequest>,
) -> Result<Response, ServiceError> {
    let movement = state.ledger.adjust(id, payload.qty, payload.notes).await?;
    info!(product_id = %id, qty = %movement.qty, "stock adjusted");
    Ok(created_response(movement))
}

pub fn product_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_product))
        .route("/:id", get(get_product))
        .route("/:id/stock", get(get_stock))
        .route("/:id/movements", get(list_movements))
        .route("/:id/adjustments", post(create_adjustment))
}
