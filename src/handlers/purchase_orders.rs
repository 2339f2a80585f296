use axum::{
    extract::{Path, Query, State},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use super::common::{created_response, success_response};
use crate::{
    errors::ServiceError,
    services::purchasing::{CreatePurchaseOrderRequest, TransitionPurchaseOrderRequest},
    ApiResponse, ApiResult, AppState,
};

#[derive(Debug, Default, Deserialize)]
pub struct DeleteParams {
    #[serde(default)]
    pub reverse_receipts: bool,
}

pub async fn create_purchase_order(
    State(state): State<AppState>,
    Json(payload): Json<CreatePurchaseOrderRequest>,
) -> Result<Response, ServiceError> {
    let order = state.purchasing.create_purchase_order(payload).await?;
    info!("Purchase order created: {}", order.order.id);
    Ok(created_response(order))
}

pub async fn get_purchase_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    Ok(success_response(
        state.purchasing.get_purchase_order(id).await?,
    ))
}

pub async fn transition_purchase_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<TransitionPurchaseOrderRequest>,
) -> Result<Response, ServiceError> {
    let order = state
        .purchasing
        .transition_purchase_order(id, payload)
        .await?;
    Ok(success_response(order))
}

pub async fn delete_purchase_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<DeleteParams>,
) -> ApiResult<Uuid> {
    state
        .purchasing
        .delete_purchase_order(id, params.reverse_receipts)
        .await?;
    Ok(Json(
        ApiResponse::success(id).with_message("Purchase order deleted"),
    ))
}

pub fn purchase_order_routes() -> Router<AppState> {
    Router::new().route("/", post(create_purchase_order)).route(
        "/:id",
        get(get_purchase_order)
            .put(transition_purchase_order)
            .delete(delete_purchase_order),
    )
}
