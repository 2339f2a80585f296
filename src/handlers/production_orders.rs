use axum::{
    extract::{Path, State},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use uuid::Uuid;

use super::common::{created_response, success_response};
use crate::{
    errors::ServiceError,
    services::production::{CreateProductionOrderRequest, TransitionProductionOrderRequest},
    AppState,
};

pub async fn create_production_order(
    State(state): State<AppState>,
    Json(payload): Json<CreateProductionOrderRequest>,
) -> Result<Response, ServiceError> {
    let order = state.production.create_production_order(payload).await?;
    Ok(created_response(order))
}

pub async fn get_production_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    Ok(success_response(
        state.production.get_production_order(id).await?,
    ))
}

/// `PUT` carries the target status; stock effects follow from it.
pub async fn transition_production_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<TransitionProductionOrderRequest>,
) -> Result<Response, ServiceError> {
    let order = state
        .production
        .transition_production_order(id, payload)
        .await?;
    Ok(success_response(order))
}

pub fn production_order_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_production_order))
        .route(
            "/:id",
            get(get_production_order).put(transition_production_order),
        )
}
