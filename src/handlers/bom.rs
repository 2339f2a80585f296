use axum::{
    extract::{Path, State},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use uuid::Uuid;

use super::common::{created_response, success_response};
use crate::{errors::ServiceError, services::catalog::CreateBomRequest, AppState};

pub async fn create_bom(
    State(state): State<AppState>,
    Json(payload): Json<CreateBomRequest>,
) -> Result<Response, ServiceError> {
    Ok(created_response(state.catalog.create_bom(payload).await?))
}

pub async fn get_bom(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    Ok(success_response(state.catalog.get_bom(id).await?))
}

pub fn bom_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_bom))
        .route("/:id", get(get_bom))
}
