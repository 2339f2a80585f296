use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use std::time::Instant;

use crate::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Up,
    Down,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    pub message: String,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub version: String,
    pub timestamp: String,
    pub store: ComponentHealth,
}

/// Opens and rolls back a unit of work to prove the store is reachable.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let start = Instant::now();
    let probe = match state.store.begin().await {
        Ok(mut tx) => tx.rollback().await,
        Err(err) => Err(err),
    };
    let latency_ms = start.elapsed().as_millis() as u64;

    let store = match probe {
        Ok(()) => ComponentHealth {
            status: ComponentStatus::Up,
            message: "Connection successful".to_string(),
            latency_ms,
        },
        Err(err) => {
            tracing::warn!(error = %err, "store health probe failed");
            ComponentHealth {
                status: ComponentStatus::Down,
                message: format!("Connection failed: {}", err.response_message()),
                latency_ms,
            }
        }
    };

    let status_code = match store.status {
        ComponentStatus::Up => StatusCode::OK,
        ComponentStatus::Down => StatusCode::SERVICE_UNAVAILABLE,
    };
    let response = HealthResponse {
        status: store.status,
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        store,
    };

    (status_code, Json(response))
}
