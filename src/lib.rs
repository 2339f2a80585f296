//! Inventory-aware order lifecycle engine.
//!
//! A stock ledger with an append-only movement journal, BOM explosion,
//! production and purchase order state machines, and the transaction
//! coordinator that makes every stock-affecting transition atomic.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod migrator;
pub mod repositories;
pub mod services;

use axum::{response::Json, routing::get, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::{
    config::AppConfig,
    db::TransactionCoordinator,
    events::EventSender,
    repositories::Store,
    services::{
        catalog::CatalogService, production::ProductionService, purchasing::PurchasingService,
        stock_ledger::StockLedger,
    },
};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub config: Arc<AppConfig>,
    pub catalog: CatalogService,
    pub ledger: StockLedger,
    pub production: ProductionService,
    pub purchasing: PurchasingService,
}

impl AppState {
    /// Wires every service onto one store and one coordinator.
    pub fn new(
        store: Arc<dyn Store>,
        config: AppConfig,
        event_sender: Option<EventSender>,
    ) -> Self {
        let coordinator = TransactionCoordinator::new(store.clone(), config.max_conflict_retries);
        let ledger = StockLedger::new(coordinator.clone(), event_sender.clone());
        let production = ProductionService::new(
            coordinator.clone(),
            ledger.clone(),
            event_sender.clone(),
            config.production.reverse_materials_on_cancel,
        );
        let purchasing = PurchasingService::new(coordinator.clone(), ledger.clone(), event_sender);

        Self {
            store,
            config: Arc::new(config),
            catalog: CatalogService::new(coordinator),
            ledger,
            production,
            purchasing,
        }
    }
}

// Common response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

pub fn api_v1_routes() -> Router<AppState> {
    Router::new()
        .nest("/products", handlers::products::product_routes())
        .nest("/boms", handlers::bom::bom_routes())
        .nest(
            "/production-orders",
            handlers::production_orders::production_order_routes(),
        )
        .nest(
            "/purchase-orders",
            handlers::purchase_orders::purchase_order_routes(),
        )
}

/// Full application router: `/health` plus the versioned API.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .nest("/api/v1", api_v1_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
