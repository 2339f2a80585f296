#![allow(dead_code)]

use erp_order_engine::{
    config::AppConfig,
    entities::product::ProductKind,
    repositories::MemoryStore,
    services::catalog::{BomComponentInput, CreateBomRequest, CreateProductRequest},
    AppState,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use uuid::Uuid;

/// Fresh engine over an empty in-memory store.
pub fn state_with(config: AppConfig) -> AppState {
    AppState::new(Arc::new(MemoryStore::new()), config, None)
}

pub fn state() -> AppState {
    state_with(AppConfig::default())
}

pub async fn product(state: &AppState, sku: &str, kind: ProductKind) -> Uuid {
    state
        .catalog
        .create_product(CreateProductRequest {
            sku: sku.to_string(),
            name: sku.to_lowercase(),
            unit: "kg".to_string(),
            kind,
            min_qty: Decimal::ZERO,
            cost_price: Decimal::ZERO,
        })
        .await
        .expect("create product")
        .id
}

/// Adds opening stock through the ledger so balances always reconcile.
pub async fn stock(state: &AppState, product_id: Uuid, qty: Decimal) {
    if qty > Decimal::ZERO {
        state
            .ledger
            .adjust(product_id, qty, Some("opening balance".into()))
            .await
            .expect("opening balance");
    }
}

pub async fn on_hand(state: &AppState, product_id: Uuid) -> Decimal {
    state.ledger.get_on_hand(product_id).await.expect("on hand")
}

/// Bread from 0.5 kg flour and 0.05 kg sugar per loaf.
pub struct Bakery {
    pub state: AppState,
    pub flour: Uuid,
    pub sugar: Uuid,
    pub bread: Uuid,
    pub bom: Uuid,
}

pub async fn bakery(state: AppState, flour_qty: Decimal, sugar_qty: Decimal) -> Bakery {
    let flour = product(&state, "FLOUR-1", ProductKind::RawMaterial).await;
    let sugar = product(&state, "SUGAR-1", ProductKind::RawMaterial).await;
    let bread = product(&state, "BREAD-1", ProductKind::FinishedGood).await;
    stock(&state, flour, flour_qty).await;
    stock(&state, sugar, sugar_qty).await;

    let bom = state
        .catalog
        .create_bom(CreateBomRequest {
            final_product_id: bread,
            name: "Bread".to_string(),
            components: vec![
                BomComponentInput {
                    product_id: flour,
                    quantity_per_unit: dec!(0.5),
                    unit: "kg".to_string(),
                },
                BomComponentInput {
                    product_id: sugar,
                    quantity_per_unit: dec!(0.05),
                    unit: "kg".to_string(),
                },
            ],
        })
        .await
        .expect("create bom")
        .bom
        .id;

    Bakery {
        state,
        flour,
        sugar,
        bread,
        bom,
    }
}
