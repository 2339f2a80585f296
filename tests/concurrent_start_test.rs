mod common;

use erp_order_engine::{
    config::AppConfig,
    entities::{
        product::ProductKind, production_order::ProductionStatus, stock_movement::MovementType,
    },
    errors::ServiceError,
    services::{
        catalog::{BomComponentInput, CreateBomRequest},
        production::{CreateProductionOrderRequest, TransitionProductionOrderRequest},
    },
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use common::{bakery, on_hand, product, stock};

// Twenty orders each needing 1 kg race for 10 kg: exactly ten may start.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_starts_never_oversell() {
    let mut config = AppConfig::default();
    config.max_conflict_retries = 20;
    let state = common::state_with(config);

    let flour = product(&state, "FLOUR-1", ProductKind::RawMaterial).await;
    let dough = product(&state, "DOUGH-1", ProductKind::SemiFinished).await;
    stock(&state, flour, dec!(10)).await;
    let bom = state
        .catalog
        .create_bom(CreateBomRequest {
            final_product_id: dough,
            name: "Dough".to_string(),
            components: vec![BomComponentInput {
                product_id: flour,
                quantity_per_unit: dec!(1),
                unit: "kg".to_string(),
            }],
        })
        .await
        .unwrap()
        .bom
        .id;

    let mut orders = Vec::new();
    for _ in 0..20 {
        let order = state
            .production
            .create_production_order(CreateProductionOrderRequest {
                product_id: dough,
                bom_id: Some(bom),
                qty_ordered: dec!(1),
                due_date: None,
                notes: None,
            })
            .await
            .unwrap();
        orders.push(order.id);
    }

    let mut tasks = Vec::new();
    for id in orders.iter().copied() {
        let production = state.production.clone();
        tasks.push(tokio::spawn(async move {
            production
                .transition_production_order(
                    id,
                    TransitionProductionOrderRequest::to(ProductionStatus::InProgress),
                )
                .await
        }));
    }

    let mut started = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => started += 1,
            Err(ServiceError::InsufficientStock { .. }) => {}
            Err(other) => panic!("unexpected failure: {other}"),
        }
    }

    assert_eq!(started, 10, "exactly 10 starts should succeed; got {}", started);
    assert_eq!(on_hand(&state, flour).await, Decimal::ZERO);
    assert!(state.ledger.reconcile(flour).await.unwrap().balanced);

    let mut in_progress = 0;
    for id in orders {
        let order = state.production.get_production_order(id).await.unwrap();
        if order.status == ProductionStatus::InProgress {
            in_progress += 1;
        }
    }
    assert_eq!(in_progress, 10);
}

// Eight callers start the same order at once: materials leave exactly once.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_starts_of_one_order_consume_once() {
    let mut config = AppConfig::default();
    config.max_conflict_retries = 20;
    let b = bakery(common::state_with(config), dec!(100), dec!(1)).await;

    let order = b
        .state
        .production
        .create_production_order(CreateProductionOrderRequest {
            product_id: b.bread,
            bom_id: Some(b.bom),
            qty_ordered: dec!(20),
            due_date: None,
            notes: None,
        })
        .await
        .unwrap();

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let production = b.state.production.clone();
        let id = order.id;
        tasks.push(tokio::spawn(async move {
            production
                .transition_production_order(
                    id,
                    TransitionProductionOrderRequest::to(ProductionStatus::InProgress),
                )
                .await
        }));
    }
    for task in tasks {
        let started = task.await.unwrap().unwrap();
        assert_eq!(started.status, ProductionStatus::InProgress);
    }

    assert_eq!(on_hand(&b.state, b.flour).await, dec!(90));
    assert_eq!(on_hand(&b.state, b.sugar).await, Decimal::ZERO);

    let mut raw_out = 0;
    for material in [b.flour, b.sugar] {
        let movements = b.state.ledger.list_movements(material).await.unwrap();
        raw_out += movements
            .iter()
            .filter(|m| m.movement_type == MovementType::ProductionRawOut)
            .count();
        assert!(b.state.ledger.reconcile(material).await.unwrap().balanced);
    }
    assert_eq!(raw_out, 2);
}
