mod common;

use assert_matches::assert_matches;
use erp_order_engine::{
    entities::{
        product::ProductKind, production_order::ProductionStatus, purchase_order::PurchaseStatus,
    },
    errors::ServiceError,
    services::{
        production::{CreateProductionOrderRequest, TransitionProductionOrderRequest},
        purchasing::{
            CreatePurchaseOrderRequest, PurchaseItemInput, TransitionPurchaseOrderRequest,
        },
    },
    AppState,
};
use rstest::rstest;
use rust_decimal_macros::dec;
use uuid::Uuid;

use common::{bakery, on_hand, Bakery};

/// Walks a fresh order along a legal path to `status`.
async fn production_order_in(b: &Bakery, status: ProductionStatus) -> Uuid {
    let id = b
        .state
        .production
        .create_production_order(CreateProductionOrderRequest {
            product_id: b.bread,
            bom_id: Some(b.bom),
            qty_ordered: dec!(2),
            due_date: None,
            notes: None,
        })
        .await
        .unwrap()
        .id;

    let path: &[ProductionStatus] = match status {
        ProductionStatus::Planned => &[],
        ProductionStatus::InProgress => &[ProductionStatus::InProgress],
        ProductionStatus::Done => &[ProductionStatus::InProgress, ProductionStatus::Done],
        ProductionStatus::Cancelled => &[ProductionStatus::Cancelled],
    };
    for step in path {
        b.state
            .production
            .transition_production_order(id, TransitionProductionOrderRequest::to(*step))
            .await
            .unwrap();
    }
    id
}

#[rstest]
#[case::done_to_planned(ProductionStatus::Done, ProductionStatus::Planned)]
#[case::done_to_in_progress(ProductionStatus::Done, ProductionStatus::InProgress)]
#[case::cancelled_to_planned(ProductionStatus::Cancelled, ProductionStatus::Planned)]
#[case::cancelled_to_in_progress(ProductionStatus::Cancelled, ProductionStatus::InProgress)]
#[case::cancelled_to_done(ProductionStatus::Cancelled, ProductionStatus::Done)]
#[tokio::test]
async fn illegal_production_transitions_change_nothing(
    #[case] from: ProductionStatus,
    #[case] to: ProductionStatus,
) {
    let b = bakery(common::state(), dec!(100), dec!(10)).await;
    let id = production_order_in(&b, from).await;
    let flour_before = on_hand(&b.state, b.flour).await;
    let bread_before = on_hand(&b.state, b.bread).await;

    let result = b
        .state
        .production
        .transition_production_order(
            id,
            TransitionProductionOrderRequest::to(to).with_qty_produced(dec!(2)),
        )
        .await;

    assert_matches!(result, Err(ServiceError::InvalidState(_)));
    assert_eq!(b.state.production.get_production_order(id).await.unwrap().status, from);
    assert_eq!(on_hand(&b.state, b.flour).await, flour_before);
    assert_eq!(on_hand(&b.state, b.bread).await, bread_before);
}

async fn purchase_order_in(state: &AppState, product: Uuid, status: PurchaseStatus) -> Uuid {
    let received = match status {
        PurchaseStatus::PartiallyReceived => dec!(4),
        PurchaseStatus::Received => dec!(10),
        _ => dec!(0),
    };
    state
        .purchasing
        .create_purchase_order(CreatePurchaseOrderRequest {
            po_number: format!("PO-{}", Uuid::new_v4()),
            supplier_id: None,
            supplier_name: None,
            status: Some(status),
            items: vec![PurchaseItemInput::for_product(product, dec!(10), dec!(3)).received(received)],
            notes: None,
        })
        .await
        .unwrap()
        .order
        .id
}

#[rstest]
#[case::partial_to_draft(PurchaseStatus::PartiallyReceived, PurchaseStatus::Draft)]
#[case::partial_to_confirmed(PurchaseStatus::PartiallyReceived, PurchaseStatus::Confirmed)]
#[case::partial_to_cancelled(PurchaseStatus::PartiallyReceived, PurchaseStatus::Cancelled)]
#[case::received_to_draft(PurchaseStatus::Received, PurchaseStatus::Draft)]
#[case::received_to_partial(PurchaseStatus::Received, PurchaseStatus::PartiallyReceived)]
#[case::received_to_cancelled(PurchaseStatus::Received, PurchaseStatus::Cancelled)]
#[case::cancelled_to_draft(PurchaseStatus::Cancelled, PurchaseStatus::Draft)]
#[case::cancelled_to_received(PurchaseStatus::Cancelled, PurchaseStatus::Received)]
#[tokio::test]
async fn illegal_purchase_transitions_change_nothing(
    #[case] from: PurchaseStatus,
    #[case] to: PurchaseStatus,
) {
    let state = common::state();
    let product = common::product(&state, "RESIN-1", ProductKind::RawMaterial).await;
    let id = purchase_order_in(&state, product, from).await;
    let before = on_hand(&state, product).await;

    let result = state
        .purchasing
        .transition_purchase_order(id, TransitionPurchaseOrderRequest::to(to))
        .await;

    assert_matches!(result, Err(ServiceError::InvalidState(_)));
    assert_eq!(state.purchasing.get_purchase_order(id).await.unwrap().order.status, from);
    assert_eq!(on_hand(&state, product).await, before);
}
