use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::{
    db::TransactionCoordinator,
    entities::{
        product::ProductKind,
        purchase_item,
        purchase_order::{self, PurchaseStatus},
        stock_movement::MovementType,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    repositories::UnitOfWork,
    services::{
        catalog::{self, CreateProductRequest},
        stock_ledger::{MovementRequest, PostedBatch, StockLedger},
    },
};

/// One purchase line as supplied by the caller. The product is referenced
/// by id, or by SKU; an unknown SKU creates a raw material when `name` and
/// `unit` are present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseItemInput {
    #[serde(default)]
    pub product_id: Option<Uuid>,
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub unit: Option<String>,
    pub qty_ordered: Decimal,
    #[serde(default)]
    pub qty_received: Decimal,
    pub unit_cost: Decimal,
}

impl PurchaseItemInput {
    pub fn for_product(product_id: Uuid, qty_ordered: Decimal, unit_cost: Decimal) -> Self {
        Self {
            product_id: Some(product_id),
            sku: None,
            name: None,
            unit: None,
            qty_ordered,
            qty_received: Decimal::ZERO,
            unit_cost,
        }
    }

    pub fn received(mut self, qty: Decimal) -> Self {
        self.qty_received = qty;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePurchaseOrderRequest {
    pub po_number: String,
    #[serde(default)]
    pub supplier_id: Option<Uuid>,
    #[serde(default)]
    pub supplier_name: Option<String>,
    /// Defaults to DRAFT.
    #[serde(default)]
    pub status: Option<PurchaseStatus>,
    #[serde(default)]
    pub items: Vec<PurchaseItemInput>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionPurchaseOrderRequest {
    pub status: PurchaseStatus,
    /// Full replacement item set. `None` keeps the current items.
    #[serde(default)]
    pub items: Option<Vec<PurchaseItemInput>>,
    #[serde(default)]
    pub received_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl TransitionPurchaseOrderRequest {
    pub fn to(status: PurchaseStatus) -> Self {
        Self {
            status,
            items: None,
            received_date: None,
            notes: None,
        }
    }

    pub fn with_items(mut self, items: Vec<PurchaseItemInput>) -> Self {
        self.items = Some(items);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PurchaseOrderDetail {
    #[serde(flatten)]
    pub order: purchase_order::Model,
    pub items: Vec<purchase_item::Model>,
}

struct Transition {
    detail: PurchaseOrderDetail,
    posted: PostedBatch,
    events: Vec<Event>,
}

/// Drives purchase orders from DRAFT through receiving and credits the
/// ledger exactly once per received unit.
#[derive(Clone)]
pub struct PurchasingService {
    coordinator: TransactionCoordinator,
    ledger: StockLedger,
    event_sender: Option<EventSender>,
}

impl PurchasingService {
    pub fn new(
        coordinator: TransactionCoordinator,
        ledger: StockLedger,
        event_sender: Option<EventSender>,
    ) -> Self {
        Self {
            coordinator,
            ledger,
            event_sender,
        }
    }

    /// Inserts the order as DRAFT, then moves it to the requested status in
    /// the same transaction.
    #[instrument(skip(self, request), fields(po_number = %request.po_number))]
    pub async fn create_purchase_order(
        &self,
        request: CreatePurchaseOrderRequest,
    ) -> Result<PurchaseOrderDetail, ServiceError> {
        let now = Utc::now();
        let transition = self
            .coordinator
            .run_in_transaction("purchasing.create", move |mut tx| {
                let request = request.clone();
                async move {
                    let result = self.create_in(tx.as_mut(), request, now).await;
                    (tx, result)
                }
            })
            .await?;

        counter!("purchasing.orders.created", 1);
        info!(
            order_id = %transition.detail.order.id,
            status = %transition.detail.order.status,
            "purchase order created"
        );
        Ok(self.finish(transition).await)
    }

    #[instrument(skip(self))]
    pub async fn get_purchase_order(&self, id: Uuid) -> Result<PurchaseOrderDetail, ServiceError> {
        self.coordinator
            .run_in_transaction("purchasing.get", move |mut tx| async move {
                let result = load_detail(tx.as_mut(), id).await;
                (tx, result)
            })
            .await
    }

    #[instrument(skip(self, request), fields(target = %request.status))]
    pub async fn transition_purchase_order(
        &self,
        id: Uuid,
        request: TransitionPurchaseOrderRequest,
    ) -> Result<PurchaseOrderDetail, ServiceError> {
        let now = Utc::now();
        let outcome = self
            .coordinator
            .run_in_transaction("purchasing.transition", move |mut tx| {
                let request = request.clone();
                async move {
                    let result = self.transition_in(tx.as_mut(), id, &request, now).await;
                    (tx, result)
                }
            })
            .await;

        match outcome {
            Ok(transition) => {
                info!(
                    order_id = %id,
                    status = %transition.detail.order.status,
                    movements = transition.posted.movements.len(),
                    "purchase order transition committed"
                );
                Ok(self.finish(transition).await)
            }
            Err(err) => {
                if !err.status_code().is_server_error() {
                    warn!(order_id = %id, error = %err, "purchase order transition rejected");
                }
                Err(err)
            }
        }
    }

    /// Deletes an order and its items. Orders with stock already credited
    /// are only deleted with `reverse_receipts`, which debits every posted
    /// quantity first.
    #[instrument(skip(self))]
    pub async fn delete_purchase_order(
        &self,
        id: Uuid,
        reverse_receipts: bool,
    ) -> Result<(), ServiceError> {
        let now = Utc::now();
        let posted = self
            .coordinator
            .run_in_transaction("purchasing.delete", move |mut tx| async move {
                let result = self
                    .delete_in(tx.as_mut(), id, reverse_receipts, now)
                    .await;
                (tx, result)
            })
            .await?;

        counter!("purchasing.orders.deleted", 1);
        info!(
            order_id = %id,
            reversed = posted.movements.len(),
            "purchase order deleted"
        );
        if let Some(sender) = &self.event_sender {
            sender.send_all(posted.events()).await;
        }
        Ok(())
    }

    async fn finish(&self, transition: Transition) -> PurchaseOrderDetail {
        if let Some(sender) = &self.event_sender {
            let mut events = transition.events;
            events.extend(transition.posted.events());
            sender.send_all(events).await;
        }
        transition.detail
    }

    async fn create_in(
        &self,
        tx: &mut dyn UnitOfWork,
        request: CreatePurchaseOrderRequest,
        now: DateTime<Utc>,
    ) -> Result<Transition, ServiceError> {
        if tx
            .find_purchase_order_by_number(&request.po_number)
            .await?
            .is_some()
        {
            return Err(ServiceError::DuplicateReference(format!(
                "purchase order number {} already exists",
                request.po_number
            )));
        }

        let order = tx
            .insert_purchase_order(purchase_order::Model {
                id: Uuid::new_v4(),
                po_number: request.po_number,
                supplier_id: request.supplier_id,
                supplier_name: request.supplier_name,
                status: PurchaseStatus::Draft,
                total_amount: Decimal::ZERO,
                received_date: None,
                notes: request.notes,
                created_at: now,
                updated_at: now,
            })
            .await?;

        let target = request.status.unwrap_or(PurchaseStatus::Draft);
        let transition = TransitionPurchaseOrderRequest::to(target).with_items(request.items);
        self.transition_in(tx, order.id, &transition, now).await
    }

    async fn transition_in(
        &self,
        tx: &mut dyn UnitOfWork,
        id: Uuid,
        request: &TransitionPurchaseOrderRequest,
        now: DateTime<Utc>,
    ) -> Result<Transition, ServiceError> {
        let mut order = tx
            .lock_purchase_order(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("purchase order {}", id)))?;
        let from = order.status;
        let to = request.status;
        check_transition(id, from, to)?;

        if let Some(notes) = &request.notes {
            order.notes = Some(notes.clone());
        }

        let mut items = tx.purchase_items(id).await?;
        if let Some(inputs) = &request.items {
            if matches!(from, PurchaseStatus::Received | PurchaseStatus::Cancelled) {
                return Err(ServiceError::InvalidState(format!(
                    "items of {} purchase order {} cannot be replaced",
                    from, order.po_number
                )));
            }
            let replacement = build_items(tx, id, inputs, &items).await?;
            items = tx.replace_purchase_items(id, replacement).await?;
            order.total_amount = order_total(&items)?;
        }

        let mut posted = PostedBatch::default();
        let mut events = Vec::new();
        if to.is_receiving() {
            let received_at = request.received_date.unwrap_or(now);
            let mut lines = Vec::new();
            for item in items.iter_mut() {
                let pending = item.unposted();
                if pending > Decimal::ZERO {
                    lines.push(
                        MovementRequest::new(
                            item.product_id,
                            pending,
                            MovementType::PurchaseReceipt,
                            order.po_number.clone(),
                        )
                        .with_cost_price(item.unit_cost)
                        .occurred_at(received_at)
                        .with_notes(format!("Received on purchase order {}", order.po_number)),
                    );
                    item.qty_posted = item.qty_received;
                }
            }

            if lines.is_empty() {
                debug!(po_number = %order.po_number, "nothing new to receive");
            } else {
                posted = self.ledger.post_batch(tx, &lines, now).await?;
                items = tx.replace_purchase_items(id, items).await?;
                counter!("purchasing.receipts.posted", lines.len() as u64);
                events.push(Event::PurchaseOrderReceived {
                    order_id: id,
                    po_number: order.po_number.clone(),
                    status: to,
                    lines_posted: lines.len(),
                });
            }

            if to == PurchaseStatus::Received && from != PurchaseStatus::Received {
                order.received_date = Some(received_at);
            }
        }

        order.status = to;
        order.updated_at = now;
        let order = tx.update_purchase_order(order).await?;

        Ok(Transition {
            detail: PurchaseOrderDetail { order, items },
            posted,
            events,
        })
    }

    async fn delete_in(
        &self,
        tx: &mut dyn UnitOfWork,
        id: Uuid,
        reverse_receipts: bool,
        now: DateTime<Utc>,
    ) -> Result<PostedBatch, ServiceError> {
        let order = tx
            .lock_purchase_order(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("purchase order {}", id)))?;
        let items = tx.purchase_items(id).await?;

        let has_posted = items.iter().any(|item| item.qty_posted > Decimal::ZERO);
        let mut posted = PostedBatch::default();
        if order.status.is_receiving() || has_posted {
            if !reverse_receipts {
                return Err(ServiceError::InvalidState(format!(
                    "purchase order {} is {} and has credited stock; delete with reverse_receipts to undo it",
                    order.po_number, order.status
                )));
            }

            let lines: Vec<MovementRequest> = items
                .iter()
                .filter(|item| item.qty_posted > Decimal::ZERO)
                .map(|item| {
                    MovementRequest::new(
                        item.product_id,
                        -item.qty_posted,
                        MovementType::PurchaseReversal,
                        order.po_number.clone(),
                    )
                    .with_notes(format!("Reversed on deletion of {}", order.po_number))
                })
                .collect();
            posted = self.ledger.post_batch(tx, &lines, now).await?;
        }

        tx.delete_purchase_order(id).await?;
        Ok(posted)
    }
}

fn check_transition(
    id: Uuid,
    from: PurchaseStatus,
    to: PurchaseStatus,
) -> Result<(), ServiceError> {
    use PurchaseStatus::*;
    let allowed = matches!(
        (from, to),
        (Draft, Draft)
            | (Confirmed, Confirmed)
            | (Draft, Confirmed)
            | (Confirmed, Draft)
            | (Draft | Confirmed | PartiallyReceived, PartiallyReceived | Received)
            | (Received, Received)
            | (Draft | Confirmed, Cancelled)
    );
    if allowed {
        Ok(())
    } else {
        Err(ServiceError::InvalidState(format!(
            "purchase order {} cannot move from {} to {}",
            id, from, to
        )))
    }
}

async fn load_detail(
    tx: &mut dyn UnitOfWork,
    id: Uuid,
) -> Result<PurchaseOrderDetail, ServiceError> {
    let order = tx
        .find_purchase_order(id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("purchase order {}", id)))?;
    let items = tx.purchase_items(id).await?;
    Ok(PurchaseOrderDetail { order, items })
}

/// Builds the replacement item set. Quantities already posted to the ledger
/// move to the new lines of the same product, first line first; every
/// posted unit must find a home.
async fn build_items(
    tx: &mut dyn UnitOfWork,
    order_id: Uuid,
    inputs: &[PurchaseItemInput],
    existing: &[purchase_item::Model],
) -> Result<Vec<purchase_item::Model>, ServiceError> {
    let mut posted_pool: HashMap<Uuid, Decimal> = HashMap::new();
    for item in existing {
        let pooled = posted_pool.entry(item.product_id).or_default();
        *pooled = pooled.checked_add(item.qty_posted).ok_or_else(|| {
            ServiceError::InvalidQuantity(format!(
                "posted quantity of product {} overflows",
                item.product_id
            ))
        })?;
    }

    let mut items = Vec::with_capacity(inputs.len());
    for (position, input) in inputs.iter().enumerate() {
        if input.qty_ordered <= Decimal::ZERO {
            return Err(ServiceError::InvalidQuantity(format!(
                "line {} ordered quantity must be positive",
                position + 1
            )));
        }
        if input.qty_received < Decimal::ZERO || input.unit_cost < Decimal::ZERO {
            return Err(ServiceError::InvalidQuantity(format!(
                "line {} received quantity and unit cost must not be negative",
                position + 1
            )));
        }

        let line_total = input.qty_ordered.checked_mul(input.unit_cost).ok_or_else(|| {
            ServiceError::InvalidQuantity(format!("line {} total overflows", position + 1))
        })?;

        let product_id = resolve_product(tx, input).await?;
        let pool = posted_pool.entry(product_id).or_default();
        let carried = (*pool).min(input.qty_received);
        *pool -= carried;

        items.push(purchase_item::Model {
            id: Uuid::new_v4(),
            purchase_order_id: order_id,
            position: position as i32,
            product_id,
            qty_ordered: input.qty_ordered,
            qty_received: input.qty_received,
            qty_posted: carried,
            unit_cost: input.unit_cost,
            line_total,
        });
    }

    if let Some((product_id, orphaned)) = posted_pool
        .into_iter()
        .find(|(_, remaining)| *remaining > Decimal::ZERO)
    {
        return Err(ServiceError::InvalidQuantity(format!(
            "replacement drops {} already received units of product {}",
            orphaned, product_id
        )));
    }

    Ok(items)
}

fn order_total(items: &[purchase_item::Model]) -> Result<Decimal, ServiceError> {
    items.iter().try_fold(Decimal::ZERO, |total, item| {
        total.checked_add(item.line_total).ok_or_else(|| {
            ServiceError::InvalidQuantity("purchase order total overflows".to_string())
        })
    })
}

async fn resolve_product(
    tx: &mut dyn UnitOfWork,
    input: &PurchaseItemInput,
) -> Result<Uuid, ServiceError> {
    if let Some(product_id) = input.product_id {
        return match tx.find_product(product_id).await? {
            Some(product) => Ok(product.id),
            None => Err(ServiceError::NotFound(format!("product {}", product_id))),
        };
    }

    let sku = input.sku.as_deref().ok_or_else(|| {
        ServiceError::NotFound("purchase item names neither a product id nor a SKU".to_string())
    })?;
    if let Some(product) = tx.find_product_by_sku(sku).await? {
        return Ok(product.id);
    }

    match (&input.name, &input.unit) {
        (Some(name), Some(unit)) => {
            let created = catalog::insert_product(
                tx,
                CreateProductRequest {
                    sku: sku.to_string(),
                    name: name.clone(),
                    unit: unit.clone(),
                    kind: ProductKind::RawMaterial,
                    min_qty: Decimal::ZERO,
                    cost_price: input.unit_cost,
                },
            )
            .await?;
            info!(product_id = %created.id, sku = %sku, "raw material created from purchase item");
            Ok(created.id)
        }
        _ => Err(ServiceError::NotFound(format!(
            "product with SKU {} (supply name and unit to create it)",
            sku
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::repositories::MemoryStore;
    use crate::AppState;
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    async fn setup() -> (AppState, Uuid) {
        let state = AppState::new(Arc::new(MemoryStore::new()), AppConfig::default(), None);
        let flour = state
            .catalog
            .create_product(CreateProductRequest {
                sku: "FLOUR-1".into(),
                name: "Flour".into(),
                unit: "kg".into(),
                kind: ProductKind::RawMaterial,
                min_qty: Decimal::ZERO,
                cost_price: Decimal::ZERO,
            })
            .await
            .unwrap();
        (state, flour.id)
    }

    fn draft(po_number: &str, items: Vec<PurchaseItemInput>) -> CreatePurchaseOrderRequest {
        CreatePurchaseOrderRequest {
            po_number: po_number.into(),
            supplier_id: None,
            supplier_name: Some("Mill & Co".into()),
            status: None,
            items,
            notes: None,
        }
    }

    #[tokio::test]
    async fn repeated_receive_credits_once() {
        let (state, flour) = setup().await;
        let po = state
            .purchasing
            .create_purchase_order(draft(
                "PO-1",
                vec![PurchaseItemInput::for_product(flour, dec!(50), dec!(1.20))],
            ))
            .await
            .unwrap();
        assert_eq!(po.order.total_amount, dec!(60.00));

        let receive = TransitionPurchaseOrderRequest::to(PurchaseStatus::Received).with_items(vec![
            PurchaseItemInput::for_product(flour, dec!(50), dec!(1.20)).received(dec!(50)),
        ]);
        let received = state
            .purchasing
            .transition_purchase_order(po.order.id, receive)
            .await
            .unwrap();
        assert_eq!(received.items[0].qty_posted, dec!(50));
        assert!(received.order.received_date.is_some());

        let again = state
            .purchasing
            .transition_purchase_order(
                po.order.id,
                TransitionPurchaseOrderRequest::to(PurchaseStatus::Received),
            )
            .await
            .unwrap();
        assert_eq!(again.order.received_date, received.order.received_date);
        assert_eq!(state.ledger.get_on_hand(flour).await.unwrap(), dec!(50));
    }

    #[tokio::test]
    async fn partial_then_full_receipt_posts_only_the_difference() {
        let (state, flour) = setup().await;
        let po = state
            .purchasing
            .create_purchase_order(draft(
                "PO-2",
                vec![PurchaseItemInput::for_product(flour, dec!(50), dec!(1))],
            ))
            .await
            .unwrap();

        state
            .purchasing
            .transition_purchase_order(
                po.order.id,
                TransitionPurchaseOrderRequest::to(PurchaseStatus::PartiallyReceived).with_items(
                    vec![PurchaseItemInput::for_product(flour, dec!(50), dec!(1)).received(dec!(20))],
                ),
            )
            .await
            .unwrap();
        assert_eq!(state.ledger.get_on_hand(flour).await.unwrap(), dec!(20));

        state
            .purchasing
            .transition_purchase_order(
                po.order.id,
                TransitionPurchaseOrderRequest::to(PurchaseStatus::Received).with_items(vec![
                    PurchaseItemInput::for_product(flour, dec!(50), dec!(1)).received(dec!(50)),
                ]),
            )
            .await
            .unwrap();
        assert_eq!(state.ledger.get_on_hand(flour).await.unwrap(), dec!(50));
        assert!(state.ledger.reconcile(flour).await.unwrap().balanced);
    }

    #[tokio::test]
    async fn replacement_cannot_drop_posted_quantity() {
        let (state, flour) = setup().await;
        let po = state
            .purchasing
            .create_purchase_order(CreatePurchaseOrderRequest {
                status: Some(PurchaseStatus::PartiallyReceived),
                ..draft(
                    "PO-3",
                    vec![PurchaseItemInput::for_product(flour, dec!(10), dec!(1)).received(dec!(6))],
                )
            })
            .await
            .unwrap();

        let shrink = TransitionPurchaseOrderRequest::to(PurchaseStatus::PartiallyReceived)
            .with_items(vec![
                PurchaseItemInput::for_product(flour, dec!(10), dec!(1)).received(dec!(4)),
            ]);
        assert_matches!(
            state.purchasing.transition_purchase_order(po.order.id, shrink).await,
            Err(ServiceError::InvalidQuantity(_))
        );

        let split = TransitionPurchaseOrderRequest::to(PurchaseStatus::PartiallyReceived)
            .with_items(vec![
                PurchaseItemInput::for_product(flour, dec!(5), dec!(1)).received(dec!(4)),
                PurchaseItemInput::for_product(flour, dec!(5), dec!(1)).received(dec!(3)),
            ]);
        let detail = state
            .purchasing
            .transition_purchase_order(po.order.id, split)
            .await
            .unwrap();
        let posted: Vec<Decimal> = detail.items.iter().map(|i| i.qty_posted).collect();
        assert_eq!(posted, vec![dec!(4), dec!(3)]);
        assert_eq!(state.ledger.get_on_hand(flour).await.unwrap(), dec!(7));
    }

    #[tokio::test]
    async fn duplicate_po_number_is_rejected() {
        let (state, flour) = setup().await;
        let items = vec![PurchaseItemInput::for_product(flour, dec!(1), dec!(1))];
        state
            .purchasing
            .create_purchase_order(draft("PO-4", items.clone()))
            .await
            .unwrap();
        assert_matches!(
            state.purchasing.create_purchase_order(draft("PO-4", items)).await,
            Err(ServiceError::DuplicateReference(_))
        );
    }

    #[tokio::test]
    async fn unknown_sku_creates_raw_material() {
        let (state, _) = setup().await;
        let po = state
            .purchasing
            .create_purchase_order(draft(
                "PO-5",
                vec![PurchaseItemInput {
                    product_id: None,
                    sku: Some("YEAST-1".into()),
                    name: Some("Yeast".into()),
                    unit: Some("g".into()),
                    qty_ordered: dec!(500),
                    qty_received: Decimal::ZERO,
                    unit_cost: dec!(0.02),
                }],
            ))
            .await
            .unwrap();

        let yeast = state.catalog.get_product(po.items[0].product_id).await.unwrap();
        assert_eq!(yeast.sku, "YEAST-1");
        assert_eq!(yeast.kind, ProductKind::RawMaterial);
        assert_eq!(yeast.qty_on_hand, Decimal::ZERO);

        let missing = draft(
            "PO-6",
            vec![PurchaseItemInput {
                product_id: None,
                sku: Some("SALT-1".into()),
                name: None,
                unit: None,
                qty_ordered: dec!(1),
                qty_received: Decimal::ZERO,
                unit_cost: dec!(1),
            }],
        );
        assert_matches!(
            state.purchasing.create_purchase_order(missing).await,
            Err(ServiceError::NotFound(_))
        );
    }

    #[tokio::test]
    async fn delete_of_received_order_needs_reversal() {
        let (state, flour) = setup().await;
        let po = state
            .purchasing
            .create_purchase_order(CreatePurchaseOrderRequest {
                status: Some(PurchaseStatus::Received),
                ..draft(
                    "PO-7",
                    vec![PurchaseItemInput::for_product(flour, dec!(8), dec!(2)).received(dec!(8))],
                )
            })
            .await
            .unwrap();
        assert_eq!(state.ledger.get_on_hand(flour).await.unwrap(), dec!(8));

        assert_matches!(
            state.purchasing.delete_purchase_order(po.order.id, false).await,
            Err(ServiceError::InvalidState(_))
        );

        state
            .purchasing
            .delete_purchase_order(po.order.id, true)
            .await
            .unwrap();
        assert_eq!(state.ledger.get_on_hand(flour).await.unwrap(), Decimal::ZERO);
        assert_matches!(
            state.purchasing.get_purchase_order(po.order.id).await,
            Err(ServiceError::NotFound(_))
        );
    }

    #[tokio::test]
    async fn cancelled_is_terminal_and_received_items_are_frozen() {
        let (state, flour) = setup().await;
        let items = vec![PurchaseItemInput::for_product(flour, dec!(1), dec!(1)).received(dec!(1))];

        let cancelled = state
            .purchasing
            .create_purchase_order(CreatePurchaseOrderRequest {
                status: Some(PurchaseStatus::Cancelled),
                ..draft("PO-8", items.clone())
            })
            .await
            .unwrap();
        assert_matches!(
            state
                .purchasing
                .transition_purchase_order(
                    cancelled.order.id,
                    TransitionPurchaseOrderRequest::to(PurchaseStatus::Received),
                )
                .await,
            Err(ServiceError::InvalidState(_))
        );

        let received = state
            .purchasing
            .create_purchase_order(CreatePurchaseOrderRequest {
                status: Some(PurchaseStatus::Received),
                ..draft("PO-9", items.clone())
            })
            .await
            .unwrap();
        assert_matches!(
            state
                .purchasing
                .transition_purchase_order(
                    received.order.id,
                    TransitionPurchaseOrderRequest::to(PurchaseStatus::Received)
                        .with_items(items.clone()),
                )
                .await,
            Err(ServiceError::InvalidState(_))
        );
        assert_matches!(
            state
                .purchasing
                .transition_purchase_order(
                    received.order.id,
                    TransitionPurchaseOrderRequest::to(PurchaseStatus::Confirmed),
                )
                .await,
            Err(ServiceError::InvalidState(_))
        );
    }

    #[tokio::test]
    async fn oversized_amounts_are_rejected_without_saving() {
        let (state, flour) = setup().await;
        assert_matches!(
            state
                .purchasing
                .create_purchase_order(draft(
                    "PO-BIG",
                    vec![PurchaseItemInput::for_product(flour, Decimal::MAX, dec!(2))],
                ))
                .await,
            Err(ServiceError::InvalidQuantity(_))
        );
        assert_matches!(
            state
                .purchasing
                .create_purchase_order(draft(
                    "PO-BIG",
                    vec![
                        PurchaseItemInput::for_product(flour, Decimal::MAX, dec!(1)),
                        PurchaseItemInput::for_product(flour, Decimal::MAX, dec!(1)),
                    ],
                ))
                .await,
            Err(ServiceError::InvalidQuantity(_))
        );

        let po = state
            .purchasing
            .create_purchase_order(draft(
                "PO-BIG",
                vec![PurchaseItemInput::for_product(flour, dec!(5), dec!(2))],
            ))
            .await
            .unwrap();
        assert_eq!(po.order.total_amount, dec!(10));
    }
}
