use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::{
    db::TransactionCoordinator,
    entities::{
        product,
        stock_movement::{self, MovementType},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    repositories::UnitOfWork,
};

/// Reference recorded on manual adjustments.
pub const ADJUSTMENT_REFERENCE: &str = "STOCK-ADJUSTMENT";

/// One requested ledger line.
#[derive(Debug, Clone, PartialEq)]
pub struct MovementRequest {
    pub product_id: Uuid,
    /// Signed: positive credits stock, negative debits it.
    pub qty: Decimal,
    pub movement_type: MovementType,
    pub reference: String,
    pub notes: Option<String>,
    /// Business date of the movement; defaults to the posting time.
    pub occurred_at: Option<DateTime<Utc>>,
    /// New cost price for the product (purchase receipts).
    pub cost_price: Option<Decimal>,
}

impl MovementRequest {
    pub fn new(
        product_id: Uuid,
        qty: Decimal,
        movement_type: MovementType,
        reference: impl Into<String>,
    ) -> Self {
        Self {
            product_id,
            qty,
            movement_type,
            reference: reference.into(),
            notes: None,
            occurred_at: None,
            cost_price: None,
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn occurred_at(mut self, at: DateTime<Utc>) -> Self {
        self.occurred_at = Some(at);
        self
    }

    pub fn with_cost_price(mut self, cost_price: Decimal) -> Self {
        self.cost_price = Some(cost_price);
        self
    }
}

/// Result of posting a batch inside a unit of work. Its events are
/// published by the caller once the unit has committed.
#[derive(Debug, Clone, Default)]
pub struct PostedBatch {
    pub movements: Vec<stock_movement::Model>,
    /// Debited products that ended at or below their reorder threshold.
    pub low_stock: Vec<product::Model>,
}

impl PostedBatch {
    pub fn merge(&mut self, other: PostedBatch) {
        self.movements.extend(other.movements);
        self.low_stock.extend(other.low_stock);
    }

    pub fn events(&self) -> Vec<Event> {
        let recorded = self.movements.iter().map(|m| Event::StockMovementRecorded {
            movement_id: m.id,
            product_id: m.product_id,
            qty: m.qty,
            movement_type: m.movement_type,
            reference: m.reference.clone(),
        });
        let low = self.low_stock.iter().map(|p| Event::LowStockDetected {
            product_id: p.id,
            sku: p.sku.clone(),
            qty_on_hand: p.qty_on_hand,
            min_qty: p.min_qty,
        });
        recorded.chain(low).collect()
    }
}

/// Outcome of comparing a product's balance against its movement history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reconciliation {
    pub product_id: Uuid,
    pub on_hand: Decimal,
    pub movement_sum: Decimal,
    pub balanced: bool,
}

/// Owns per-product on-hand quantities and the append-only movement log.
/// Every balance change in the crate goes through [`StockLedger::post_batch`].
#[derive(Clone)]
pub struct StockLedger {
    coordinator: TransactionCoordinator,
    event_sender: Option<EventSender>,
}

impl StockLedger {
    pub fn new(coordinator: TransactionCoordinator, event_sender: Option<EventSender>) -> Self {
        Self {
            coordinator,
            event_sender,
        }
    }

    /// Applies `requests` atomically within `tx`.
    ///
    /// Lines are netted per product. Every touched product is locked in
    /// ascending id order and every net debit is checked before anything is
    /// written, so a shortfall on any product leaves all balances untouched.
    pub async fn post_batch(
        &self,
        tx: &mut dyn UnitOfWork,
        requests: &[MovementRequest],
        now: DateTime<Utc>,
    ) -> Result<PostedBatch, ServiceError> {
        if requests.is_empty() {
            return Ok(PostedBatch::default());
        }

        let mut net: BTreeMap<Uuid, Decimal> = BTreeMap::new();
        let mut cost_prices: HashMap<Uuid, Decimal> = HashMap::new();
        for request in requests {
            if request.qty.is_zero() {
                return Err(ServiceError::InvalidQuantity(format!(
                    "{} movement for product {} has zero quantity",
                    request.movement_type, request.product_id
                )));
            }
            if let Some(cost_price) = request.cost_price {
                if cost_price < Decimal::ZERO {
                    return Err(ServiceError::InvalidQuantity(format!(
                        "cost price for product {} must not be negative",
                        request.product_id
                    )));
                }
                cost_prices.insert(request.product_id, cost_price);
            }
            let entry = net.entry(request.product_id).or_default();
            *entry = entry.checked_add(request.qty).ok_or_else(|| {
                ServiceError::InvalidQuantity(format!(
                    "net movement for product {} overflows",
                    request.product_id
                ))
            })?;
        }

        // check phase
        let mut locked = Vec::with_capacity(net.len());
        for (&product_id, &delta) in &net {
            let product = tx
                .lock_product(product_id)
                .await?
                .ok_or_else(|| ServiceError::NotFound(format!("product {}", product_id)))?;

            let balance = product.qty_on_hand.checked_add(delta).ok_or_else(|| {
                ServiceError::InvalidQuantity(format!(
                    "on-hand quantity of {} overflows",
                    product.label()
                ))
            })?;
            if delta < Decimal::ZERO && balance < Decimal::ZERO {
                warn!(
                    %product_id,
                    sku = %product.sku,
                    required = %(-delta),
                    available = %product.qty_on_hand,
                    "insufficient stock"
                );
                return Err(ServiceError::InsufficientStock {
                    product_id,
                    product: product.label(),
                    required: -delta,
                    available: product.qty_on_hand,
                });
            }
            locked.push((product, delta, balance));
        }

        // apply phase
        let mut batch = PostedBatch::default();
        for (mut product, delta, balance) in locked {
            product.qty_on_hand = balance;
            if let Some(cost_price) = cost_prices.get(&product.id) {
                product.cost_price = *cost_price;
            }
            product.updated_at = now;
            let product = tx.update_product(product).await?;
            if delta < Decimal::ZERO && product.is_below_minimum() {
                batch.low_stock.push(product);
            }
        }

        for request in requests {
            let movement = tx
                .insert_movement(stock_movement::Model {
                    id: Uuid::new_v4(),
                    sequence: 0,
                    product_id: request.product_id,
                    qty: request.qty,
                    movement_type: request.movement_type,
                    reference: request.reference.clone(),
                    notes: request.notes.clone(),
                    occurred_at: request.occurred_at.unwrap_or(now),
                    recorded_at: now,
                })
                .await?;
            batch.movements.push(movement);
        }

        counter!("ledger.movements.recorded", batch.movements.len() as u64);
        debug!(
            lines = requests.len(),
            products = net.len(),
            "stock movements staged"
        );
        Ok(batch)
    }

    #[instrument(skip(self))]
    pub async fn get_on_hand(&self, product_id: Uuid) -> Result<Decimal, ServiceError> {
        self.coordinator
            .run_in_transaction("ledger.on_hand", move |mut tx| async move {
                let result = tx.find_product(product_id).await.and_then(|found| {
                    found
                        .map(|p| p.qty_on_hand)
                        .ok_or_else(|| ServiceError::NotFound(format!("product {}", product_id)))
                });
                (tx, result)
            })
            .await
    }

    /// True iff on-hand is at least `required`.
    #[instrument(skip(self))]
    pub async fn has_sufficient(
        &self,
        product_id: Uuid,
        required: Decimal,
    ) -> Result<bool, ServiceError> {
        Ok(self.get_on_hand(product_id).await? >= required)
    }

    #[instrument(skip(self), fields(product_id = %request.product_id, qty = %request.qty))]
    pub async fn apply_movement(
        &self,
        request: MovementRequest,
    ) -> Result<stock_movement::Model, ServiceError> {
        self.apply_movement_batch(vec![request])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ServiceError::InternalError("movement was not recorded".to_string()))
    }

    /// All lines commit together or none do.
    #[instrument(skip(self, requests), fields(lines = requests.len()))]
    pub async fn apply_movement_batch(
        &self,
        requests: Vec<MovementRequest>,
    ) -> Result<Vec<stock_movement::Model>, ServiceError> {
        let now = Utc::now();
        let posted = self
            .coordinator
            .run_in_transaction("ledger.apply_batch", move |mut tx| {
                let requests = requests.clone();
                async move {
                    let result = self.post_batch(tx.as_mut(), &requests, now).await;
                    (tx, result)
                }
            })
            .await?;

        info!(movements = posted.movements.len(), "stock movements committed");
        self.publish(posted.events()).await;
        Ok(posted.movements)
    }

    /// Records an ADJUSTMENT (opening balance, stock count correction).
    #[instrument(skip(self))]
    pub async fn adjust(
        &self,
        product_id: Uuid,
        qty: Decimal,
        notes: Option<String>,
    ) -> Result<stock_movement::Model, ServiceError> {
        let mut request =
            MovementRequest::new(product_id, qty, MovementType::Adjustment, ADJUSTMENT_REFERENCE);
        request.notes = notes;
        self.apply_movement(request).await
    }

    /// Movements of one product in recording order.
    #[instrument(skip(self))]
    pub async fn list_movements(
        &self,
        product_id: Uuid,
    ) -> Result<Vec<stock_movement::Model>, ServiceError> {
        self.coordinator
            .run_in_transaction("ledger.list_movements", move |mut tx| async move {
                let result = match tx.find_product(product_id).await {
                    Ok(Some(_)) => tx.movements_for_product(product_id).await,
                    Ok(None) => Err(ServiceError::NotFound(format!("product {}", product_id))),
                    Err(e) => Err(e),
                };
                (tx, result)
            })
            .await
    }

    #[instrument(skip(self))]
    pub async fn reconcile(&self, product_id: Uuid) -> Result<Reconciliation, ServiceError> {
        let reconciliation = self
            .coordinator
            .run_in_transaction("ledger.reconcile", move |mut tx| async move {
                let result = reconcile_in(tx.as_mut(), product_id).await;
                (tx, result)
            })
            .await?;

        if !reconciliation.balanced {
            warn!(
                %product_id,
                on_hand = %reconciliation.on_hand,
                movement_sum = %reconciliation.movement_sum,
                "stock ledger out of balance"
            );
        }
        Ok(reconciliation)
    }

    async fn publish(&self, events: Vec<Event>) {
        if let Some(sender) = &self.event_sender {
            sender.send_all(events).await;
        }
    }
}

async fn reconcile_in(
    tx: &mut dyn UnitOfWork,
    product_id: Uuid,
) -> Result<Reconciliation, ServiceError> {
    let product = tx
        .find_product(product_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("product {}", product_id)))?;
    let movement_sum: Decimal = tx
        .movements_for_product(product_id)
        .await?
        .iter()
        .map(|m| m.qty)
        .sum();

    Ok(Reconciliation {
        product_id,
        on_hand: product.qty_on_hand,
        movement_sum,
        balanced: movement_sum == product.qty_on_hand,
    })
}
