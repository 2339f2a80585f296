use chrono::{DateTime, NaiveDate, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::{
    db::TransactionCoordinator,
    entities::{
        production_order::{self, ProductionStatus},
        stock_movement::MovementType,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    repositories::UnitOfWork,
    services::{
        bom::explode,
        stock_ledger::{MovementRequest, PostedBatch, StockLedger},
    },
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateProductionOrderRequest {
    pub product_id: Uuid,
    #[serde(default)]
    pub bom_id: Option<Uuid>,
    pub qty_ordered: Decimal,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Target status plus the optional fields a transition may carry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionProductionOrderRequest {
    pub status: ProductionStatus,
    /// Only read when entering DONE; defaults to `qty_ordered`.
    #[serde(default)]
    pub qty_produced: Option<Decimal>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
}

impl TransitionProductionOrderRequest {
    pub fn to(status: ProductionStatus) -> Self {
        Self {
            status,
            qty_produced: None,
            notes: None,
            due_date: None,
        }
    }

    pub fn with_qty_produced(mut self, qty: Decimal) -> Self {
        self.qty_produced = Some(qty);
        self
    }
}

struct Transition {
    order: production_order::Model,
    posted: PostedBatch,
    events: Vec<Event>,
}

/// Drives production orders through PLANNED, IN_PROGRESS, DONE and CANCELLED.
#[derive(Clone)]
pub struct ProductionService {
    coordinator: TransactionCoordinator,
    ledger: StockLedger,
    event_sender: Option<EventSender>,
    reverse_materials_on_cancel: bool,
}

impl ProductionService {
    pub fn new(
        coordinator: TransactionCoordinator,
        ledger: StockLedger,
        event_sender: Option<EventSender>,
        reverse_materials_on_cancel: bool,
    ) -> Self {
        Self {
            coordinator,
            ledger,
            event_sender,
            reverse_materials_on_cancel,
        }
    }

    /// Creates an order in PLANNED with nothing produced yet.
    #[instrument(skip(self), fields(product_id = %request.product_id))]
    pub async fn create_production_order(
        &self,
        request: CreateProductionOrderRequest,
    ) -> Result<production_order::Model, ServiceError> {
        if request.qty_ordered <= Decimal::ZERO {
            return Err(ServiceError::InvalidQuantity(format!(
                "ordered quantity must be positive, got {}",
                request.qty_ordered
            )));
        }

        let order = self
            .coordinator
            .run_in_transaction("production.create", move |mut tx| {
                let request = request.clone();
                async move {
                    let result = insert_order(tx.as_mut(), request).await;
                    (tx, result)
                }
            })
            .await?;

        counter!("production.orders.created", 1);
        info!(order_id = %order.id, "production order created");
        Ok(order)
    }

    #[instrument(skip(self))]
    pub async fn get_production_order(
        &self,
        id: Uuid,
    ) -> Result<production_order::Model, ServiceError> {
        self.coordinator
            .run_in_transaction("production.get", move |mut tx| async move {
                let result = tx.find_production_order(id).await.and_then(|found| {
                    found.ok_or_else(|| ServiceError::NotFound(format!("production order {}", id)))
                });
                (tx, result)
            })
            .await
    }

    /// Moves an order to `request.status`, applying the matching ledger effects
    /// in the same transaction as the status change.
    #[instrument(skip(self), fields(target = %request.status))]
    pub async fn transition_production_order(
        &self,
        id: Uuid,
        request: TransitionProductionOrderRequest,
    ) -> Result<production_order::Model, ServiceError> {
        let now = Utc::now();
        let outcome = self
            .coordinator
            .run_in_transaction("production.transition", move |mut tx| {
                let request = request.clone();
                async move {
                    let result = self.transition_in(tx.as_mut(), id, &request, now).await;
                    (tx, result)
                }
            })
            .await;

        let transition = match outcome {
            Ok(transition) => transition,
            Err(err) => {
                if !err.status_code().is_server_error() {
                    warn!(order_id = %id, error = %err, "production order transition rejected");
                }
                return Err(err);
            }
        };

        let Transition {
            order,
            posted,
            events,
        } = transition;

        counter!("production.orders.transitions", 1, "to" => order.status.to_string());
        info!(
            order_id = %order.id,
            status = %order.status,
            movements = posted.movements.len(),
            "production order transition committed"
        );

        if let Some(sender) = &self.event_sender {
            let mut all = events;
            all.extend(posted.events());
            sender.send_all(all).await;
        }

        Ok(order)
    }

    async fn transition_in(
        &self,
        tx: &mut dyn UnitOfWork,
        id: Uuid,
        request: &TransitionProductionOrderRequest,
        now: DateTime<Utc>,
    ) -> Result<Transition, ServiceError> {
        let current = tx
            .lock_production_order(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("production order {}", id)))?;

        let from = current.status;
        let to = request.status;
        let mut order = current;
        if let Some(notes) = &request.notes {
            order.notes = Some(notes.clone());
        }
        if let Some(due_date) = request.due_date {
            order.due_date = Some(due_date);
        }

        let mut posted = PostedBatch::default();
        let mut events = Vec::new();

        use ProductionStatus::*;
        match (from, to) {
            (from, to) if from == to => {
                debug!(order_id = %id, status = %from, "field update without status change");
            }
            (Planned, InProgress) => {
                posted.merge(self.consume_materials(tx, &order, now).await?);
                order.started_at = Some(now);
                events.push(started(&order));
            }
            (InProgress, Done) => {
                let qty = produced_qty(request, &order)?;
                posted.merge(self.credit_output(tx, &order, qty, now).await?);
                order.qty_produced = qty;
                order.finished_at = Some(now);
                events.push(completed(&order));
            }
            (Planned, Done) => {
                let qty = produced_qty(request, &order)?;
                posted.merge(self.consume_materials(tx, &order, now).await?);
                posted.merge(self.credit_output(tx, &order, qty, now).await?);
                order.qty_produced = qty;
                order.started_at = Some(now);
                order.finished_at = Some(now);
                events.push(started(&order));
                events.push(completed(&order));
            }
            (InProgress, Planned) => {
                posted.merge(self.reverse_materials(tx, &order, now).await?);
                order.started_at = None;
                events.push(Event::ProductionOrderReverted { order_id: order.id });
            }
            (Planned, Cancelled) | (Done, Cancelled) => {
                events.push(Event::ProductionOrderCancelled {
                    order_id: order.id,
                    previous_status: from,
                });
            }
            (InProgress, Cancelled) => {
                if self.reverse_materials_on_cancel {
                    posted.merge(self.reverse_materials(tx, &order, now).await?);
                }
                events.push(Event::ProductionOrderCancelled {
                    order_id: order.id,
                    previous_status: from,
                });
            }
            (from, to) => {
                return Err(ServiceError::InvalidState(format!(
                    "production order {} cannot move from {} to {}",
                    id, from, to
                )));
            }
        }

        order.status = to;
        order.updated_at = now;
        let order = tx.update_production_order(order).await?;

        Ok(Transition {
            order,
            posted,
            events,
        })
    }

    /// Deducts every exploded component in one all-or-nothing batch.
    async fn consume_materials(
        &self,
        tx: &mut dyn UnitOfWork,
        order: &production_order::Model,
        now: DateTime<Utc>,
    ) -> Result<PostedBatch, ServiceError> {
        let bom = match order.bom_id {
            Some(bom_id) => Some(tx.load_bom_with_components(bom_id).await?.ok_or_else(|| {
                ServiceError::InvalidBom(format!("bill of materials {} no longer exists", bom_id))
            })?),
            None => None,
        };

        let reference = order.reference();
        let lines: Vec<MovementRequest> = explode(bom.as_ref(), order.qty_ordered)?
            .into_iter()
            .map(|requirement| {
                MovementRequest::new(
                    requirement.product_id,
                    -requirement.required_qty,
                    MovementType::ProductionRawOut,
                    reference.clone(),
                )
                .with_notes(format!("Consumed for production order {}", reference))
            })
            .collect();

        self.ledger.post_batch(tx, &lines, now).await
    }

    /// Credits back what the ledger says this order consumed and has not
    /// yet been returned, per product.
    async fn reverse_materials(
        &self,
        tx: &mut dyn UnitOfWork,
        order: &production_order::Model,
        now: DateTime<Utc>,
    ) -> Result<PostedBatch, ServiceError> {
        let reference = order.reference();
        let mut consumed: BTreeMap<Uuid, Decimal> = BTreeMap::new();
        for movement in tx.movements_for_reference(&reference).await? {
            if matches!(
                movement.movement_type,
                MovementType::ProductionRawOut | MovementType::ProductionRawReversal
            ) {
                *consumed.entry(movement.product_id).or_default() += movement.qty;
            }
        }

        let lines: Vec<MovementRequest> = consumed
            .into_iter()
            .filter(|(_, net)| *net < Decimal::ZERO)
            .map(|(product_id, net)| {
                MovementRequest::new(
                    product_id,
                    -net,
                    MovementType::ProductionRawReversal,
                    reference.clone(),
                )
                .with_notes(format!("Reversed for production order {}", reference))
            })
            .collect();

        if lines.is_empty() {
            debug!(order_id = %order.id, "no consumed materials to reverse");
            return Ok(PostedBatch::default());
        }
        self.ledger.post_batch(tx, &lines, now).await
    }

    async fn credit_output(
        &self,
        tx: &mut dyn UnitOfWork,
        order: &production_order::Model,
        qty: Decimal,
        now: DateTime<Utc>,
    ) -> Result<PostedBatch, ServiceError> {
        let reference = order.reference();
        let line = MovementRequest::new(
            order.product_id,
            qty,
            MovementType::ProductionFgIn,
            reference.clone(),
        )
        .with_notes(format!("Produced by production order {}", reference));
        self.ledger.post_batch(tx, &[line], now).await
    }
}

async fn insert_order(
    tx: &mut dyn UnitOfWork,
    request: CreateProductionOrderRequest,
) -> Result<production_order::Model, ServiceError> {
    if tx.find_product(request.product_id).await?.is_none() {
        return Err(ServiceError::NotFound(format!(
            "product {}",
            request.product_id
        )));
    }

    if let Some(bom_id) = request.bom_id {
        let bom = tx
            .load_bom_with_components(bom_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("BOM {}", bom_id)))?;
        if bom.bom.final_product_id != request.product_id {
            return Err(ServiceError::InvalidBom(format!(
                "bill of materials '{}' produces {} not {}",
                bom.bom.name, bom.bom.final_product_id, request.product_id
            )));
        }
    }

    let now = Utc::now();
    tx.insert_production_order(production_order::Model {
        id: Uuid::new_v4(),
        product_id: request.product_id,
        bom_id: request.bom_id,
        qty_ordered: request.qty_ordered,
        qty_produced: Decimal::ZERO,
        status: ProductionStatus::Planned,
        due_date: request.due_date,
        notes: request.notes,
        started_at: None,
        finished_at: None,
        created_at: now,
        updated_at: now,
    })
    .await
}

fn produced_qty(
    request: &TransitionProductionOrderRequest,
    order: &production_order::Model,
) -> Result<Decimal, ServiceError> {
    let qty = request.qty_produced.unwrap_or(order.qty_ordered);
    if qty <= Decimal::ZERO {
        return Err(ServiceError::InvalidQuantity(format!(
            "produced quantity must be positive, got {}",
            qty
        )));
    }
    Ok(qty)
}

fn started(order: &production_order::Model) -> Event {
    Event::ProductionOrderStarted {
        order_id: order.id,
        product_id: order.product_id,
        qty_ordered: order.qty_ordered,
    }
}

fn completed(order: &production_order::Model) -> Event {
    Event::ProductionOrderCompleted {
        order_id: order.id,
        product_id: order.product_id,
        qty_produced: order.qty_produced,
    }
}
