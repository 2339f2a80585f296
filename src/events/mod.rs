use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::entities::production_order::ProductionStatus;
use crate::entities::purchase_order::PurchaseStatus;
use crate::entities::stock_movement::MovementType;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Publishes events after a commit. Delivery failures are logged and dropped.
    pub async fn send_all(&self, events: Vec<Event>) {
        for event in events {
            if let Err(e) = self.send(event).await {
                warn!(error = %e, "domain event dropped");
            }
        }
    }
}

/// Domain events published once the transaction that produced them has committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    ProductionOrderStarted {
        order_id: Uuid,
        product_id: Uuid,
        qty_ordered: Decimal,
    },
    ProductionOrderCompleted {
        order_id: Uuid,
        product_id: Uuid,
        qty_produced: Decimal,
    },
    ProductionOrderReverted {
        order_id: Uuid,
    },
    ProductionOrderCancelled {
        order_id: Uuid,
        previous_status: ProductionStatus,
    },
    PurchaseOrderReceived {
        order_id: Uuid,
        po_number: String,
        status: PurchaseStatus,
        lines_posted: usize,
    },
    StockMovementRecorded {
        movement_id: Uuid,
        product_id: Uuid,
        qty: Decimal,
        movement_type: MovementType,
        reference: String,
    },
    LowStockDetected {
        product_id: Uuid,
        sku: String,
        qty_on_hand: Decimal,
        min_qty: Decimal,
    },
}

/// Drains the event channel until every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match event {
            Event::LowStockDetected {
                product_id,
                sku,
                qty_on_hand,
                min_qty,
            } => {
                warn!(
                    %product_id,
                    sku = %sku,
                    %qty_on_hand,
                    %min_qty,
                    "product at or below reorder threshold"
                );
            }
            Event::StockMovementRecorded {
                movement_id,
                product_id,
                qty,
                movement_type,
                reference,
            } => {
                info!(
                    %movement_id,
                    %product_id,
                    %qty,
                    movement_type = %movement_type,
                    reference = %reference,
                    "stock movement recorded"
                );
            }
            other => info!(event = ?other, "domain event"),
        }
    }

    info!("Event processing loop stopped");
}
