use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    db::TransactionCoordinator,
    entities::{
        bom, bom_component,
        product::{self, ProductKind},
    },
    errors::ServiceError,
    repositories::{BomWithComponents, UnitOfWork},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateProductRequest {
    pub sku: String,
    pub name: String,
    pub unit: String,
    pub kind: ProductKind,
    #[serde(default)]
    pub min_qty: Decimal,
    #[serde(default)]
    pub cost_price: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BomComponentInput {
    pub product_id: Uuid,
    pub quantity_per_unit: Decimal,
    pub unit: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateBomRequest {
    pub final_product_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub components: Vec<BomComponentInput>,
}

/// Products and bills of materials. On-hand always starts at zero; stock
/// only arrives through the ledger.
#[derive(Clone)]
pub struct CatalogService {
    coordinator: TransactionCoordinator,
}

impl CatalogService {
    pub fn new(coordinator: TransactionCoordinator) -> Self {
        Self { coordinator }
    }

    #[instrument(skip(self), fields(sku = %request.sku))]
    pub async fn create_product(
        &self,
        request: CreateProductRequest,
    ) -> Result<product::Model, ServiceError> {
        if request.min_qty < Decimal::ZERO || request.cost_price < Decimal::ZERO {
            return Err(ServiceError::InvalidQuantity(
                "minimum quantity and cost price must not be negative".to_string(),
            ));
        }

        let product = self
            .coordinator
            .run_in_transaction("catalog.create_product", move |mut tx| {
                let request = request.clone();
                async move {
                    let result = insert_product(tx.as_mut(), request).await;
                    (tx, result)
                }
            })
            .await?;

        info!(product_id = %product.id, sku = %product.sku, "product created");
        Ok(product)
    }

    #[instrument(skip(self))]
    pub async fn get_product(&self, id: Uuid) -> Result<product::Model, ServiceError> {
        self.coordinator
            .run_in_transaction("catalog.get_product", move |mut tx| async move {
                let result = tx.find_product(id).await.and_then(|found| {
                    found.ok_or_else(|| ServiceError::NotFound(format!("product {}", id)))
                });
                (tx, result)
            })
            .await
    }

    /// Stores a BOM. Zero components is accepted here and rejected when
    /// production starts.
    #[instrument(skip(self), fields(final_product_id = %request.final_product_id))]
    pub async fn create_bom(
        &self,
        request: CreateBomRequest,
    ) -> Result<BomWithComponents, ServiceError> {
        if let Some(component) = request
            .components
            .iter()
            .find(|c| c.quantity_per_unit <= Decimal::ZERO)
        {
            return Err(ServiceError::InvalidQuantity(format!(
                "quantity per unit for component {} must be positive",
                component.product_id
            )));
        }

        let bom = self
            .coordinator
            .run_in_transaction("catalog.create_bom", move |mut tx| {
                let request = request.clone();
                async move {
                    let result = insert_bom(tx.as_mut(), request).await;
                    (tx, result)
                }
            })
            .await?;

        info!(
            bom_id = %bom.bom.id,
            components = bom.components.len(),
            "bill of materials created"
        );
        Ok(bom)
    }

    #[instrument(skip(self))]
    pub async fn get_bom(&self, id: Uuid) -> Result<BomWithComponents, ServiceError> {
        self.coordinator
            .run_in_transaction("catalog.get_bom", move |mut tx| async move {
                let result = tx.load_bom_with_components(id).await.and_then(|found| {
                    found.ok_or_else(|| ServiceError::NotFound(format!("BOM {}", id)))
                });
                (tx, result)
            })
            .await
    }
}

/// Inserts a product with zero on-hand. Shared with purchase item resolution.
pub(crate) async fn insert_product(
    tx: &mut dyn UnitOfWork,
    request: CreateProductRequest,
) -> Result<product::Model, ServiceError> {
    if tx.find_product_by_sku(&request.sku).await?.is_some() {
        return Err(ServiceError::DuplicateReference(format!(
            "SKU {} already exists",
            request.sku
        )));
    }

    let now = Utc::now();
    tx.insert_product(product::Model {
        id: Uuid::new_v4(),
        sku: request.sku,
        name: request.name,
        unit: request.unit,
        kind: request.kind,
        qty_on_hand: Decimal::ZERO,
        min_qty: request.min_qty,
        cost_price: request.cost_price,
        created_at: now,
        updated_at: now,
    })
    .await
}

async fn insert_bom(
    tx: &mut dyn UnitOfWork,
    request: CreateBomRequest,
) -> Result<BomWithComponents, ServiceError> {
    if tx.find_product(request.final_product_id).await?.is_none() {
        return Err(ServiceError::NotFound(format!(
            "product {}",
            request.final_product_id
        )));
    }

    let bom_id = Uuid::new_v4();
    let mut components = Vec::with_capacity(request.components.len());
    for (position, input) in request.components.into_iter().enumerate() {
        if tx.find_product(input.product_id).await?.is_none() {
            return Err(ServiceError::NotFound(format!(
                "component product {}",
                input.product_id
            )));
        }
        components.push(bom_component::Model {
            id: Uuid::new_v4(),
            bom_id,
            position: position as i32,
            product_id: input.product_id,
            quantity_per_unit: input.quantity_per_unit,
            unit: input.unit,
        });
    }

    let now = Utc::now();
    tx.insert_bom_with_components(BomWithComponents {
        bom: bom::Model {
            id: bom_id,
            final_product_id: request.final_product_id,
            name: request.name,
            created_at: now,
            updated_at: now,
        },
        components,
    })
    .await
}
