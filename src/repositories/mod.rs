use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::{
    bom, bom_component, product, production_order, purchase_item, purchase_order, stock_movement,
};
use crate::errors::ServiceError;

pub mod memory;
pub mod sea_orm_store;

pub use memory::MemoryStore;
pub use sea_orm_store::SeaOrmStore;

/// A BOM header together with its components in position order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BomWithComponents {
    pub bom: bom::Model,
    pub components: Vec<bom_component::Model>,
}

/// Opens units of work against a backing datastore.
#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, ServiceError>;
}

/// One transaction. Lookups return detached value objects; nothing is
/// written until `commit`. Dropping an uncommitted unit discards it.
///
/// `lock_*` reads a row for update: concurrent units that lock the same row
/// are serialised (row locks) or fail at commit with `ConflictingUpdate`
/// (compare-and-swap), depending on the store.
#[async_trait]
pub trait UnitOfWork: Send {
    async fn find_product(&mut self, id: Uuid) -> Result<Option<product::Model>, ServiceError>;
    async fn find_product_by_sku(
        &mut self,
        sku: &str,
    ) -> Result<Option<product::Model>, ServiceError>;
    async fn lock_product(&mut self, id: Uuid) -> Result<Option<product::Model>, ServiceError>;
    async fn insert_product(
        &mut self,
        product: product::Model,
    ) -> Result<product::Model, ServiceError>;
    async fn update_product(
        &mut self,
        product: product::Model,
    ) -> Result<product::Model, ServiceError>;

    /// Appends a movement. The store assigns `sequence`.
    async fn insert_movement(
        &mut self,
        movement: stock_movement::Model,
    ) -> Result<stock_movement::Model, ServiceError>;
    /// Movements of one product in recording order.
    async fn movements_for_product(
        &mut self,
        product_id: Uuid,
    ) -> Result<Vec<stock_movement::Model>, ServiceError>;
    async fn movements_for_reference(
        &mut self,
        reference: &str,
    ) -> Result<Vec<stock_movement::Model>, ServiceError>;

    async fn load_bom_with_components(
        &mut self,
        id: Uuid,
    ) -> Result<Option<BomWithComponents>, ServiceError>;
    async fn insert_bom_with_components(
        &mut self,
        bom: BomWithComponents,
    ) -> Result<BomWithComponents, ServiceError>;

    async fn find_production_order(
        &mut self,
        id: Uuid,
    ) -> Result<Option<production_order::Model>, ServiceError>;
    async fn lock_production_order(
        &mut self,
        id: Uuid,
    ) -> Result<Option<production_order::Model>, ServiceError>;
    async fn insert_production_order(
        &mut self,
        order: production_order::Model,
    ) -> Result<production_order::Model, ServiceError>;
    async fn update_production_order(
        &mut self,
        order: production_order::Model,
    ) -> Result<production_order::Model, ServiceError>;

    async fn find_purchase_order(
        &mut self,
        id: Uuid,
    ) -> Result<Option<purchase_order::Model>, ServiceError>;
    async fn lock_purchase_order(
        &mut self,
        id: Uuid,
    ) -> Result<Option<purchase_order::Model>, ServiceError>;
    async fn find_purchase_order_by_number(
        &mut self,
        po_number: &str,
    ) -> Result<Option<purchase_order::Model>, ServiceError>;
    async fn insert_purchase_order(
        &mut self,
        order: purchase_order::Model,
    ) -> Result<purchase_order::Model, ServiceError>;
    async fn update_purchase_order(
        &mut self,
        order: purchase_order::Model,
    ) -> Result<purchase_order::Model, ServiceError>;
    /// Removes the order and its items.
    async fn delete_purchase_order(&mut self, id: Uuid) -> Result<(), ServiceError>;
    /// Items of one order in position order.
    async fn purchase_items(
        &mut self,
        order_id: Uuid,
    ) -> Result<Vec<purchase_item::Model>, ServiceError>;
    /// Deletes every item of the order, then inserts `items`.
    async fn replace_purchase_items(
        &mut self,
        order_id: Uuid,
        items: Vec<purchase_item::Model>,
    ) -> Result<Vec<purchase_item::Model>, ServiceError>;

    async fn commit(&mut self) -> Result<(), ServiceError>;
    async fn rollback(&mut self) -> Result<(), ServiceError>;
}

pub(crate) fn finished_error() -> ServiceError {
    ServiceError::InternalError("unit of work already committed or rolled back".to_string())
}
