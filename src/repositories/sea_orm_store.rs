use async_trait::async_trait;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction, DbErr, EntityTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, SqlErr, TransactionTrait,
};
use uuid::Uuid;

use super::{finished_error, BomWithComponents, Store, UnitOfWork};
use crate::entities::{
    bom, bom_component, product, production_order, purchase_item, purchase_order, stock_movement,
};
use crate::errors::ServiceError;

/// PostgreSQL-backed store. `lock_*` issues `SELECT ... FOR UPDATE`.
#[derive(Clone, Debug)]
pub struct SeaOrmStore {
    db: DatabaseConnection,
}

impl SeaOrmStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Store for SeaOrmStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, ServiceError> {
        let txn = self.db.begin().await.map_err(map_db_err)?;
        Ok(Box::new(SeaOrmUnitOfWork { txn: Some(txn) }))
    }
}

/// Translates datastore errors into the service taxonomy. Unique violations
/// become `DuplicateReference`, except a movement sequence collision which,
/// like deadlocks and serialization failures, becomes `ConflictingUpdate` so
/// the coordinator replays the unit.
fn map_db_err(err: DbErr) -> ServiceError {
    if let Some(SqlErr::UniqueConstraintViolation(detail)) = err.sql_err() {
        if detail.contains("idx_stock_movements_sequence")
            || detail.contains("stock_movements.sequence")
        {
            return ServiceError::ConflictingUpdate(detail);
        }
        return ServiceError::DuplicateReference(detail);
    }
    let message = err.to_string();
    if message.contains("deadlock detected") || message.contains("could not serialize access") {
        return ServiceError::ConflictingUpdate(message);
    }
    ServiceError::DatabaseError(err)
}

pub struct SeaOrmUnitOfWork {
    txn: Option<DatabaseTransaction>,
}

impl SeaOrmUnitOfWork {
    fn txn(&self) -> Result<&DatabaseTransaction, ServiceError> {
        self.txn.as_ref().ok_or_else(finished_error)
    }
}

fn product_active(model: product::Model) -> product::ActiveModel {
    product::ActiveModel {
        id: Set(model.id),
        sku: Set(model.sku),
        name: Set(model.name),
        unit: Set(model.unit),
        kind: Set(model.kind),
        qty_on_hand: Set(model.qty_on_hand),
        min_qty: Set(model.min_qty),
        cost_price: Set(model.cost_price),
        created_at: Set(model.created_at),
        updated_at: Set(model.updated_at),
    }
}

fn movement_active(model: stock_movement::Model) -> stock_movement::ActiveModel {
    stock_movement::ActiveModel {
        id: Set(model.id),
        sequence: Set(model.sequence),
        product_id: Set(model.product_id),
        qty: Set(model.qty),
        movement_type: Set(model.movement_type),
        reference: Set(model.reference),
        notes: Set(model.notes),
        occurred_at: Set(model.occurred_at),
        recorded_at: Set(model.recorded_at),
    }
}

fn production_order_active(model: production_order::Model) -> production_order::ActiveModel {
    production_order::ActiveModel {
        id: Set(model.id),
        product_id: Set(model.product_id),
        bom_id: Set(model.bom_id),
        qty_ordered: Set(model.qty_ordered),
        qty_produced: Set(model.qty_produced),
        status: Set(model.status),
        due_date: Set(model.due_date),
        notes: Set(model.notes),
        started_at: Set(model.started_at),
        finished_at: Set(model.finished_at),
        created_at: Set(model.created_at),
        updated_at: Set(model.updated_at),
    }
}

fn purchase_order_active(model: purchase_order::Model) -> purchase_order::ActiveModel {
    purchase_order::ActiveModel {
        id: Set(model.id),
        po_number: Set(model.po_number),
        supplier_id: Set(model.supplier_id),
        supplier_name: Set(model.supplier_name),
        status: Set(model.status),
        total_amount: Set(model.total_amount),
        received_date: Set(model.received_date),
        notes: Set(model.notes),
        created_at: Set(model.created_at),
        updated_at: Set(model.updated_at),
    }
}

fn purchase_item_active(model: purchase_item::Model) -> purchase_item::ActiveModel {
    purchase_item::ActiveModel {
        id: Set(model.id),
        purchase_order_id: Set(model.purchase_order_id),
        position: Set(model.position),
        product_id: Set(model.product_id),
        qty_ordered: Set(model.qty_ordered),
        qty_received: Set(model.qty_received),
        qty_posted: Set(model.qty_posted),
        unit_cost: Set(model.unit_cost),
        line_total: Set(model.line_total),
    }
}

#[async_trait]
impl UnitOfWork for SeaOrmUnitOfWork {
    async fn find_product(&mut self, id: Uuid) -> Result<Option<product::Model>, ServiceError> {
        product::Entity::find_by_id(id)
            .one(self.txn()?)
            .await
            .map_err(map_db_err)
    }

    async fn find_product_by_sku(
        &mut self,
        sku: &str,
    ) -> Result<Option<product::Model>, ServiceError> {
        product::Entity::find()
            .filter(product::Column::Sku.eq(sku))
            .one(self.txn()?)
            .await
            .map_err(map_db_err)
    }

    async fn lock_product(&mut self, id: Uuid) -> Result<Option<product::Model>, ServiceError> {
        product::Entity::find_by_id(id)
            .lock_exclusive()
            .one(self.txn()?)
            .await
            .map_err(map_db_err)
    }

    async fn insert_product(
        &mut self,
        product: product::Model,
    ) -> Result<product::Model, ServiceError> {
        product_active(product)
            .insert(self.txn()?)
            .await
            .map_err(map_db_err)
    }

    async fn update_product(
        &mut self,
        product: product::Model,
    ) -> Result<product::Model, ServiceError> {
        product_active(product)
            .update(self.txn()?)
            .await
            .map_err(map_db_err)
    }

    async fn insert_movement(
        &mut self,
        movement: stock_movement::Model,
    ) -> Result<stock_movement::Model, ServiceError> {
        let txn = self.txn()?;
        let last: Option<i64> = stock_movement::Entity::find()
            .select_only()
            .column_as(stock_movement::Column::Sequence.max(), "last_sequence")
            .into_tuple::<Option<i64>>()
            .one(txn)
            .await
            .map_err(map_db_err)?
            .flatten();

        // two writers reading the same MAX collide on the unique index and retry
        let record = stock_movement::Model {
            sequence: last.unwrap_or(0) + 1,
            ..movement
        };
        stock_movement::Entity::insert(movement_active(record.clone()))
            .exec_without_returning(txn)
            .await
            .map_err(map_db_err)?;
        Ok(record)
    }

    async fn movements_for_product(
        &mut self,
        product_id: Uuid,
    ) -> Result<Vec<stock_movement::Model>, ServiceError> {
        stock_movement::Entity::find()
            .filter(stock_movement::Column::ProductId.eq(product_id))
            .order_by_asc(stock_movement::Column::Sequence)
            .all(self.txn()?)
            .await
            .map_err(map_db_err)
    }

    async fn movements_for_reference(
        &mut self,
        reference: &str,
    ) -> Result<Vec<stock_movement::Model>, ServiceError> {
        stock_movement::Entity::find()
            .filter(stock_movement::Column::Reference.eq(reference))
            .order_by_asc(stock_movement::Column::Sequence)
            .all(self.txn()?)
            .await
            .map_err(map_db_err)
    }

    async fn load_bom_with_components(
        &mut self,
        id: Uuid,
    ) -> Result<Option<BomWithComponents>, ServiceError> {
        let txn = self.txn()?;
        let Some(header) = bom::Entity::find_by_id(id)
            .one(txn)
            .await
            .map_err(map_db_err)?
        else {
            return Ok(None);
        };

        let components = bom_component::Entity::find()
            .filter(bom_component::Column::BomId.eq(id))
            .order_by_asc(bom_component::Column::Position)
            .all(txn)
            .await
            .map_err(map_db_err)?;

        Ok(Some(BomWithComponents {
            bom: header,
            components,
        }))
    }

    async fn insert_bom_with_components(
        &mut self,
        bom: BomWithComponents,
    ) -> Result<BomWithComponents, ServiceError> {
        let txn = self.txn()?;
        let header = bom::ActiveModel {
            id: Set(bom.bom.id),
            final_product_id: Set(bom.bom.final_product_id),
            name: Set(bom.bom.name),
            created_at: Set(bom.bom.created_at),
            updated_at: Set(bom.bom.updated_at),
        }
        .insert(txn)
        .await
        .map_err(map_db_err)?;

        let mut components = Vec::with_capacity(bom.components.len());
        for component in bom.components {
            let saved = bom_component::ActiveModel {
                id: Set(component.id),
                bom_id: Set(header.id),
                position: Set(component.position),
                product_id: Set(component.product_id),
                quantity_per_unit: Set(component.quantity_per_unit),
                unit: Set(component.unit),
            }
            .insert(txn)
            .await
            .map_err(map_db_err)?;
            components.push(saved);
        }
        components.sort_by_key(|c| c.position);

        Ok(BomWithComponents {
            bom: header,
            components,
        })
    }

    async fn find_production_order(
        &mut self,
        id: Uuid,
    ) -> Result<Option<production_order::Model>, ServiceError> {
        production_order::Entity::find_by_id(id)
            .one(self.txn()?)
            .await
            .map_err(map_db_err)
    }

    async fn lock_production_order(
        &mut self,
        id: Uuid,
    ) -> Result<Option<production_order::Model>, ServiceError> {
        production_order::Entity::find_by_id(id)
            .lock_exclusive()
            .one(self.txn()?)
            .await
            .map_err(map_db_err)
    }

    async fn insert_production_order(
        &mut self,
        order: production_order::Model,
    ) -> Result<production_order::Model, ServiceError> {
        production_order_active(order)
            .insert(self.txn()?)
            .await
            .map_err(map_db_err)
    }

    async fn update_production_order(
        &mut self,
        order: production_order::Model,
    ) -> Result<production_order::Model, ServiceError> {
        production_order_active(order)
            .update(self.txn()?)
            .await
            .map_err(map_db_err)
    }

    async fn find_purchase_order(
        &mut self,
        id: Uuid,
    ) -> Result<Option<purchase_order::Model>, ServiceError> {
        purchase_order::Entity::find_by_id(id)
            .one(self.txn()?)
            .await
            .map_err(map_db_err)
    }

    async fn lock_purchase_order(
        &mut self,
        id: Uuid,
    ) -> Result<Option<purchase_order::Model>, ServiceError> {
        purchase_order::Entity::find_by_id(id)
            .lock_exclusive()
            .one(self.txn()?)
            .await
            .map_err(map_db_err)
    }

    async fn find_purchase_order_by_number(
        &mut self,
        po_number: &str,
    ) -> Result<Option<purchase_order::Model>, ServiceError> {
        purchase_order::Entity::find()
            .filter(purchase_order::Column::PoNumber.eq(po_number))
            .one(self.txn()?)
            .await
            .map_err(map_db_err)
    }

    async fn insert_purchase_order(
        &mut self,
        order: purchase_order::Model,
    ) -> Result<purchase_order::Model, ServiceError> {
        purchase_order_active(order)
            .insert(self.txn()?)
            .await
            .map_err(map_db_err)
    }

    async fn update_purchase_order(
        &mut self,
        order: purchase_order::Model,
    ) -> Result<purchase_order::Model, ServiceError> {
        purchase_order_active(order)
            .update(self.txn()?)
            .await
            .map_err(map_db_err)
    }

    async fn delete_purchase_order(&mut self, id: Uuid) -> Result<(), ServiceError> {
        let txn = self.txn()?;
        purchase_item::Entity::delete_many()
            .filter(purchase_item::Column::PurchaseOrderId.eq(id))
            .exec(txn)
            .await
            .map_err(map_db_err)?;

        let result = purchase_order::Entity::delete_by_id(id)
            .exec(txn)
            .await
            .map_err(map_db_err)?;
        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!("purchase order {}", id)));
        }
        Ok(())
    }

    async fn purchase_items(
        &mut self,
        order_id: Uuid,
    ) -> Result<Vec<purchase_item::Model>, ServiceError> {
        purchase_item::Entity::find()
            .filter(purchase_item::Column::PurchaseOrderId.eq(order_id))
            .order_by_asc(purchase_item::Column::Position)
            .all(self.txn()?)
            .await
            .map_err(map_db_err)
    }

    async fn replace_purchase_items(
        &mut self,
        order_id: Uuid,
        items: Vec<purchase_item::Model>,
    ) -> Result<Vec<purchase_item::Model>, ServiceError> {
        let txn = self.txn()?;
        purchase_item::Entity::delete_many()
            .filter(purchase_item::Column::PurchaseOrderId.eq(order_id))
            .exec(txn)
            .await
            .map_err(map_db_err)?;

        let mut saved = Vec::with_capacity(items.len());
        for item in items {
            saved.push(
                purchase_item_active(item)
                    .insert(txn)
                    .await
                    .map_err(map_db_err)?,
            );
        }
        Ok(saved)
    }

    async fn commit(&mut self) -> Result<(), ServiceError> {
        let txn = self.txn.take().ok_or_else(finished_error)?;
        txn.commit().await.map_err(map_db_err)
    }

    async fn rollback(&mut self) -> Result<(), ServiceError> {
        let txn = self.txn.take().ok_or_else(finished_error)?;
        txn.rollback().await.map_err(map_db_err)
    }
}
