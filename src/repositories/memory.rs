//! In-memory store with optimistic concurrency.
//!
//! Every committed row carries a version. A unit of work stages its writes
//! locally and remembers the version of each row it locked; `commit` takes
//! the store-wide mutex, checks those versions are unchanged and only then
//! applies the staged writes. A mismatch fails the commit with
//! `ConflictingUpdate`, which the transaction coordinator replays.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use super::{finished_error, BomWithComponents, Store, UnitOfWork};
use crate::entities::{
    product, production_order, purchase_item, purchase_order, stock_movement,
};
use crate::errors::ServiceError;

#[derive(Clone, Debug)]
struct Row<T> {
    value: T,
    version: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum RowKey {
    Product(Uuid),
    ProductionOrder(Uuid),
    PurchaseOrder(Uuid),
}

#[derive(Default)]
struct MemoryState {
    products: HashMap<Uuid, Row<product::Model>>,
    boms: HashMap<Uuid, BomWithComponents>,
    production_orders: HashMap<Uuid, Row<production_order::Model>>,
    purchase_orders: HashMap<Uuid, Row<purchase_order::Model>>,
    purchase_items: HashMap<Uuid, Vec<purchase_item::Model>>,
    movements: Vec<stock_movement::Model>,
    next_sequence: i64,
}

impl MemoryState {
    fn version(&self, key: RowKey) -> Option<u64> {
        match key {
            RowKey::Product(id) => self.products.get(&id).map(|r| r.version),
            RowKey::ProductionOrder(id) => self.production_orders.get(&id).map(|r| r.version),
            RowKey::PurchaseOrder(id) => self.purchase_orders.get(&id).map(|r| r.version),
        }
    }
}

fn upsert<T>(table: &mut HashMap<Uuid, Row<T>>, id: Uuid, value: T) {
    let version = table.get(&id).map_or(0, |row| row.version) + 1;
    table.insert(id, Row { value, version });
}

/// Shared in-memory datastore. Clones share the same state.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, ServiceError> {
        Ok(Box::new(MemoryUnitOfWork {
            state: Arc::clone(&self.state),
            staged: Staged::default(),
            finished: false,
        }))
    }
}

#[derive(Default)]
struct Staged {
    products: HashMap<Uuid, product::Model>,
    inserted_products: HashSet<Uuid>,
    boms: HashMap<Uuid, BomWithComponents>,
    production_orders: HashMap<Uuid, production_order::Model>,
    inserted_production_orders: HashSet<Uuid>,
    /// `None` marks a deletion.
    purchase_orders: HashMap<Uuid, Option<purchase_order::Model>>,
    inserted_purchase_orders: HashSet<Uuid>,
    purchase_items: HashMap<Uuid, Vec<purchase_item::Model>>,
    movements: Vec<stock_movement::Model>,
    observed: HashMap<RowKey, u64>,
}

pub struct MemoryUnitOfWork {
    state: Arc<Mutex<MemoryState>>,
    staged: Staged,
    finished: bool,
}

impl MemoryUnitOfWork {
    fn ensure_open(&self) -> Result<(), ServiceError> {
        if self.finished {
            Err(finished_error())
        } else {
            Ok(())
        }
    }

    /// Records the committed version of a row the first time this unit touches it.
    async fn observe(&mut self, key: RowKey) -> bool {
        if self.staged.observed.contains_key(&key) {
            return true;
        }
        let state = self.state.lock().await;
        match state.version(key) {
            Some(version) => {
                self.staged.observed.insert(key, version);
                true
            }
            None => false,
        }
    }

    fn purchase_number_taken(
        &self,
        state: &MemoryState,
        po_number: &str,
        except: Uuid,
    ) -> bool {
        let staged_hit = self.staged.purchase_orders.values().flatten().any(|o| {
            o.po_number == po_number && o.id != except
        });
        let committed_hit = state.purchase_orders.values().any(|row| {
            row.value.po_number == po_number
                && row.value.id != except
                && !self.staged.purchase_orders.contains_key(&row.value.id)
        });
        staged_hit || committed_hit
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn find_product(&mut self, id: Uuid) -> Result<Option<product::Model>, ServiceError> {
        self.ensure_open()?;
        if let Some(product) = self.staged.products.get(&id) {
            return Ok(Some(product.clone()));
        }
        let state = self.state.lock().await;
        Ok(state.products.get(&id).map(|row| row.value.clone()))
    }

    async fn find_product_by_sku(
        &mut self,
        sku: &str,
    ) -> Result<Option<product::Model>, ServiceError> {
        self.ensure_open()?;
        if let Some(product) = self.staged.products.values().find(|p| p.sku == sku) {
            return Ok(Some(product.clone()));
        }
        let state = self.state.lock().await;
        Ok(state
            .products
            .values()
            .find(|row| row.value.sku == sku)
            .map(|row| row.value.clone()))
    }

    async fn lock_product(&mut self, id: Uuid) -> Result<Option<product::Model>, ServiceError> {
        self.ensure_open()?;
        if let Some(product) = self.staged.products.get(&id) {
            return Ok(Some(product.clone()));
        }
        let state = self.state.lock().await;
        Ok(state.products.get(&id).map(|row| {
            self.staged
                .observed
                .entry(RowKey::Product(id))
                .or_insert(row.version);
            row.value.clone()
        }))
    }

    async fn insert_product(
        &mut self,
        product: product::Model,
    ) -> Result<product::Model, ServiceError> {
        self.ensure_open()?;
        let state = self.state.lock().await;
        let sku_taken = state.products.values().any(|row| row.value.sku == product.sku)
            || self.staged.products.values().any(|p| p.sku == product.sku);
        if sku_taken {
            return Err(ServiceError::DuplicateReference(format!(
                "SKU {} already exists",
                product.sku
            )));
        }
        if state.products.contains_key(&product.id) || self.staged.products.contains_key(&product.id)
        {
            return Err(ServiceError::DuplicateReference(format!(
                "product {} already exists",
                product.id
            )));
        }
        drop(state);
        self.staged.inserted_products.insert(product.id);
        self.staged.products.insert(product.id, product.clone());
        Ok(product)
    }

    async fn update_product(
        &mut self,
        product: product::Model,
    ) -> Result<product::Model, ServiceError> {
        self.ensure_open()?;
        let known = self.staged.inserted_products.contains(&product.id)
            || self.observe(RowKey::Product(product.id)).await;
        if !known {
            return Err(ServiceError::NotFound(format!("product {}", product.id)));
        }
        self.staged.products.insert(product.id, product.clone());
        Ok(product)
    }

    async fn insert_movement(
        &mut self,
        movement: stock_movement::Model,
    ) -> Result<stock_movement::Model, ServiceError> {
        self.ensure_open()?;
        self.staged.movements.push(movement.clone());
        Ok(movement)
    }

    async fn movements_for_product(
        &mut self,
        product_id: Uuid,
    ) -> Result<Vec<stock_movement::Model>, ServiceError> {
        self.ensure_open()?;
        let state = self.state.lock().await;
        Ok(state
            .movements
            .iter()
            .chain(self.staged.movements.iter())
            .filter(|m| m.product_id == product_id)
            .cloned()
            .collect())
    }

    async fn movements_for_reference(
        &mut self,
        reference: &str,
    ) -> Result<Vec<stock_movement::Model>, ServiceError> {
        self.ensure_open()?;
        let state = self.state.lock().await;
        Ok(state
            .movements
            .iter()
            .chain(self.staged.movements.iter())
            .filter(|m| m.reference == reference)
            .cloned()
            .collect())
    }

    async fn load_bom_with_components(
        &mut self,
        id: Uuid,
    ) -> Result<Option<BomWithComponents>, ServiceError> {
        self.ensure_open()?;
        if let Some(bom) = self.staged.boms.get(&id) {
            return Ok(Some(bom.clone()));
        }
        let state = self.state.lock().await;
        Ok(state.boms.get(&id).cloned())
    }

    async fn insert_bom_with_components(
        &mut self,
        mut bom: BomWithComponents,
    ) -> Result<BomWithComponents, ServiceError> {
        self.ensure_open()?;
        let state = self.state.lock().await;
        if state.boms.contains_key(&bom.bom.id) || self.staged.boms.contains_key(&bom.bom.id) {
            return Err(ServiceError::DuplicateReference(format!(
                "BOM {} already exists",
                bom.bom.id
            )));
        }
        drop(state);
        bom.components.sort_by_key(|c| c.position);
        self.staged.boms.insert(bom.bom.id, bom.clone());
        Ok(bom)
    }

    async fn find_production_order(
        &mut self,
        id: Uuid,
    ) -> Result<Option<production_order::Model>, ServiceError> {
        self.ensure_open()?;
        if let Some(order) = self.staged.production_orders.get(&id) {
            return Ok(Some(order.clone()));
        }
        let state = self.state.lock().await;
        Ok(state.production_orders.get(&id).map(|row| row.value.clone()))
    }

    async fn lock_production_order(
        &mut self,
        id: Uuid,
    ) -> Result<Option<production_order::Model>, ServiceError> {
        self.ensure_open()?;
        if let Some(order) = self.staged.production_orders.get(&id) {
            return Ok(Some(order.clone()));
        }
        let state = self.state.lock().await;
        Ok(state.production_orders.get(&id).map(|row| {
            self.staged
                .observed
                .entry(RowKey::ProductionOrder(id))
                .or_insert(row.version);
            row.value.clone()
        }))
    }

    async fn insert_production_order(
        &mut self,
        order: production_order::Model,
    ) -> Result<production_order::Model, ServiceError> {
        self.ensure_open()?;
        let state = self.state.lock().await;
        if state.production_orders.contains_key(&order.id)
            || self.staged.production_orders.contains_key(&order.id)
        {
            return Err(ServiceError::DuplicateReference(format!(
                "production order {} already exists",
                order.id
            )));
        }
        drop(state);
        self.staged.inserted_production_orders.insert(order.id);
        self.staged.production_orders.insert(order.id, order.clone());
        Ok(order)
    }

    async fn update_production_order(
        &mut self,
        order: production_order::Model,
    ) -> Result<production_order::Model, ServiceError> {
        self.ensure_open()?;
        let known = self.staged.inserted_production_orders.contains(&order.id)
            || self.observe(RowKey::ProductionOrder(order.id)).await;
        if !known {
            return Err(ServiceError::NotFound(format!(
                "production order {}",
                order.id
            )));
        }
        self.staged.production_orders.insert(order.id, order.clone());
        Ok(order)
    }

    async fn find_purchase_order(
        &mut self,
        id: Uuid,
    ) -> Result<Option<purchase_order::Model>, ServiceError> {
        self.ensure_open()?;
        if let Some(staged) = self.staged.purchase_orders.get(&id) {
            return Ok(staged.clone());
        }
        let state = self.state.lock().await;
        Ok(state.purchase_orders.get(&id).map(|row| row.value.clone()))
    }

    async fn lock_purchase_order(
        &mut self,
        id: Uuid,
    ) -> Result<Option<purchase_order::Model>, ServiceError> {
        self.ensure_open()?;
        if let Some(staged) = self.staged.purchase_orders.get(&id) {
            return Ok(staged.clone());
        }
        let state = self.state.lock().await;
        Ok(state.purchase_orders.get(&id).map(|row| {
            self.staged
                .observed
                .entry(RowKey::PurchaseOrder(id))
                .or_insert(row.version);
            row.value.clone()
        }))
    }

    async fn find_purchase_order_by_number(
        &mut self,
        po_number: &str,
    ) -> Result<Option<purchase_order::Model>, ServiceError> {
        self.ensure_open()?;
        if let Some(order) = self
            .staged
            .purchase_orders
            .values()
            .flatten()
            .find(|o| o.po_number == po_number)
        {
            return Ok(Some(order.clone()));
        }
        let state = self.state.lock().await;
        Ok(state
            .purchase_orders
            .values()
            .filter(|row| !self.staged.purchase_orders.contains_key(&row.value.id))
            .find(|row| row.value.po_number == po_number)
            .map(|row| row.value.clone()))
    }

    async fn insert_purchase_order(
        &mut self,
        order: purchase_order::Model,
    ) -> Result<purchase_order::Model, ServiceError> {
        self.ensure_open()?;
        let state = self.state.lock().await;
        if self.purchase_number_taken(&state, &order.po_number, order.id) {
            return Err(ServiceError::DuplicateReference(format!(
                "purchase order number {} already exists",
                order.po_number
            )));
        }
        if state.purchase_orders.contains_key(&order.id) {
            return Err(ServiceError::DuplicateReference(format!(
                "purchase order {} already exists",
                order.id
            )));
        }
        drop(state);
        self.staged.inserted_purchase_orders.insert(order.id);
        self.staged
            .purchase_orders
            .insert(order.id, Some(order.clone()));
        Ok(order)
    }

    async fn update_purchase_order(
        &mut self,
        order: purchase_order::Model,
    ) -> Result<purchase_order::Model, ServiceError> {
        self.ensure_open()?;
        let known = self.staged.inserted_purchase_orders.contains(&order.id)
            || self.observe(RowKey::PurchaseOrder(order.id)).await;
        if !known || matches!(self.staged.purchase_orders.get(&order.id), Some(None)) {
            return Err(ServiceError::NotFound(format!("purchase order {}", order.id)));
        }
        self.staged
            .purchase_orders
            .insert(order.id, Some(order.clone()));
        Ok(order)
    }

    async fn delete_purchase_order(&mut self, id: Uuid) -> Result<(), ServiceError> {
        self.ensure_open()?;
        let known = self.staged.inserted_purchase_orders.contains(&id)
            || self.observe(RowKey::PurchaseOrder(id)).await;
        if !known {
            return Err(ServiceError::NotFound(format!("purchase order {}", id)));
        }
        self.staged.purchase_orders.insert(id, None);
        self.staged.purchase_items.insert(id, Vec::new());
        Ok(())
    }

    async fn purchase_items(
        &mut self,
        order_id: Uuid,
    ) -> Result<Vec<purchase_item::Model>, ServiceError> {
        self.ensure_open()?;
        let mut items = match self.staged.purchase_items.get(&order_id) {
            Some(items) => items.clone(),
            None => {
                let state = self.state.lock().await;
                state
                    .purchase_items
                    .get(&order_id)
                    .cloned()
                    .unwrap_or_default()
            }
        };
        items.sort_by_key(|item| item.position);
        Ok(items)
    }

    async fn replace_purchase_items(
        &mut self,
        order_id: Uuid,
        items: Vec<purchase_item::Model>,
    ) -> Result<Vec<purchase_item::Model>, ServiceError> {
        self.ensure_open()?;
        let known = self.staged.inserted_purchase_orders.contains(&order_id)
            || self.observe(RowKey::PurchaseOrder(order_id)).await;
        if !known {
            return Err(ServiceError::NotFound(format!("purchase order {}", order_id)));
        }
        self.staged.purchase_items.insert(order_id, items.clone());
        Ok(items)
    }

    async fn commit(&mut self) -> Result<(), ServiceError> {
        self.ensure_open()?;
        self.finished = true;
        let staged = std::mem::take(&mut self.staged);
        let mut state = self.state.lock().await;

        for (key, version) in &staged.observed {
            if state.version(*key) != Some(*version) {
                debug!(?key, expected = version, "row changed since it was locked");
                return Err(ServiceError::ConflictingUpdate(match key {
                    RowKey::Product(id) => format!("stock balance of product {} changed", id),
                    RowKey::ProductionOrder(id) => format!("production order {} changed", id),
                    RowKey::PurchaseOrder(id) => format!("purchase order {} changed", id),
                }));
            }
        }

        for id in &staged.inserted_products {
            if let Some(product) = staged.products.get(id) {
                if state
                    .products
                    .values()
                    .any(|row| row.value.sku == product.sku || row.value.id == *id)
                {
                    return Err(ServiceError::DuplicateReference(format!(
                        "SKU {} already exists",
                        product.sku
                    )));
                }
            }
        }

        for (id, order) in &staged.purchase_orders {
            let Some(order) = order else { continue };
            let taken = state.purchase_orders.values().any(|row| {
                row.value.po_number == order.po_number
                    && row.value.id != *id
                    && !matches!(staged.purchase_orders.get(&row.value.id), Some(None))
            });
            if taken {
                return Err(ServiceError::DuplicateReference(format!(
                    "purchase order number {} already exists",
                    order.po_number
                )));
            }
        }

        for (id, product) in staged.products {
            upsert(&mut state.products, id, product);
        }
        for (id, bom) in staged.boms {
            state.boms.insert(id, bom);
        }
        for (id, order) in staged.production_orders {
            upsert(&mut state.production_orders, id, order);
        }
        for (id, order) in &staged.purchase_orders {
            match order {
                Some(order) => upsert(&mut state.purchase_orders, *id, order.clone()),
                None => {
                    state.purchase_orders.remove(id);
                    state.purchase_items.remove(id);
                }
            }
        }
        for (order_id, items) in staged.purchase_items {
            match staged.purchase_orders.get(&order_id) {
                Some(None) => continue,
                Some(Some(_)) => {}
                None => {
                    // items changed without a header write still invalidate concurrent locks
                    if let Some(row) = state.purchase_orders.get_mut(&order_id) {
                        row.version += 1;
                    }
                }
            }
            state.purchase_items.insert(order_id, items);
        }
        for mut movement in staged.movements {
            state.next_sequence += 1;
            movement.sequence = state.next_sequence;
            state.movements.push(movement);
        }

        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), ServiceError> {
        self.ensure_open()?;
        self.finished = true;
        self.staged = Staged::default();
        Ok(())
    }
}
