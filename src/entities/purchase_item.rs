use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "purchase_items")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub purchase_order_id: Uuid,
    pub position: i32,
    pub product_id: Uuid,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub qty_ordered: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub qty_received: Decimal,
    /// Portion of `qty_received` already credited to the stock ledger.
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub qty_posted: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub unit_cost: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub line_total: Decimal,
}

impl Model {
    /// Received quantity not yet credited to the ledger.
    pub fn unposted(&self) -> Decimal {
        self.qty_received - self.qty_posted
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
