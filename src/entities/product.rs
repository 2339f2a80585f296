use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ProductKind {
    #[sea_orm(string_value = "RAW_MATERIAL")]
    RawMaterial,
    #[sea_orm(string_value = "SEMI_FINISHED")]
    SemiFinished,
    #[sea_orm(string_value = "FINISHED_GOOD")]
    FinishedGood,
}

/// A stocked product. `qty_on_hand` is only ever changed through the stock ledger.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "products")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub sku: String,
    pub name: String,
    pub unit: String,
    pub kind: ProductKind,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub qty_on_hand: Decimal,
    /// Reorder threshold; informational only.
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub min_qty: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub cost_price: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    /// Name used in user-facing error details, e.g. `Sugar (SUGAR-1)`.
    pub fn label(&self) -> String {
        format!("{} ({})", self.name, self.sku)
    }

    pub fn is_below_minimum(&self) -> bool {
        self.min_qty > Decimal::ZERO && self.qty_on_hand <= self.min_qty
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
