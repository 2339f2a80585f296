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
pub enum MovementType {
    #[sea_orm(string_value = "PRODUCTION_RAW_OUT")]
    ProductionRawOut,
    #[sea_orm(string_value = "PRODUCTION_RAW_REVERSAL")]
    ProductionRawReversal,
    #[sea_orm(string_value = "PRODUCTION_FG_IN")]
    ProductionFgIn,
    #[sea_orm(string_value = "PURCHASE_RECEIPT")]
    PurchaseReceipt,
    #[sea_orm(string_value = "PURCHASE_REVERSAL")]
    PurchaseReversal,
    #[sea_orm(string_value = "ADJUSTMENT")]
    Adjustment,
}

/// Append-only ledger row. Never updated or deleted.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "stock_movements")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    /// Recording order, assigned by the store.
    pub sequence: i64,
    pub product_id: Uuid,
    /// Signed: positive credits stock, negative debits it.
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub qty: Decimal,
    pub movement_type: MovementType,
    pub reference: String,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
