use anyhow::Result;
use sea_orm::{ConnectOptions, Database};
use sea_orm_migration::prelude::*;
use std::time::Duration;
use tracing::{error, info};

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240601_000001_create_catalog_tables::Migration),
            Box::new(m20240601_000002_create_stock_movements_table::Migration),
            Box::new(m20240601_000003_create_production_orders_table::Migration),
            Box::new(m20240601_000004_create_purchasing_tables::Migration),
        ]
    }
}

mod m20240601_000001_create_catalog_tables {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000001_create_catalog_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Products::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Products::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Products::Sku).string().not_null())
                        .col(ColumnDef::new(Products::Name).string().not_null())
                        .col(ColumnDef::new(Products::Unit).string().not_null())
                        .col(ColumnDef::new(Products::Kind).string_len(32).not_null())
                        .col(
                            ColumnDef::new(Products::QtyOnHand)
                                .decimal_len(19, 4)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Products::MinQty)
                                .decimal_len(19, 4)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Products::CostPrice)
                                .decimal_len(19, 4)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Products::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Products::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_products_sku")
                        .table(Products::Table)
                        .col(Products::Sku)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Boms::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Boms::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Boms::FinalProductId).uuid().not_null())
                        .col(ColumnDef::new(Boms::Name).string().not_null())
                        .col(
                            ColumnDef::new(Boms::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Boms::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_boms_final_product")
                                .from(Boms::Table, Boms::FinalProductId)
                                .to(Products::Table, Products::Id),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(BomComponents::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(BomComponents::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(BomComponents::BomId).uuid().not_null())
                        .col(ColumnDef::new(BomComponents::Position).integer().not_null())
                        .col(ColumnDef::new(BomComponents::ProductId).uuid().not_null())
                        .col(
                            ColumnDef::new(BomComponents::QuantityPerUnit)
                                .decimal_len(19, 6)
                                .not_null(),
                        )
                        .col(ColumnDef::new(BomComponents::Unit).string().not_null())
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_bom_components_bom")
                                .from(BomComponents::Table, BomComponents::BomId)
                                .to(Boms::Table, Boms::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_bom_components_product")
                                .from(BomComponents::Table, BomComponents::ProductId)
                                .to(Products::Table, Products::Id),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_bom_components_bom_id")
                        .table(BomComponents::Table)
                        .col(BomComponents::BomId)
                        .col(BomComponents::Position)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(BomComponents::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Boms::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Products::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum Products {
        Table,
        Id,
        Sku,
        Name,
        Unit,
        Kind,
        QtyOnHand,
        MinQty,
        CostPrice,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    pub(super) enum Boms {
        Table,
        Id,
        FinalProductId,
        Name,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum BomComponents {
        Table,
        Id,
        BomId,
        Position,
        ProductId,
        QuantityPerUnit,
        Unit,
    }
}

mod m20240601_000002_create_stock_movements_table {

    use super::m20240601_000001_create_catalog_tables::Products;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000002_create_stock_movements_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // sequence is assigned by the store as MAX(sequence) + 1 so recording
            // order survives equal timestamps on every backend
            manager
                .create_table(
                    Table::create()
                        .table(StockMovements::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(StockMovements::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockMovements::Sequence)
                                .big_integer()
                                .not_null(),
                        )
                        .col(ColumnDef::new(StockMovements::ProductId).uuid().not_null())
                        .col(
                            ColumnDef::new(StockMovements::Qty)
                                .decimal_len(19, 4)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockMovements::MovementType)
                                .string_len(32)
                                .not_null(),
                        )
                        .col(ColumnDef::new(StockMovements::Reference).string().not_null())
                        .col(ColumnDef::new(StockMovements::Notes).text().null())
                        .col(
                            ColumnDef::new(StockMovements::OccurredAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockMovements::RecordedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_stock_movements_product")
                                .from(StockMovements::Table, StockMovements::ProductId)
                                .to(Products::Table, Products::Id),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_stock_movements_sequence")
                        .table(StockMovements::Table)
                        .col(StockMovements::Sequence)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_stock_movements_product_sequence")
                        .table(StockMovements::Table)
                        .col(StockMovements::ProductId)
                        .col(StockMovements::Sequence)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_stock_movements_reference")
                        .table(StockMovements::Table)
                        .col(StockMovements::Reference)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(StockMovements::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum StockMovements {
        Table,
        Id,
        Sequence,
        ProductId,
        Qty,
        MovementType,
        Reference,
        Notes,
        OccurredAt,
        RecordedAt,
    }
}

mod m20240601_000003_create_production_orders_table {

    use super::m20240601_000001_create_catalog_tables::{Boms, Products};
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000003_create_production_orders_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(ProductionOrders::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(ProductionOrders::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(ProductionOrders::ProductId).uuid().not_null())
                        .col(ColumnDef::new(ProductionOrders::BomId).uuid().null())
                        .col(
                            ColumnDef::new(ProductionOrders::QtyOrdered)
                                .decimal_len(19, 4)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ProductionOrders::QtyProduced)
                                .decimal_len(19, 4)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(ProductionOrders::Status)
                                .string_len(32)
                                .not_null(),
                        )
                        .col(ColumnDef::new(ProductionOrders::DueDate).date().null())
                        .col(ColumnDef::new(ProductionOrders::Notes).text().null())
                        .col(
                            ColumnDef::new(ProductionOrders::StartedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(ProductionOrders::FinishedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(ProductionOrders::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ProductionOrders::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_production_orders_product")
                                .from(ProductionOrders::Table, ProductionOrders::ProductId)
                                .to(Products::Table, Products::Id),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_production_orders_bom")
                                .from(ProductionOrders::Table, ProductionOrders::BomId)
                                .to(Boms::Table, Boms::Id),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_production_orders_status")
                        .table(ProductionOrders::Table)
                        .col(ProductionOrders::Status)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(ProductionOrders::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum ProductionOrders {
        Table,
        Id,
        ProductId,
        BomId,
        QtyOrdered,
        QtyProduced,
        Status,
        DueDate,
        Notes,
        StartedAt,
        FinishedAt,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240601_000004_create_purchasing_tables {

    use super::m20240601_000001_create_catalog_tables::Products;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000004_create_purchasing_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(PurchaseOrders::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(PurchaseOrders::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(PurchaseOrders::PoNumber).string().not_null())
                        .col(ColumnDef::new(PurchaseOrders::SupplierId).uuid().null())
                        .col(ColumnDef::new(PurchaseOrders::SupplierName).string().null())
                        .col(
                            ColumnDef::new(PurchaseOrders::Status)
                                .string_len(32)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PurchaseOrders::TotalAmount)
                                .decimal_len(19, 4)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(PurchaseOrders::ReceivedDate)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(ColumnDef::new(PurchaseOrders::Notes).text().null())
                        .col(
                            ColumnDef::new(PurchaseOrders::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PurchaseOrders::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_purchase_orders_po_number")
                        .table(PurchaseOrders::Table)
                        .col(PurchaseOrders::PoNumber)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(PurchaseItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(PurchaseItems::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PurchaseItems::PurchaseOrderId)
                                .uuid()
                                .not_null(),
                        )
                        .col(ColumnDef::new(PurchaseItems::Position).integer().not_null())
                        .col(ColumnDef::new(PurchaseItems::ProductId).uuid().not_null())
                        .col(
                            ColumnDef::new(PurchaseItems::QtyOrdered)
                                .decimal_len(19, 4)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PurchaseItems::QtyReceived)
                                .decimal_len(19, 4)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(PurchaseItems::QtyPosted)
                                .decimal_len(19, 4)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(PurchaseItems::UnitCost)
                                .decimal_len(19, 4)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PurchaseItems::LineTotal)
                                .decimal_len(19, 4)
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_purchase_items_order")
                                .from(PurchaseItems::Table, PurchaseItems::PurchaseOrderId)
                                .to(PurchaseOrders::Table, PurchaseOrders::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_purchase_items_product")
                                .from(PurchaseItems::Table, PurchaseItems::ProductId)
                                .to(Products::Table, Products::Id),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_purchase_items_order_id")
                        .table(PurchaseItems::Table)
                        .col(PurchaseItems::PurchaseOrderId)
                        .col(PurchaseItems::Position)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(PurchaseItems::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(PurchaseOrders::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum PurchaseOrders {
        Table,
        Id,
        PoNumber,
        SupplierId,
        SupplierName,
        Status,
        TotalAmount,
        ReceivedDate,
        Notes,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum PurchaseItems {
        Table,
        Id,
        PurchaseOrderId,
        Position,
        ProductId,
        QtyOrdered,
        QtyReceived,
        QtyPosted,
        UnitCost,
        LineTotal,
    }
}

/// Standalone migration runner used by `erp-order-engine migrate`.
pub async fn run_migration(db_url: &str) -> Result<()> {
    info!("Setting up database connection for migrations");

    let mut opt = ConnectOptions::new(db_url);
    opt.max_connections(2)
        .min_connections(1)
        .connect_timeout(Duration::from_secs(30))
        .acquire_timeout(Duration::from_secs(30))
        .sqlx_logging(true);

    let db = Database::connect(opt).await?;

    info!("Running database migrations");

    match Migrator::up(&db, None).await {
        Ok(_) => {
            info!("Migrations completed successfully");
            Ok(())
        }
        Err(e) => {
            error!("Migration failed: {}", e);
            Err(e.into())
        }
    }
}
