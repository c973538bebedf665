use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240301_000001_create_orders_table::Migration),
            Box::new(m20240301_000002_create_order_statuses_table::Migration),
            Box::new(m20240315_000003_add_latest_status_index::Migration),
            Box::new(m20240402_000004_add_denormalized_order_status::Migration),
        ]
    }
}

mod m20240301_000001_create_orders_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000001_create_orders_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Orders::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Orders::Id).uuid().primary_key().not_null())
                        .col(
                            ColumnDef::new(Orders::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Orders::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub enum Orders {
        Table,
        Id,
        CreatedAt,
    }
}

mod m20240301_000002_create_order_statuses_table {

    use super::m20240301_000001_create_orders_table::Orders;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000002_create_order_statuses_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(OrderStatuses::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(OrderStatuses::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(OrderStatuses::OrderId).uuid().not_null())
                        .col(
                            ColumnDef::new(OrderStatuses::Status)
                                .string_len(20)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(OrderStatuses::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_order_statuses_order_id")
                                .from(OrderStatuses::Table, OrderStatuses::OrderId)
                                .to(Orders::Table, Orders::Id)
                                .on_delete(ForeignKeyAction::Cascade)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            // Foreign key index (used by the existence join)
            manager
                .create_index(
                    Index::create()
                        .name("idx_order_statuses_order_id")
                        .table(OrderStatuses::Table)
                        .col(OrderStatuses::OrderId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_order_statuses_status")
                        .table(OrderStatuses::Table)
                        .col(OrderStatuses::Status)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(OrderStatuses::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub enum OrderStatuses {
        Table,
        Id,
        OrderId,
        Status,
        CreatedAt,
    }
}

mod m20240315_000003_add_latest_status_index {

    use super::m20240301_000002_create_order_statuses_table::OrderStatuses;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240315_000003_add_latest_status_index"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // Serves "newest event per order" lookups without a sort
            manager
                .create_index(
                    Index::create()
                        .name("idx_order_statuses_order_created")
                        .table(OrderStatuses::Table)
                        .col(OrderStatuses::OrderId)
                        .col((OrderStatuses::CreatedAt, IndexOrder::Desc))
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_index(
                    Index::drop()
                        .name("idx_order_statuses_order_created")
                        .table(OrderStatuses::Table)
                        .to_owned(),
                )
                .await
        }
    }
}

mod m20240402_000004_add_denormalized_order_status {

    use super::m20240301_000001_create_orders_table::Orders;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240402_000004_add_denormalized_order_status"
        }
    }

    #[derive(DeriveIden)]
    enum DenormalizedOrders {
        Status,
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // NULL until the denormalization receiver or a backfill writes it
            manager
                .alter_table(
                    Table::alter()
                        .table(Orders::Table)
                        .add_column(
                            ColumnDef::new(DenormalizedOrders::Status)
                                .string_len(20)
                                .null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_orders_status")
                        .table(Orders::Table)
                        .col(DenormalizedOrders::Status)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_index(
                    Index::drop()
                        .name("idx_orders_status")
                        .table(Orders::Table)
                        .to_owned(),
                )
                .await?;

            manager
                .alter_table(
                    Table::alter()
                        .table(Orders::Table)
                        .drop_column(DenormalizedOrders::Status)
                        .to_owned(),
                )
                .await
        }
    }
}
