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
            Box::new(m20240601_000001_create_customers_tables::Migration),
            Box::new(m20240601_000002_create_technicians_table::Migration),
            Box::new(m20240601_000003_create_inventory_items_table::Migration),
            Box::new(m20240601_000004_create_jobs_table::Migration),
            Box::new(m20240601_000005_create_invoices_table::Migration),
            Box::new(m20240601_000006_create_appointments_table::Migration),
            Box::new(m20240601_000007_create_templates_and_sequences::Migration),
        ]
    }
}

fn money(col: impl IntoIden) -> ColumnDef {
    ColumnDef::new(col)
        .decimal_len(16, 4)
        .not_null()
        .default(0)
        .to_owned()
}

mod m20240601_000001_create_customers_tables {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000001_create_customers_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Customers::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Customers::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Customers::Name).string().not_null())
                        .col(ColumnDef::new(Customers::Phone).string().not_null())
                        .col(ColumnDef::new(Customers::Email).string().null())
                        .col(ColumnDef::new(Customers::Address).string().null())
                        .col(ColumnDef::new(Customers::Status).string_len(20).not_null())
                        .col(ColumnDef::new(Customers::Service).string().null())
                        .col(
                            ColumnDef::new(Customers::ServiceCost)
                                .decimal_len(16, 4)
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Customers::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Customers::UpdatedAt)
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
                        .name("idx_customers_phone")
                        .table(Customers::Table)
                        .col(Customers::Phone)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Vehicles::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Vehicles::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Vehicles::CustomerId).uuid().not_null())
                        .col(ColumnDef::new(Vehicles::Position).integer().not_null())
                        .col(ColumnDef::new(Vehicles::Make).string().not_null())
                        .col(ColumnDef::new(Vehicles::Model).string().not_null())
                        .col(ColumnDef::new(Vehicles::Year).string().not_null())
                        .col(ColumnDef::new(Vehicles::PlateNumber).string().not_null())
                        .col(ColumnDef::new(Vehicles::Color).string().not_null())
                        .col(ColumnDef::new(Vehicles::Vin).string().null())
                        .col(ColumnDef::new(Vehicles::PpfCategory).string().null())
                        .col(ColumnDef::new(Vehicles::PpfVehicleType).string().null())
                        .col(ColumnDef::new(Vehicles::PpfWarranty).string().null())
                        .col(
                            ColumnDef::new(Vehicles::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_vehicles_customer_id")
                                .from(Vehicles::Table, Vehicles::CustomerId)
                                .to(Customers::Table, Customers::Id)
                                .on_delete(ForeignKeyAction::Cascade)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            // Positions are append-only per customer
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_vehicles_customer_position")
                        .table(Vehicles::Table)
                        .col(Vehicles::CustomerId)
                        .col(Vehicles::Position)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_vehicles_plate_number")
                        .table(Vehicles::Table)
                        .col(Vehicles::PlateNumber)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Vehicles::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Customers::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum Customers {
        Table,
        Id,
        Name,
        Phone,
        Email,
        Address,
        Status,
        Service,
        ServiceCost,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum Vehicles {
        Table,
        Id,
        CustomerId,
        Position,
        Make,
        Model,
        Year,
        PlateNumber,
        Color,
        Vin,
        PpfCategory,
        PpfVehicleType,
        PpfWarranty,
        CreatedAt,
    }
}

mod m20240601_000002_create_technicians_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000002_create_technicians_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Technicians::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Technicians::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Technicians::Name).string().not_null())
                        .col(ColumnDef::new(Technicians::Specialty).string().not_null())
                        .col(ColumnDef::new(Technicians::Phone).string().null())
                        .col(ColumnDef::new(Technicians::Status).string_len(20).not_null())
                        .col(
                            ColumnDef::new(Technicians::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Technicians::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Technicians::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Technicians {
        Table,
        Id,
        Name,
        Specialty,
        Phone,
        Status,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240601_000003_create_inventory_items_table {
    use super::money;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000003_create_inventory_items_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(InventoryItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(InventoryItems::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(InventoryItems::Name).string().not_null())
                        .col(ColumnDef::new(InventoryItems::Category).string().not_null())
                        .col(
                            ColumnDef::new(InventoryItems::Quantity)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(InventoryItems::Unit).string().not_null())
                        .col(
                            ColumnDef::new(InventoryItems::MinStock)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(money(InventoryItems::Price))
                        .col(
                            ColumnDef::new(InventoryItems::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryItems::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(InventoryItems::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum InventoryItems {
        Table,
        Id,
        Name,
        Category,
        Quantity,
        Unit,
        MinStock,
        Price,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240601_000004_create_jobs_table {
    use super::m20240601_000001_create_customers_tables::Customers;
    use super::money;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000004_create_jobs_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Jobs::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Jobs::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Jobs::CustomerId).uuid().not_null())
                        .col(ColumnDef::new(Jobs::VehicleId).uuid().not_null())
                        .col(ColumnDef::new(Jobs::VehicleIndex).integer().not_null())
                        .col(ColumnDef::new(Jobs::CustomerName).string().not_null())
                        .col(ColumnDef::new(Jobs::VehicleName).string().not_null())
                        .col(ColumnDef::new(Jobs::PlateNumber).string().not_null())
                        .col(ColumnDef::new(Jobs::TechnicianId).uuid().null())
                        .col(ColumnDef::new(Jobs::Stage).string_len(32).not_null())
                        .col(ColumnDef::new(Jobs::ServiceType).string().null())
                        .col(ColumnDef::new(Jobs::Notes).text().null())
                        .col(money(Jobs::ServiceCost))
                        .col(money(Jobs::LaborCost))
                        .col(ColumnDef::new(Jobs::ServiceItems).json().not_null())
                        .col(ColumnDef::new(Jobs::QuotedItems).json().not_null())
                        .col(ColumnDef::new(Jobs::Materials).json().not_null())
                        .col(money(Jobs::TotalAmount))
                        .col(money(Jobs::PaidAmount))
                        .col(ColumnDef::new(Jobs::PaymentStatus).string_len(20).not_null())
                        .col(ColumnDef::new(Jobs::Payments).json().not_null())
                        .col(
                            ColumnDef::new(Jobs::Version)
                                .integer()
                                .not_null()
                                .default(1),
                        )
                        .col(
                            ColumnDef::new(Jobs::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Jobs::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_jobs_customer_id")
                                .from(Jobs::Table, Jobs::CustomerId)
                                .to(Customers::Table, Customers::Id)
                                .on_delete(ForeignKeyAction::Restrict)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_jobs_stage")
                        .table(Jobs::Table)
                        .col(Jobs::Stage)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_jobs_technician_id")
                        .table(Jobs::Table)
                        .col(Jobs::TechnicianId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Jobs::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum Jobs {
        Table,
        Id,
        CustomerId,
        VehicleId,
        VehicleIndex,
        CustomerName,
        VehicleName,
        PlateNumber,
        TechnicianId,
        Stage,
        ServiceType,
        Notes,
        ServiceCost,
        LaborCost,
        ServiceItems,
        QuotedItems,
        Materials,
        TotalAmount,
        PaidAmount,
        PaymentStatus,
        Payments,
        Version,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240601_000005_create_invoices_table {
    use super::m20240601_000004_create_jobs_table::Jobs;
    use super::money;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000005_create_invoices_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Invoices::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Invoices::Id).uuid().primary_key().not_null())
                        .col(
                            ColumnDef::new(Invoices::InvoiceNumber)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Invoices::JobId).uuid().not_null().unique_key())
                        .col(ColumnDef::new(Invoices::CustomerId).uuid().not_null())
                        .col(ColumnDef::new(Invoices::CustomerName).string().not_null())
                        .col(ColumnDef::new(Invoices::VehicleName).string().not_null())
                        .col(ColumnDef::new(Invoices::PlateNumber).string().not_null())
                        .col(ColumnDef::new(Invoices::Items).json().not_null())
                        .col(money(Invoices::Subtotal))
                        .col(money(Invoices::TaxRate))
                        .col(money(Invoices::Tax))
                        .col(money(Invoices::Discount))
                        .col(money(Invoices::TotalAmount))
                        .col(money(Invoices::PaidAmount))
                        .col(
                            ColumnDef::new(Invoices::PaymentStatus)
                                .string_len(20)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Invoices::Version)
                                .integer()
                                .not_null()
                                .default(1),
                        )
                        .col(
                            ColumnDef::new(Invoices::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Invoices::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_invoices_job_id")
                                .from(Invoices::Table, Invoices::JobId)
                                .to(Jobs::Table, Jobs::Id)
                                .on_delete(ForeignKeyAction::Restrict)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Invoices::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Invoices {
        Table,
        Id,
        InvoiceNumber,
        JobId,
        CustomerId,
        CustomerName,
        VehicleName,
        PlateNumber,
        Items,
        Subtotal,
        TaxRate,
        Tax,
        Discount,
        TotalAmount,
        PaidAmount,
        PaymentStatus,
        Version,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240601_000006_create_appointments_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000006_create_appointments_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Appointments::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Appointments::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Appointments::CustomerName).string().not_null())
                        .col(ColumnDef::new(Appointments::Phone).string().not_null())
                        .col(ColumnDef::new(Appointments::VehicleInfo).string().not_null())
                        .col(ColumnDef::new(Appointments::PlateNumber).string().not_null())
                        .col(ColumnDef::new(Appointments::ServiceType).string().not_null())
                        .col(ColumnDef::new(Appointments::Date).date().not_null())
                        .col(ColumnDef::new(Appointments::TimeSlot).string().not_null())
                        .col(ColumnDef::new(Appointments::Notes).text().null())
                        .col(
                            ColumnDef::new(Appointments::Status)
                                .string_len(20)
                                .not_null(),
                        )
                        .col(ColumnDef::new(Appointments::JobId).uuid().null())
                        .col(
                            ColumnDef::new(Appointments::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Appointments::UpdatedAt)
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
                        .name("idx_appointments_date")
                        .table(Appointments::Table)
                        .col(Appointments::Date)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Appointments::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Appointments {
        Table,
        Id,
        CustomerName,
        Phone,
        VehicleInfo,
        PlateNumber,
        ServiceType,
        Date,
        TimeSlot,
        Notes,
        Status,
        JobId,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240601_000007_create_templates_and_sequences {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000007_create_templates_and_sequences"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(WhatsappTemplates::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(WhatsappTemplates::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(WhatsappTemplates::Stage)
                                .string_len(32)
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(WhatsappTemplates::Message).text().not_null())
                        .col(
                            ColumnDef::new(WhatsappTemplates::IsActive)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(WhatsappTemplates::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Sequences::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Sequences::Name)
                                .string()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Sequences::Value)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Sequences::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(WhatsappTemplates::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum WhatsappTemplates {
        Table,
        Id,
        Stage,
        Message,
        IsActive,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum Sequences {
        Table,
        Name,
        Value,
    }
}

/// Connects to `db_url` and applies every pending migration.
pub async fn run_migration(db_url: &str) -> Result<()> {
    info!("Setting up database connection for migrations");

    let mut opt = ConnectOptions::new(db_url);
    opt.max_connections(2)
        .min_connections(1)
        .connect_timeout(Duration::from_secs(30))
        .acquire_timeout(Duration::from_secs(30))
        .sqlx_logging(false);

    let db = Database::connect(opt).await?;

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
