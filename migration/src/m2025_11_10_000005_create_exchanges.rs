//! Migration to create the exchanges table.
//!
//! Exchanges are the local representation of external matters.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Exchanges::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Exchanges::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Exchanges::ExternalId).text().null())
                    .col(ColumnDef::new(Exchanges::DisplayNumber).text().null())
                    .col(ColumnDef::new(Exchanges::Description).text().null())
                    .col(ColumnDef::new(Exchanges::MatterStatus).text().null())
                    .col(ColumnDef::new(Exchanges::ClientExternalId).text().null())
                    .col(ColumnDef::new(Exchanges::PracticeArea).text().null())
                    .col(ColumnDef::new(Exchanges::OpenDate).date().null())
                    .col(ColumnDef::new(Exchanges::CloseDate).date().null())
                    .col(ColumnDef::new(Exchanges::ExchangeStage).text().null())
                    .col(ColumnDef::new(Exchanges::Notes).text().null())
                    .col(ColumnDef::new(Exchanges::RawExternal).json_binary().null())
                    .col(
                        ColumnDef::new(Exchanges::LastSyncedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Exchanges::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(Exchanges::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Exchanges::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("uq_exchanges_external_id")
                    .table(Exchanges::Table)
                    .col(Exchanges::ExternalId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_exchanges_display_number")
                    .table(Exchanges::Table)
                    .col(Exchanges::DisplayNumber)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_exchanges_display_number").to_owned())
            .await?;
        manager
            .drop_index(Index::drop().name("uq_exchanges_external_id").to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Exchanges::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Exchanges {
    Table,
    Id,
    ExternalId,
    DisplayNumber,
    Description,
    MatterStatus,
    ClientExternalId,
    PracticeArea,
    OpenDate,
    CloseDate,
    ExchangeStage,
    Notes,
    RawExternal,
    LastSyncedAt,
    IsActive,
    CreatedAt,
    UpdatedAt,
}
