//! Migration to create the tasks table.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Tasks::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Tasks::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Tasks::ExternalId).text().null())
                    .col(ColumnDef::new(Tasks::Name).text().null())
                    .col(ColumnDef::new(Tasks::Description).text().null())
                    .col(ColumnDef::new(Tasks::TaskStatus).text().null())
                    .col(ColumnDef::new(Tasks::Priority).text().null())
                    .col(
                        ColumnDef::new(Tasks::DueAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(Tasks::MatterExternalId).text().null())
                    .col(ColumnDef::new(Tasks::AssigneeName).text().null())
                    .col(ColumnDef::new(Tasks::Notes).text().null())
                    .col(ColumnDef::new(Tasks::LocalPriority).text().null())
                    .col(ColumnDef::new(Tasks::RawExternal).json_binary().null())
                    .col(
                        ColumnDef::new(Tasks::LastSyncedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Tasks::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(Tasks::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Tasks::UpdatedAt)
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
                    .name("uq_tasks_external_id")
                    .table(Tasks::Table)
                    .col(Tasks::ExternalId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("uq_tasks_external_id").to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Tasks::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Tasks {
    Table,
    Id,
    ExternalId,
    Name,
    Description,
    TaskStatus,
    Priority,
    DueAt,
    MatterExternalId,
    AssigneeName,
    Notes,
    LocalPriority,
    RawExternal,
    LastSyncedAt,
    IsActive,
    CreatedAt,
    UpdatedAt,
}
