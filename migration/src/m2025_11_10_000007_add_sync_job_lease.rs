//! Adds `lease_id` to sync_jobs.
//!
//! A fresh lease is issued every time a row is claimed; progress writes are
//! fenced on it so a run whose row was taken over can no longer commit.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .alter_table(
                Table::alter()
                    .table(SyncJobs::Table)
                    .add_column(ColumnDef::new(SyncJobs::LeaseId).uuid().null())
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .alter_table(
                Table::alter()
                    .table(SyncJobs::Table)
                    .drop_column(SyncJobs::LeaseId)
                    .to_owned(),
            )
            .await
    }
}

#[derive(DeriveIden)]
enum SyncJobs {
    Table,
    LeaseId,
}
