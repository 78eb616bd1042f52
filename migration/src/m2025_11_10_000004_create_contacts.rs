//! Migration to create the contacts table.
//!
//! Mirror columns are owned by the practice-management system; `notes` and
//! `relationship_status` belong to the local application.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Contacts::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Contacts::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Contacts::ExternalId).text().null())
                    .col(ColumnDef::new(Contacts::FirstName).text().null())
                    .col(ColumnDef::new(Contacts::LastName).text().null())
                    .col(ColumnDef::new(Contacts::DisplayName).text().null())
                    .col(ColumnDef::new(Contacts::Email).text().null())
                    .col(ColumnDef::new(Contacts::Phone).text().null())
                    .col(ColumnDef::new(Contacts::ContactType).text().null())
                    .col(ColumnDef::new(Contacts::CompanyName).text().null())
                    .col(ColumnDef::new(Contacts::Notes).text().null())
                    .col(ColumnDef::new(Contacts::RelationshipStatus).text().null())
                    .col(ColumnDef::new(Contacts::RawExternal).json_binary().null())
                    .col(
                        ColumnDef::new(Contacts::LastSyncedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Contacts::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(Contacts::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Contacts::UpdatedAt)
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
                    .name("uq_contacts_external_id")
                    .table(Contacts::Table)
                    .col(Contacts::ExternalId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_contacts_email")
                    .table(Contacts::Table)
                    .col(Contacts::Email)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_contacts_email").to_owned())
            .await?;
        manager
            .drop_index(Index::drop().name("uq_contacts_external_id").to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Contacts::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Contacts {
    Table,
    Id,
    ExternalId,
    FirstName,
    LastName,
    DisplayName,
    Email,
    Phone,
    ContactType,
    CompanyName,
    Notes,
    RelationshipStatus,
    RawExternal,
    LastSyncedAt,
    IsActive,
    CreatedAt,
    UpdatedAt,
}
