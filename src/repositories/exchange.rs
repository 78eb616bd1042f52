//! Exchange store used by the matter importer.

use async_trait::async_trait;
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, Condition, DatabaseTransaction, DbErr, EntityTrait, QueryFilter, QueryOrder, Set,
};
use uuid::Uuid;

use crate::merge::{MatterFields, EntityStore, LocalState};
use crate::models::exchange::{ActiveModel, Column, Entity, Model};

#[derive(Debug, Clone, Copy, Default)]
pub struct ExchangeStore;

fn to_state(model: Model) -> LocalState<MatterFields> {
    LocalState {
        id: model.id,
        external_id: model.external_id,
        fields: MatterFields {
            display_number: model.display_number,
            description: model.description,
            matter_status: model.matter_status,
            client_external_id: model.client_external_id,
            practice_area: model.practice_area,
            open_date: model.open_date,
            close_date: model.close_date,
        },
        raw_external: model.raw_external,
        is_active: model.is_active,
    }
}

fn mirror_columns(am: &mut ActiveModel, entity: &LocalState<MatterFields>, synced_at: DateTimeWithTimeZone) {
    let f = &entity.fields;
    am.external_id = Set(entity.external_id.clone());
    am.display_number = Set(f.display_number.clone());
    am.description = Set(f.description.clone());
    am.matter_status = Set(f.matter_status.clone());
    am.client_external_id = Set(f.client_external_id.clone());
    am.practice_area = Set(f.practice_area.clone());
    am.open_date = Set(f.open_date);
    am.close_date = Set(f.close_date);
    am.raw_external = Set(entity.raw_external.clone());
    am.is_active = Set(entity.is_active);
    am.last_synced_at = Set(Some(synced_at));
    am.updated_at = Set(synced_at);
}

#[async_trait]
impl EntityStore for ExchangeStore {
    type Fields = MatterFields;

    async fn find_by_external_id(
        &self,
        txn: &DatabaseTransaction,
        external_id: &str,
    ) -> Result<Option<LocalState<MatterFields>>, DbErr> {
        Ok(Entity::find()
            .filter(Column::ExternalId.eq(external_id))
            .one(txn)
            .await?
            .map(to_state))
    }

    async fn find_unlinked_by_secondary_key(
        &self,
        txn: &DatabaseTransaction,
        key: &str,
    ) -> Result<Option<LocalState<MatterFields>>, DbErr> {
        Ok(Entity::find()
            .filter(Column::ExternalId.is_null())
            .filter(Column::DisplayNumber.eq(key))
            .order_by_asc(Column::CreatedAt)
            .one(txn)
            .await?
            .map(to_state))
    }

    async fn insert(
        &self,
        txn: &DatabaseTransaction,
        entity: &LocalState<MatterFields>,
        synced_at: DateTimeWithTimeZone,
    ) -> Result<(), DbErr> {
        let mut am = ActiveModel {
            id: Set(entity.id),
            notes: Set(None),
            exchange_stage: Set(None),
            created_at: Set(synced_at),
            ..Default::default()
        };
        mirror_columns(&mut am, entity, synced_at);
        Entity::insert(am).exec_without_returning(txn).await?;
        Ok(())
    }

    async fn update_mirror(
        &self,
        txn: &DatabaseTransaction,
        entity: &LocalState<MatterFields>,
        synced_at: DateTimeWithTimeZone,
    ) -> Result<(), DbErr> {
        let mut am = ActiveModel {
            id: sea_orm::ActiveValue::Unchanged(entity.id),
            ..Default::default()
        };
        mirror_columns(&mut am, entity, synced_at);
        Entity::update_many()
            .set(am)
            .filter(Column::Id.eq(entity.id))
            .exec(txn)
            .await?;
        Ok(())
    }

    async fn touch(
        &self,
        txn: &DatabaseTransaction,
        id: Uuid,
        synced_at: DateTimeWithTimeZone,
    ) -> Result<(), DbErr> {
        Entity::update_many()
            .col_expr(Column::LastSyncedAt, Expr::value(synced_at))
            .filter(Column::Id.eq(id))
            .exec(txn)
            .await?;
        Ok(())
    }

    async fn deactivate_unseen(
        &self,
        txn: &DatabaseTransaction,
        since: DateTimeWithTimeZone,
    ) -> Result<u64, DbErr> {
        let result = Entity::update_many()
            .col_expr(Column::IsActive, Expr::value(false))
            .col_expr(Column::UpdatedAt, Expr::value(chrono::Utc::now().fixed_offset()))
            .filter(Column::ExternalId.is_not_null())
            .filter(Column::IsActive.eq(true))
            .filter(
                Condition::any()
                    .add(Column::LastSyncedAt.is_null())
                    .add(Column::LastSyncedAt.lt(since)),
            )
            .exec(txn)
            .await?;
        Ok(result.rows_affected)
    }
}
