//! Contact store used by the importer.

use async_trait::async_trait;
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::{Expr, Func};
use sea_orm::{
    ColumnTrait, Condition, DatabaseTransaction, DbErr, EntityTrait, QueryFilter, QueryOrder, Set,
};
use uuid::Uuid;

use crate::merge::{ContactFields, EntityStore, LocalState};
use crate::models::contact::{ActiveModel, Column, Entity, Model};

#[derive(Debug, Clone, Copy, Default)]
pub struct ContactStore;

fn to_state(model: Model) -> LocalState<ContactFields> {
    LocalState {
        id: model.id,
        external_id: model.external_id,
        fields: ContactFields {
            first_name: model.first_name,
            last_name: model.last_name,
            display_name: model.display_name,
            email: model.email,
            phone: model.phone,
            contact_type: model.contact_type,
            company_name: model.company_name,
        },
        raw_external: model.raw_external,
        is_active: model.is_active,
    }
}

fn mirror_columns(am: &mut ActiveModel, entity: &LocalState<ContactFields>, synced_at: DateTimeWithTimeZone) {
    let f = &entity.fields;
    am.external_id = Set(entity.external_id.clone());
    am.first_name = Set(f.first_name.clone());
    am.last_name = Set(f.last_name.clone());
    am.display_name = Set(f.display_name.clone());
    am.email = Set(f.email.clone());
    am.phone = Set(f.phone.clone());
    am.contact_type = Set(f.contact_type.clone());
    am.company_name = Set(f.company_name.clone());
    am.raw_external = Set(entity.raw_external.clone());
    am.is_active = Set(entity.is_active);
    am.last_synced_at = Set(Some(synced_at));
    am.updated_at = Set(synced_at);
}

#[async_trait]
impl EntityStore for ContactStore {
    type Fields = ContactFields;

    async fn find_by_external_id(
        &self,
        txn: &DatabaseTransaction,
        external_id: &str,
    ) -> Result<Option<LocalState<ContactFields>>, DbErr> {
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
    ) -> Result<Option<LocalState<ContactFields>>, DbErr> {
        Ok(Entity::find()
            .filter(Column::ExternalId.is_null())
            .filter(Expr::expr(Func::lower(Expr::col(Column::Email))).eq(key.to_lowercase()))
            .order_by_asc(Column::CreatedAt)
            .one(txn)
            .await?
            .map(to_state))
    }

    async fn insert(
        &self,
        txn: &DatabaseTransaction,
        entity: &LocalState<ContactFields>,
        synced_at: DateTimeWithTimeZone,
    ) -> Result<(), DbErr> {
        let mut am = ActiveModel {
            id: Set(entity.id),
            notes: Set(None),
            relationship_status: Set(None),
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
        entity: &LocalState<ContactFields>,
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
