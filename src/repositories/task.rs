//! Task store used by the importer. Tasks are matched by external id only.

use async_trait::async_trait;
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, Condition, DatabaseTransaction, DbErr, EntityTrait, QueryFilter, Set,
};
use uuid::Uuid;

use crate::merge::{TaskFields, EntityStore, LocalState};
use crate::models::task::{ActiveModel, Column, Entity, Model};

#[derive(Debug, Clone, Copy, Default)]
pub struct TaskStore;

fn to_state(model: Model) -> LocalState<TaskFields> {
    LocalState {
        id: model.id,
        external_id: model.external_id,
        fields: TaskFields {
            name: model.name,
            description: model.description,
            task_status: model.task_status,
            priority: model.priority,
            due_at: model.due_at,
            matter_external_id: model.matter_external_id,
            assignee_name: model.assignee_name,
        },
        raw_external: model.raw_external,
        is_active: model.is_active,
    }
}

fn mirror_columns(am: &mut ActiveModel, entity: &LocalState<TaskFields>, synced_at: DateTimeWithTimeZone) {
    let f = &entity.fields;
    am.external_id = Set(entity.external_id.clone());
    am.name = Set(f.name.clone());
    am.description = Set(f.description.clone());
    am.task_status = Set(f.task_status.clone());
    am.priority = Set(f.priority.clone());
    am.due_at = Set(f.due_at);
    am.matter_external_id = Set(f.matter_external_id.clone());
    am.assignee_name = Set(f.assignee_name.clone());
    am.raw_external = Set(entity.raw_external.clone());
    am.is_active = Set(entity.is_active);
    am.last_synced_at = Set(Some(synced_at));
    am.updated_at = Set(synced_at);
}

#[async_trait]
impl EntityStore for TaskStore {
    type Fields = TaskFields;

    async fn find_by_external_id(
        &self,
        txn: &DatabaseTransaction,
        external_id: &str,
    ) -> Result<Option<LocalState<TaskFields>>, DbErr> {
        Ok(Entity::find()
            .filter(Column::ExternalId.eq(external_id))
            .one(txn)
            .await?
            .map(to_state))
    }

    async fn find_unlinked_by_secondary_key(
        &self,
        _txn: &DatabaseTransaction,
        _key: &str,
    ) -> Result<Option<LocalState<TaskFields>>, DbErr> {
        Ok(None)
    }

    async fn insert(
        &self,
        txn: &DatabaseTransaction,
        entity: &LocalState<TaskFields>,
        synced_at: DateTimeWithTimeZone,
    ) -> Result<(), DbErr> {
        let mut am = ActiveModel {
            id: Set(entity.id),
            notes: Set(None),
            local_priority: Set(None),
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
        entity: &LocalState<TaskFields>,
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
