//! # SyncJob Repository
//!
//! Progress Store for import runs. Every status transition is a conditional
//! update on the expected current status, so two processes racing for the same
//! row cannot both win. Claiming a row issues a new `lease_id`; a run's
//! progress writes carry the lease it started with and stop matching once the
//! row has been claimed again.

use chrono::Utc;
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::{
    ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
    sea_query::{Expr, SimpleExpr},
};
use uuid::Uuid;

use crate::models::EntityType;
use crate::models::sync_job::{ActiveModel, Column, Entity, JobStatus, Model};
use crate::sync::progress::Progress;

/// Values for a new job row.
#[derive(Debug, Clone)]
pub struct NewSyncJob<'a> {
    pub sync_id: &'a str,
    pub entity_type: EntityType,
    pub status: JobStatus,
    pub start_time: DateTimeWithTimeZone,
    pub progress: &'a Progress,
}

fn holds_lease(lease: Option<Uuid>) -> SimpleExpr {
    match lease {
        Some(lease) => Column::LeaseId.eq(lease),
        None => Column::LeaseId.is_null(),
    }
}

#[derive(Debug, Clone)]
pub struct SyncJobRepository {
    db: DatabaseConnection,
}

impl SyncJobRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Model>, DbErr> {
        Entity::find_by_id(id).one(&self.db).await
    }

    /// Most recent row for a logical job.
    pub async fn find_latest(&self, sync_id: &str) -> Result<Option<Model>, DbErr> {
        Entity::find()
            .filter(Column::SyncId.eq(sync_id))
            .order_by_desc(Column::CreatedAt)
            .one(&self.db)
            .await
    }

    /// Rows for a logical job, newest first.
    pub async fn list_runs(&self, sync_id: &str, limit: u64) -> Result<Vec<Model>, DbErr> {
        Entity::find()
            .filter(Column::SyncId.eq(sync_id))
            .order_by_desc(Column::CreatedAt)
            .limit(limit)
            .all(&self.db)
            .await
    }

    /// Insert a new row; heartbeat starts at creation.
    pub async fn create<C: ConnectionTrait>(
        &self,
        conn: &C,
        job: NewSyncJob<'_>,
    ) -> Result<Model, DbErr> {
        let now = Utc::now().fixed_offset();
        let id = Uuid::new_v4();
        let row = ActiveModel {
            id: Set(id),
            sync_id: Set(job.sync_id.to_string()),
            entity_type: Set(job.entity_type.as_str().to_string()),
            status: Set(job.status.as_str().to_string()),
            cursor: Set(job.progress.cursor.clone()),
            start_time: Set(Some(job.start_time)),
            end_time: Set(None),
            records_processed: Set(job.progress.records_processed as i64),
            records_created: Set(job.progress.records_created as i64),
            records_updated: Set(job.progress.records_updated as i64),
            records_failed: Set(job.progress.records_failed as i64),
            statistics: Set(job.progress.statistics_json()),
            errors: Set(job.progress.errors_json()),
            pause_requested: Set(false),
            heartbeat_at: Set(Some(now)),
            lease_id: Set(Some(Uuid::new_v4())),
            created_at: Set(now),
            updated_at: Set(now),
        };
        Entity::insert(row).exec_without_returning(conn).await?;

        Entity::find_by_id(id)
            .one(conn)
            .await?
            .ok_or_else(|| DbErr::RecordNotFound(format!("sync job {id} vanished after insert")))
    }

    /// Move `id` from `from` to `to`, stamping the heartbeat.
    ///
    /// Claiming a row (moving it to `pending`) issues a new lease and clears any
    /// earlier pause request.
    ///
    /// With `stale_before`, the move only succeeds when the current heartbeat is
    /// missing or older than that instant. Returns whether this caller won.
    pub async fn transition<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: Uuid,
        from: JobStatus,
        to: JobStatus,
        stale_before: Option<DateTimeWithTimeZone>,
    ) -> Result<bool, DbErr> {
        let now = Utc::now().fixed_offset();
        let mut update = Entity::update_many()
            .col_expr(Column::Status, Expr::value(to.as_str()))
            .col_expr(Column::HeartbeatAt, Expr::value(now))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::Id.eq(id))
            .filter(Column::Status.eq(from.as_str()));

        if to == JobStatus::Pending {
            update = update
                .col_expr(Column::LeaseId, Expr::value(Some(Uuid::new_v4())))
                .col_expr(Column::PauseRequested, Expr::value(false));
        }

        if let Some(threshold) = stale_before {
            update = update.filter(
                Condition::any()
                    .add(Column::HeartbeatAt.is_null())
                    .add(Column::HeartbeatAt.lt(threshold)),
            );
        }

        Ok(update.exec(conn).await?.rows_affected == 1)
    }

    /// Move a claimed row from `pending` to `running` under `lease`.
    pub async fn begin_run<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: Uuid,
        lease: Option<Uuid>,
    ) -> Result<bool, DbErr> {
        let now = Utc::now().fixed_offset();
        let result = Entity::update_many()
            .col_expr(Column::Status, Expr::value(JobStatus::Running.as_str()))
            .col_expr(Column::HeartbeatAt, Expr::value(now))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::Id.eq(id))
            .filter(Column::Status.eq(JobStatus::Pending.as_str()))
            .filter(holds_lease(lease))
            .exec(conn)
            .await?;

        Ok(result.rows_affected == 1)
    }

    /// Write a page's progress while the row is still `running` under `lease`.
    ///
    /// Returns `false` when the row left `running` or was claimed by another run.
    pub async fn commit_progress<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: Uuid,
        lease: Option<Uuid>,
        progress: &Progress,
    ) -> Result<bool, DbErr> {
        let now = Utc::now().fixed_offset();
        let result = Entity::update_many()
            .col_expr(Column::Cursor, Expr::value(progress.cursor.clone()))
            .col_expr(
                Column::RecordsProcessed,
                Expr::value(progress.records_processed as i64),
            )
            .col_expr(Column::RecordsCreated, Expr::value(progress.records_created as i64))
            .col_expr(Column::RecordsUpdated, Expr::value(progress.records_updated as i64))
            .col_expr(Column::RecordsFailed, Expr::value(progress.records_failed as i64))
            .col_expr(Column::Statistics, Expr::value(progress.statistics_json()))
            .col_expr(Column::Errors, Expr::value(progress.errors_json()))
            .col_expr(Column::HeartbeatAt, Expr::value(now))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::Id.eq(id))
            .filter(Column::Status.eq(JobStatus::Running.as_str()))
            .filter(holds_lease(lease))
            .exec(conn)
            .await?;

        Ok(result.rows_affected == 1)
    }

    /// Leave `running` for `paused`, `completed` or `failed`, writing final progress.
    pub async fn finish<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: Uuid,
        lease: Option<Uuid>,
        status: JobStatus,
        progress: &Progress,
    ) -> Result<bool, DbErr> {
        let now = Utc::now().fixed_offset();
        let end_time = status.is_terminal().then_some(now);
        let result = Entity::update_many()
            .col_expr(Column::Status, Expr::value(status.as_str()))
            .col_expr(Column::EndTime, Expr::value(end_time))
            .col_expr(Column::PauseRequested, Expr::value(false))
            .col_expr(Column::Cursor, Expr::value(progress.cursor.clone()))
            .col_expr(
                Column::RecordsProcessed,
                Expr::value(progress.records_processed as i64),
            )
            .col_expr(Column::RecordsCreated, Expr::value(progress.records_created as i64))
            .col_expr(Column::RecordsUpdated, Expr::value(progress.records_updated as i64))
            .col_expr(Column::RecordsFailed, Expr::value(progress.records_failed as i64))
            .col_expr(Column::Statistics, Expr::value(progress.statistics_json()))
            .col_expr(Column::Errors, Expr::value(progress.errors_json()))
            .col_expr(Column::HeartbeatAt, Expr::value(now))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::Id.eq(id))
            .filter(Column::Status.eq(JobStatus::Running.as_str()))
            .filter(holds_lease(lease))
            .exec(conn)
            .await?;

        Ok(result.rows_affected == 1)
    }

    /// Close out a live row that a new run replaces.
    pub async fn supersede<C: ConnectionTrait>(
        &self,
        conn: &C,
        model: &Model,
        progress: &Progress,
    ) -> Result<bool, DbErr> {
        let now = Utc::now().fixed_offset();
        let result = Entity::update_many()
            .col_expr(Column::Status, Expr::value(JobStatus::Failed.as_str()))
            .col_expr(Column::EndTime, Expr::value(Some(now)))
            .col_expr(Column::PauseRequested, Expr::value(false))
            .col_expr(Column::Errors, Expr::value(progress.errors_json()))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::Id.eq(model.id))
            .filter(Column::Status.eq(model.status.as_str()))
            .exec(conn)
            .await?;

        Ok(result.rows_affected == 1)
    }

    /// Ask a live run to pause at its next page commit.
    pub async fn request_pause(&self, id: Uuid) -> Result<bool, DbErr> {
        let result = Entity::update_many()
            .col_expr(Column::PauseRequested, Expr::value(true))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now().fixed_offset()))
            .filter(Column::Id.eq(id))
            .filter(
                Column::Status.is_in([JobStatus::Pending.as_str(), JobStatus::Running.as_str()]),
            )
            .exec(&self.db)
            .await?;

        Ok(result.rows_affected == 1)
    }

    /// Read the pause flag through `conn` so it sees the in-flight transaction.
    pub async fn pause_requested<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: Uuid,
    ) -> Result<bool, DbErr> {
        Ok(Entity::find_by_id(id)
            .one(conn)
            .await?
            .map(|job| job.pause_requested)
            .unwrap_or(false))
    }
}
