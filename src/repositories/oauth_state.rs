//! # OAuth State Repository
//!
//! Stores the `state` values issued with authorize URLs. A state is valid for
//! one callback only: consuming it deletes the row.

use chrono::{Duration, Utc};
use sea_orm::{ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, Set};
use uuid::Uuid;

use crate::models::oauth_state::{ActiveModel, Column, Entity, Model};

#[derive(Debug, Clone)]
pub struct OAuthStateRepository {
    db: DatabaseConnection,
}

impl OAuthStateRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Persist a freshly issued state that expires after `ttl_minutes`.
    pub async fn create(
        &self,
        provider: &str,
        state: &str,
        ttl_minutes: i64,
    ) -> Result<Model, DbErr> {
        let now = Utc::now().fixed_offset();
        let model = Model {
            id: Uuid::new_v4(),
            provider: provider.to_string(),
            state: state.to_string(),
            expires_at: now + Duration::minutes(ttl_minutes),
            created_at: now,
        };

        let active = ActiveModel {
            id: Set(model.id),
            provider: Set(model.provider.clone()),
            state: Set(model.state.clone()),
            expires_at: Set(model.expires_at),
            created_at: Set(model.created_at),
        };
        Entity::insert(active)
            .exec_without_returning(&self.db)
            .await?;

        Ok(model)
    }

    /// Delete the matching unexpired state. Returns `true` only for the first caller.
    pub async fn consume(&self, provider: &str, state: &str) -> Result<bool, DbErr> {
        let result = Entity::delete_many()
            .filter(Column::Provider.eq(provider))
            .filter(Column::State.eq(state))
            .filter(Column::ExpiresAt.gt(Utc::now().fixed_offset()))
            .exec(&self.db)
            .await?;

        Ok(result.rows_affected == 1)
    }

    /// Remove expired states; returns the number deleted.
    pub async fn purge_expired(&self) -> Result<u64, DbErr> {
        let result = Entity::delete_many()
            .filter(Column::ExpiresAt.lte(Utc::now().fixed_offset()))
            .exec(&self.db)
            .await?;

        if result.rows_affected > 0 {
            tracing::debug!(count = result.rows_affected, "purged expired oauth states");
        }
        Ok(result.rows_affected)
    }
}
