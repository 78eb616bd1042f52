//! # OAuth Token Repository
//!
//! Token Store: encrypted credential rows, one active row per provider.
//! Only the token manager calls the mutating methods.

use chrono::{DateTime, Utc};
use sea_orm::{
    ColumnTrait, DatabaseConnection, DbErr, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, Set, TransactionTrait, sea_query::Expr,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crypto::{CryptoKey, open_token, seal_token};
use crate::error::TokenError;
use crate::models::oauth_token::{ActiveModel, Column, Entity, Model};

/// Diagnostic counters kept alongside each token row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RefreshMetadata {
    /// How this row was obtained: `authorization_code` or `refresh_token`
    #[serde(default)]
    pub issued_by: String,
    #[serde(default)]
    pub refresh_count: u64,
    pub last_refreshed_at: Option<DateTime<Utc>>,
    pub previous_token_id: Option<Uuid>,
    #[serde(default)]
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub last_failed_at: Option<DateTime<Utc>>,
}

/// Decrypted view of a token row.
#[derive(Clone)]
pub struct StoredToken {
    pub id: Uuid,
    pub provider: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub is_active: bool,
    pub last_used_at: Option<DateTime<Utc>>,
    pub metadata: RefreshMetadata,
}

impl std::fmt::Debug for StoredToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredToken")
            .field("id", &self.id)
            .field("provider", &self.provider)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_at", &self.expires_at)
            .field("is_active", &self.is_active)
            .finish()
    }
}

/// Plaintext credential about to be stored.
#[derive(Clone)]
pub struct NewToken {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct TokenRepository {
    db: DatabaseConnection,
    crypto_key: CryptoKey,
}

impl TokenRepository {
    pub fn new(db: DatabaseConnection, crypto_key: CryptoKey) -> Self {
        Self { db, crypto_key }
    }

    fn decrypt(&self, model: Model) -> Result<StoredToken, TokenError> {
        let access_token = open_token(&self.crypto_key, &model.provider, &model.access_token_ciphertext)?;
        let refresh_token = model
            .refresh_token_ciphertext
            .as_deref()
            .map(|ct| open_token(&self.crypto_key, &model.provider, ct))
            .transpose()?;
        let metadata = model
            .refresh_metadata
            .and_then(|value| serde_json::from_value(value).ok())
            .unwrap_or_default();

        Ok(StoredToken {
            id: model.id,
            provider: model.provider,
            access_token,
            refresh_token,
            expires_at: model.expires_at.with_timezone(&Utc),
            is_active: model.is_active,
            last_used_at: model.last_used_at.map(|at| at.with_timezone(&Utc)),
            metadata,
        })
    }

    /// The active token for `provider`, if any.
    pub async fn find_active(&self, provider: &str) -> Result<Option<StoredToken>, TokenError> {
        let model = Entity::find()
            .filter(Column::Provider.eq(provider))
            .filter(Column::IsActive.eq(true))
            .one(&self.db)
            .await?;

        model.map(|m| self.decrypt(m)).transpose()
    }

    /// All active tokens, soonest expiry first.
    pub async fn list_active(&self) -> Result<Vec<StoredToken>, TokenError> {
        Entity::find()
            .filter(Column::IsActive.eq(true))
            .order_by_asc(Column::ExpiresAt)
            .all(&self.db)
            .await?
            .into_iter()
            .map(|m| self.decrypt(m))
            .collect()
    }

    /// Full history for `provider`, newest first.
    pub async fn history(&self, provider: &str) -> Result<Vec<StoredToken>, TokenError> {
        Entity::find()
            .filter(Column::Provider.eq(provider))
            .order_by_desc(Column::CreatedAt)
            .all(&self.db)
            .await?
            .into_iter()
            .map(|m| self.decrypt(m))
            .collect()
    }

    pub async fn count_active(&self, provider: &str) -> Result<u64, DbErr> {
        Entity::find()
            .filter(Column::Provider.eq(provider))
            .filter(Column::IsActive.eq(true))
            .count(&self.db)
            .await
    }

    pub async fn touch_last_used(&self, id: Uuid) -> Result<(), DbErr> {
        Entity::update_many()
            .col_expr(Column::LastUsedAt, Expr::value(Utc::now().fixed_offset()))
            .filter(Column::Id.eq(id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    /// Atomically deactivate the superseded row and insert `token` as the active one.
    ///
    /// With `superseded = Some(id)` the swap only happens while that row is still
    /// active; `Ok(None)` means another writer replaced it first. With `None`,
    /// every active row for the provider is deactivated.
    pub async fn replace_active(
        &self,
        provider: &str,
        superseded: Option<Uuid>,
        token: NewToken,
        metadata: RefreshMetadata,
    ) -> Result<Option<Uuid>, TokenError> {
        let access_ct = seal_token(&self.crypto_key, provider, &token.access_token)?;
        let refresh_ct = token
            .refresh_token
            .as_deref()
            .map(|rt| seal_token(&self.crypto_key, provider, rt))
            .transpose()?;
        let metadata = serde_json::to_value(&metadata).unwrap_or_default();
        let now = Utc::now().fixed_offset();

        let txn = self.db.begin().await?;

        let mut deactivate = Entity::update_many()
            .col_expr(Column::IsActive, Expr::value(false))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::Provider.eq(provider))
            .filter(Column::IsActive.eq(true));
        if let Some(old_id) = superseded {
            deactivate = deactivate.filter(Column::Id.eq(old_id));
        }
        let result = deactivate.exec(&txn).await?;

        if superseded.is_some() && result.rows_affected == 0 {
            txn.rollback().await?;
            return Ok(None);
        }

        let id = Uuid::new_v4();
        let row = ActiveModel {
            id: Set(id),
            provider: Set(provider.to_string()),
            access_token_ciphertext: Set(access_ct),
            refresh_token_ciphertext: Set(refresh_ct),
            expires_at: Set(token.expires_at.fixed_offset()),
            is_active: Set(true),
            last_used_at: Set(Some(now)),
            refresh_metadata: Set(Some(metadata)),
            created_at: Set(now),
            updated_at: Set(now),
        };
        Entity::insert(row).exec_without_returning(&txn).await?;

        txn.commit().await?;
        Ok(Some(id))
    }

    /// Deactivate a token whose refresh failed, keeping the row for audit.
    pub async fn mark_refresh_failed(
        &self,
        token: &StoredToken,
        reason: &str,
    ) -> Result<(), TokenError> {
        let now = Utc::now();
        let mut metadata = token.metadata.clone();
        metadata.consecutive_failures += 1;
        metadata.last_error = Some(reason.to_string());
        metadata.last_failed_at = Some(now);

        Entity::update_many()
            .col_expr(Column::IsActive, Expr::value(false))
            .col_expr(
                Column::RefreshMetadata,
                Expr::value(serde_json::to_value(&metadata).unwrap_or_default()),
            )
            .col_expr(Column::UpdatedAt, Expr::value(now.fixed_offset()))
            .filter(Column::Id.eq(token.id))
            .exec(&self.db)
            .await?;
        Ok(())
    }
}
