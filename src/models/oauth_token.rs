//! OAuth token entity model
//!
//! One row per issued credential. The active row for a provider is the one the
//! token manager hands out; superseded rows stay behind with `is_active = false`.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "oauth_tokens")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Provider identity key (e.g. `clio`)
    pub provider: String,

    /// AES-GCM sealed access token
    pub access_token_ciphertext: Vec<u8>,

    /// AES-GCM sealed refresh token; absent when the provider cannot renew silently
    pub refresh_token_ciphertext: Option<Vec<u8>>,

    pub expires_at: DateTimeWithTimeZone,

    /// Exactly one active row per provider
    pub is_active: bool,

    pub last_used_at: Option<DateTimeWithTimeZone>,

    /// Diagnostic blob: refresh counters, last refresh time, last error
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub refresh_metadata: Option<JsonValue>,

    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
