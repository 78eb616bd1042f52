//! Exchange entity model (local name for an external matter)

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "exchanges")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(unique)]
    pub external_id: Option<String>,

    /// Human-facing matter number; secondary match key for unlinked rows
    pub display_number: Option<String>,
    pub description: Option<String>,
    pub matter_status: Option<String>,
    pub client_external_id: Option<String>,
    pub practice_area: Option<String>,
    pub open_date: Option<Date>,
    pub close_date: Option<Date>,

    /// Local: exchange workflow stage
    pub exchange_stage: Option<String>,
    /// Local: free-form notes
    pub notes: Option<String>,

    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub raw_external: Option<JsonValue>,

    pub last_synced_at: Option<DateTimeWithTimeZone>,
    pub is_active: bool,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
