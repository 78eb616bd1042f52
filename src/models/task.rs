//! Task entity model

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "tasks")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(unique)]
    pub external_id: Option<String>,

    pub name: Option<String>,
    pub description: Option<String>,
    pub task_status: Option<String>,
    pub priority: Option<String>,
    pub due_at: Option<DateTimeWithTimeZone>,
    pub matter_external_id: Option<String>,
    pub assignee_name: Option<String>,

    /// Local: free-form notes
    pub notes: Option<String>,
    /// Local: priority override used by the exchange workflow
    pub local_priority: Option<String>,

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
