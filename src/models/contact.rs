//! Contact entity model
//!
//! Mirror columns follow the practice-management system; `notes` and
//! `relationship_status` are owned locally and never written by the importer.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "contacts")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Identifier in the external system; `None` for locally created contacts
    #[sea_orm(unique)]
    pub external_id: Option<String>,

    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub contact_type: Option<String>,
    pub company_name: Option<String>,

    /// Local: free-form notes
    pub notes: Option<String>,

    /// Local: relationship pipeline status
    pub relationship_status: Option<String>,

    /// Last-seen external snapshot, verbatim
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
