//! Task mirror fields. Tasks have no secondary identity key.

use chrono::{DateTime, FixedOffset};

use super::{ExternalSnapshot, MirrorFields};
use crate::error::MergeError;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TaskFields {
    pub name: Option<String>,
    pub description: Option<String>,
    pub task_status: Option<String>,
    pub priority: Option<String>,
    pub due_at: Option<DateTime<FixedOffset>>,
    pub matter_external_id: Option<String>,
    pub assignee_name: Option<String>,
}

impl MirrorFields for TaskFields {
    fn from_snapshot(snapshot: &ExternalSnapshot) -> Result<Self, MergeError> {
        Ok(Self {
            name: snapshot.string_at("/name")?,
            description: snapshot.string_at("/description")?,
            task_status: snapshot.string_at("/status")?,
            priority: snapshot.string_at("/priority")?,
            due_at: snapshot.timestamp_at("/due_at")?,
            matter_external_id: snapshot.string_at("/matter/id")?,
            assignee_name: snapshot.string_at("/assignee/name")?,
        })
    }
}
