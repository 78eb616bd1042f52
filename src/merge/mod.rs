//! Entity merger: maps external records onto local rows.
//!
//! Each entity type declares its mirror fields as a plain struct implementing
//! [`MirrorFields`]. Local system-of-record columns never appear in those
//! structs, so a merge has no way to write them. The raw snapshot travels next
//! to the mirror fields and is stored verbatim on every create or update.

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::MergeError;

pub mod contact;
pub mod importer;
pub mod matter;
pub mod task;

pub use contact::ContactFields;
pub use importer::{EntityStore, MergingImporter, RecordImporter};
pub use matter::MatterFields;
pub use task::TaskFields;

/// One external record as returned by the data API, with its identifier pulled out.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalSnapshot {
    pub external_id: String,
    pub raw: JsonValue,
}

impl ExternalSnapshot {
    /// Wrap a raw record. The `id` may be a number or a non-empty string.
    pub fn from_raw(raw: JsonValue) -> Result<Self, MergeError> {
        let external_id = match raw.get("id") {
            Some(JsonValue::Number(n)) => n.to_string(),
            Some(JsonValue::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
            _ => return Err(MergeError::MissingExternalId),
        };
        Ok(Self { external_id, raw })
    }

    /// Optional scalar at a JSON pointer, rendered as a trimmed string.
    ///
    /// Missing, null and blank values are `None`; objects and arrays are malformed.
    pub fn string_at(&self, pointer: &str) -> Result<Option<String>, MergeError> {
        match self.raw.pointer(pointer) {
            None | Some(JsonValue::Null) => Ok(None),
            Some(JsonValue::String(s)) => {
                let trimmed = s.trim();
                Ok((!trimmed.is_empty()).then(|| trimmed.to_string()))
            }
            Some(JsonValue::Number(n)) => Ok(Some(n.to_string())),
            Some(JsonValue::Bool(b)) => Ok(Some(b.to_string())),
            Some(_) => Err(MergeError::malformed(
                field_name(pointer),
                "expected a scalar value",
            )),
        }
    }

    /// Optional `YYYY-MM-DD` date at a JSON pointer.
    pub fn date_at(&self, pointer: &str) -> Result<Option<NaiveDate>, MergeError> {
        match self.string_at(pointer)? {
            None => Ok(None),
            Some(value) => NaiveDate::parse_from_str(&value, "%Y-%m-%d")
                .map(Some)
                .map_err(|e| MergeError::malformed(field_name(pointer), e.to_string())),
        }
    }

    /// Optional RFC 3339 timestamp at a JSON pointer, normalised to UTC.
    pub fn timestamp_at(&self, pointer: &str) -> Result<Option<DateTime<FixedOffset>>, MergeError> {
        match self.string_at(pointer)? {
            None => Ok(None),
            Some(value) => DateTime::parse_from_rfc3339(&value)
                .map(|ts| Some(ts.with_timezone(&Utc).fixed_offset()))
                .map_err(|e| MergeError::malformed(field_name(pointer), e.to_string())),
        }
    }
}

fn field_name(pointer: &str) -> &str {
    pointer.trim_start_matches('/')
}

/// Mirror-field projection of one entity type.
pub trait MirrorFields: Clone + PartialEq + Send + Sync + 'static {
    /// Map an external snapshot onto mirror values.
    fn from_snapshot(snapshot: &ExternalSnapshot) -> Result<Self, MergeError>;

    /// Fallback identity key, consulted only for local rows without an external id.
    fn secondary_key(&self) -> Option<String> {
        None
    }
}

/// The sync-visible part of a local row: identity, mirror values and raw snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalState<F> {
    pub id: Uuid,
    pub external_id: Option<String>,
    pub fields: F,
    pub raw_external: Option<JsonValue>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeAction {
    Created,
    Updated,
    Unchanged,
}

impl MergeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeAction::Created => "created",
            MergeAction::Updated => "updated",
            MergeAction::Unchanged => "unchanged",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome<F> {
    pub action: MergeAction,
    pub entity: LocalState<F>,
}

/// Merge a snapshot into the existing local row, if any.
///
/// Mirror values and the raw snapshot are replaced wholesale. A row found by a
/// secondary key picks up the external id. Merging the same snapshot twice
/// yields [`MergeAction::Unchanged`] the second time.
pub fn merge<F: MirrorFields>(
    local: Option<&LocalState<F>>,
    snapshot: &ExternalSnapshot,
) -> Result<MergeOutcome<F>, MergeError> {
    let fields = F::from_snapshot(snapshot)?;

    let Some(local) = local else {
        return Ok(MergeOutcome {
            action: MergeAction::Created,
            entity: LocalState {
                id: Uuid::new_v4(),
                external_id: Some(snapshot.external_id.clone()),
                fields,
                raw_external: Some(snapshot.raw.clone()),
                is_active: true,
            },
        });
    };

    let candidate = LocalState {
        id: local.id,
        external_id: Some(snapshot.external_id.clone()),
        fields,
        raw_external: Some(snapshot.raw.clone()),
        is_active: true,
    };

    let action = if &candidate == local {
        MergeAction::Unchanged
    } else {
        MergeAction::Updated
    };

    Ok(MergeOutcome {
        action,
        entity: candidate,
    })
}
