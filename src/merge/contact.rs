//! Contact mirror fields.

use super::{ExternalSnapshot, MirrorFields};
use crate::error::MergeError;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContactFields {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub contact_type: Option<String>,
    pub company_name: Option<String>,
}

impl MirrorFields for ContactFields {
    fn from_snapshot(snapshot: &ExternalSnapshot) -> Result<Self, MergeError> {
        let first_name = snapshot.string_at("/first_name")?;
        let last_name = snapshot.string_at("/last_name")?;

        // Companies only carry `name`; people may only carry first/last.
        let display_name = match snapshot.string_at("/name")? {
            Some(name) => Some(name),
            None => {
                let joined = [first_name.as_deref(), last_name.as_deref()]
                    .into_iter()
                    .flatten()
                    .collect::<Vec<_>>()
                    .join(" ");
                (!joined.is_empty()).then_some(joined)
            }
        };

        let email = snapshot.string_at("/primary_email_address")?;
        if let Some(address) = email.as_deref().filter(|a| !a.contains('@')) {
            return Err(MergeError::malformed(
                "primary_email_address",
                format!("'{address}' is not an email address"),
            ));
        }

        Ok(Self {
            first_name,
            last_name,
            display_name,
            email,
            phone: snapshot.string_at("/primary_phone_number")?,
            contact_type: snapshot.string_at("/type")?,
            company_name: snapshot.string_at("/company/name")?,
        })
    }

    fn secondary_key(&self) -> Option<String> {
        self.email.as_ref().map(|email| email.to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::{LocalState, MergeAction, merge};
    use serde_json::json;

    fn snapshot(value: serde_json::Value) -> ExternalSnapshot {
        ExternalSnapshot::from_raw(value).unwrap()
    }

    #[test]
    fn test_person_contact_mapping() {
        let fields = ContactFields::from_snapshot(&snapshot(json!({
            "id": 10,
            "first_name": "Ada",
            "last_name": "Lovelace",
            "primary_email_address": "Ada@Example.com",
            "primary_phone_number": "+1 555 0100",
            "type": "Person",
            "company": {"name": "Analytical Engines"}
        })))
        .unwrap();

        assert_eq!(fields.display_name.as_deref(), Some("Ada Lovelace"));
        assert_eq!(fields.company_name.as_deref(), Some("Analytical Engines"));
        assert_eq!(fields.secondary_key().as_deref(), Some("ada@example.com"));
    }

    #[test]
    fn test_company_contact_uses_name() {
        let fields = ContactFields::from_snapshot(&snapshot(json!({
            "id": 11,
            "name": "Acme Holdings LLC",
            "type": "Company"
        })))
        .unwrap();

        assert_eq!(fields.display_name.as_deref(), Some("Acme Holdings LLC"));
        assert_eq!(fields.secondary_key(), None);
    }

    #[test]
    fn test_invalid_email_is_malformed() {
        let result = ContactFields::from_snapshot(&snapshot(json!({
            "id": 12,
            "primary_email_address": "not-an-email"
        })));
        assert!(matches!(result, Err(MergeError::MalformedField { .. })));
    }

    #[test]
    fn test_merge_is_idempotent() {
        let s = snapshot(json!({"id": 1, "first_name": "Grace", "last_name": "Hopper"}));
        let first = merge::<ContactFields>(None, &s).unwrap();
        assert_eq!(first.action, MergeAction::Created);

        let second = merge(Some(&first.entity), &s).unwrap();
        assert_eq!(second.action, MergeAction::Unchanged);
        assert_eq!(second.entity, first.entity);
    }

    #[test]
    fn test_changed_snapshot_updates_mirror_and_raw() {
        let original = snapshot(json!({"id": 1, "first_name": "Grace"}));
        let created = merge::<ContactFields>(None, &original).unwrap().entity;

        let changed = snapshot(json!({"id": 1, "first_name": "Grace", "last_name": "Hopper"}));
        let outcome = merge(Some(&created), &changed).unwrap();
        assert_eq!(outcome.action, MergeAction::Updated);
        assert_eq!(outcome.entity.id, created.id);
        assert_eq!(outcome.entity.fields.last_name.as_deref(), Some("Hopper"));
        assert_eq!(outcome.entity.raw_external, Some(changed.raw.clone()));
    }

    #[test]
    fn test_secondary_match_attaches_external_id() {
        let local = LocalState {
            id: uuid::Uuid::new_v4(),
            external_id: None,
            fields: ContactFields {
                email: Some("ada@example.com".to_string()),
                ..ContactFields::default()
            },
            raw_external: None,
            is_active: true,
        };

        let s = snapshot(json!({"id": 77, "primary_email_address": "ADA@example.com"}));
        let outcome = merge(Some(&local), &s).unwrap();
        assert_eq!(outcome.action, MergeAction::Updated);
        assert_eq!(outcome.entity.id, local.id);
        assert_eq!(outcome.entity.external_id.as_deref(), Some("77"));
    }

    #[test]
    fn test_raw_only_change_is_still_an_update() {
        let s1 = snapshot(json!({"id": 1, "first_name": "Ada", "updated_at": "2024-01-01T00:00:00Z"}));
        let s2 = snapshot(json!({"id": 1, "first_name": "Ada", "updated_at": "2024-02-01T00:00:00Z"}));
        let created = merge::<ContactFields>(None, &s1).unwrap().entity;

        let outcome = merge(Some(&created), &s2).unwrap();
        assert_eq!(outcome.action, MergeAction::Updated);
        assert_eq!(outcome.entity.fields, created.fields);
    }
}
