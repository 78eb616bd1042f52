//! Resolves local identity for each external record, merges, and persists.

use async_trait::async_trait;
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::{DatabaseTransaction, DbErr};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use super::{ExternalSnapshot, LocalState, MergeAction, MirrorFields, merge};
use crate::error::ImportError;

/// Persistence contract for one local entity table.
///
/// Writes only ever touch identity, mirror columns, the raw snapshot and the
/// sync bookkeeping columns.
#[async_trait]
pub trait EntityStore: Send + Sync {
    type Fields: MirrorFields;

    async fn find_by_external_id(
        &self,
        txn: &DatabaseTransaction,
        external_id: &str,
    ) -> Result<Option<LocalState<Self::Fields>>, DbErr>;

    /// Oldest row with no external id whose secondary key matches.
    async fn find_unlinked_by_secondary_key(
        &self,
        txn: &DatabaseTransaction,
        key: &str,
    ) -> Result<Option<LocalState<Self::Fields>>, DbErr>;

    async fn insert(
        &self,
        txn: &DatabaseTransaction,
        entity: &LocalState<Self::Fields>,
        synced_at: DateTimeWithTimeZone,
    ) -> Result<(), DbErr>;

    async fn update_mirror(
        &self,
        txn: &DatabaseTransaction,
        entity: &LocalState<Self::Fields>,
        synced_at: DateTimeWithTimeZone,
    ) -> Result<(), DbErr>;

    async fn touch(
        &self,
        txn: &DatabaseTransaction,
        id: Uuid,
        synced_at: DateTimeWithTimeZone,
    ) -> Result<(), DbErr>;

    /// Deactivate linked rows whose `last_synced_at` predates `since`.
    async fn deactivate_unseen(
        &self,
        txn: &DatabaseTransaction,
        since: DateTimeWithTimeZone,
    ) -> Result<u64, DbErr>;
}

/// Object-safe entry point used by the orchestrator, one per entity type.
#[async_trait]
pub trait RecordImporter: Send + Sync {
    async fn import(
        &self,
        txn: &DatabaseTransaction,
        raw: &JsonValue,
        synced_at: DateTimeWithTimeZone,
    ) -> Result<MergeAction, ImportError>;

    async fn deactivate_unseen(
        &self,
        txn: &DatabaseTransaction,
        since: DateTimeWithTimeZone,
    ) -> Result<u64, DbErr>;
}

/// [`RecordImporter`] backed by the generic merge rules and an [`EntityStore`].
pub struct MergingImporter<S> {
    store: S,
}

impl<S: EntityStore> MergingImporter<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: EntityStore> RecordImporter for MergingImporter<S> {
    async fn import(
        &self,
        txn: &DatabaseTransaction,
        raw: &JsonValue,
        synced_at: DateTimeWithTimeZone,
    ) -> Result<MergeAction, ImportError> {
        let snapshot = ExternalSnapshot::from_raw(raw.clone())?;

        let mut local = self
            .store
            .find_by_external_id(txn, &snapshot.external_id)
            .await?;

        if local.is_none() {
            let fields = S::Fields::from_snapshot(&snapshot)?;
            if let Some(key) = fields.secondary_key() {
                local = self.store.find_unlinked_by_secondary_key(txn, &key).await?;
                if let Some(ref matched) = local {
                    tracing::debug!(
                        external_id = %snapshot.external_id,
                        local_id = %matched.id,
                        "linked external record to existing local row by secondary key"
                    );
                }
            }
        }

        let outcome = merge(local.as_ref(), &snapshot)?;
        match outcome.action {
            MergeAction::Created => self.store.insert(txn, &outcome.entity, synced_at).await?,
            MergeAction::Updated => {
                self.store
                    .update_mirror(txn, &outcome.entity, synced_at)
                    .await?
            }
            MergeAction::Unchanged => self.store.touch(txn, outcome.entity.id, synced_at).await?,
        }

        Ok(outcome.action)
    }

    async fn deactivate_unseen(
        &self,
        txn: &DatabaseTransaction,
        since: DateTimeWithTimeZone,
    ) -> Result<u64, DbErr> {
        self.store.deactivate_unseen(txn, since).await
    }
}
