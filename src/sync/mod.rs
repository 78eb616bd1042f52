//! # Sync Service
//!
//! Engine-facing API for import runs: start, status, pause and resume. At most
//! one orchestrator task holds a `sync_id` at a time; the claim is made on the
//! job record so a second process is rejected as well.

pub mod orchestrator;
pub mod progress;

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use chrono::{Duration, Utc};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::{DatabaseConnection, DbErr, RuntimeErr};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::api_client::PageSource;
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::merge::{MergingImporter, RecordImporter};
use crate::models::EntityType;
use crate::models::sync_job::{JobStatus, Model};
use crate::repositories::{ContactStore, ExchangeStore, NewSyncJob, SyncJobRepository, TaskStore};

pub use orchestrator::Orchestrator;
pub use progress::{JobErrorEntry, JobStatistics, PageCounts, Progress};

/// Options for [`SyncService::start_sync`].
#[derive(Debug, Clone, Copy, Default)]
pub struct StartOptions {
    /// Continue a paused, crashed or failed run from its last committed cursor
    pub resume: bool,
    /// Use a unique `sync_id` instead of the entity's continuous job id
    pub one_shot: bool,
}

/// Snapshot of a job as reported to callers.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub sync_id: String,
    pub job_id: Uuid,
    pub entity_type: String,
    pub status: JobStatus,
    pub records_processed: u64,
    pub records_created: u64,
    pub records_updated: u64,
    pub records_failed: u64,
    pub progress_percentage: f64,
    pub current_page: u64,
    pub total_records: Option<u64>,
    pub cursor: Option<String>,
    pub errors: Vec<JobErrorEntry>,
    pub start_time: Option<DateTimeWithTimeZone>,
    pub end_time: Option<DateTimeWithTimeZone>,
}

impl SyncStatus {
    fn from_model(model: &Model) -> Self {
        let statistics: JobStatistics =
            serde_json::from_value(model.statistics.clone()).unwrap_or_default();
        let errors: Vec<JobErrorEntry> =
            serde_json::from_value(model.errors.clone()).unwrap_or_default();

        Self {
            sync_id: model.sync_id.clone(),
            job_id: model.id,
            entity_type: model.entity_type.clone(),
            status: model.job_status(),
            records_processed: model.records_processed.max(0) as u64,
            records_created: model.records_created.max(0) as u64,
            records_updated: model.records_updated.max(0) as u64,
            records_failed: model.records_failed.max(0) as u64,
            progress_percentage: statistics.progress_percentage,
            current_page: statistics.current_page,
            total_records: statistics.total_records,
            cursor: model.cursor.clone(),
            errors,
            start_time: model.start_time,
            end_time: model.end_time,
        }
    }
}

/// Continuous job id for an entity type.
pub fn continuous_sync_id(entity_type: EntityType) -> String {
    format!("{}_import", entity_type.as_str())
}

type LiveRuns = Arc<StdMutex<HashMap<String, CancellationToken>>>;

/// Drops the in-process claim when the run task ends, including on panic.
struct LiveGuard {
    live: LiveRuns,
    sync_id: String,
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        lock_live(&self.live).remove(&self.sync_id);
    }
}

fn lock_live(live: &LiveRuns) -> std::sync::MutexGuard<'_, HashMap<String, CancellationToken>> {
    live.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn is_unique_violation(err: &DbErr) -> bool {
    match err {
        DbErr::Exec(RuntimeErr::SqlxError(sea_orm::SqlxError::Database(db_err)))
        | DbErr::Query(RuntimeErr::SqlxError(sea_orm::SqlxError::Database(db_err))) => {
            matches!(db_err.code().as_deref(), Some("23505") | Some("2067") | Some("1555"))
        }
        _ => false,
    }
}

pub struct SyncService {
    db: DatabaseConnection,
    jobs: SyncJobRepository,
    source: Arc<dyn PageSource>,
    importers: HashMap<EntityType, Arc<dyn RecordImporter>>,
    config: SyncConfig,
    live: LiveRuns,
    handles: StdMutex<HashMap<String, JoinHandle<Result<JobStatus, SyncError>>>>,
    start_lock: Mutex<()>,
}

impl SyncService {
    /// Service with the default importers for contacts, matters and tasks.
    pub fn new(db: DatabaseConnection, source: Arc<dyn PageSource>, config: SyncConfig) -> Self {
        let mut importers: HashMap<EntityType, Arc<dyn RecordImporter>> = HashMap::new();
        importers.insert(
            EntityType::Contacts,
            Arc::new(MergingImporter::new(ContactStore)),
        );
        importers.insert(
            EntityType::Matters,
            Arc::new(MergingImporter::new(ExchangeStore)),
        );
        importers.insert(EntityType::Tasks, Arc::new(MergingImporter::new(TaskStore)));

        Self {
            jobs: SyncJobRepository::new(db.clone()),
            db,
            source,
            importers,
            config,
            live: Arc::new(StdMutex::new(HashMap::new())),
            handles: StdMutex::new(HashMap::new()),
            start_lock: Mutex::new(()),
        }
    }

    pub fn jobs(&self) -> &SyncJobRepository {
        &self.jobs
    }

    fn stale_before(&self) -> DateTimeWithTimeZone {
        (Utc::now() - Duration::seconds(self.config.stale_after_seconds as i64)).fixed_offset()
    }

    fn is_live(&self, sync_id: &str) -> bool {
        lock_live(&self.live).contains_key(sync_id)
    }

    fn heartbeat_fresh(&self, job: &Model) -> bool {
        job.heartbeat_at
            .map(|hb| hb >= self.stale_before())
            .unwrap_or(false)
    }

    /// Start (or resume) the import for `entity_type` in a background task.
    ///
    /// Returns the `sync_id` the run is recorded under.
    #[instrument(skip(self), fields(entity = %entity_type))]
    pub async fn start_sync(
        &self,
        entity_type: EntityType,
        options: StartOptions,
    ) -> Result<String, SyncError> {
        let sync_id = if options.one_shot {
            format!("{}_{}", continuous_sync_id(entity_type), Uuid::new_v4())
        } else {
            continuous_sync_id(entity_type)
        };
        self.start_named(&sync_id, entity_type, options.resume).await?;
        Ok(sync_id)
    }

    async fn start_named(
        &self,
        sync_id: &str,
        entity_type: EntityType,
        resume: bool,
    ) -> Result<(), SyncError> {
        let _guard = self.start_lock.lock().await;
        let already_running = || SyncError::AlreadyRunning {
            sync_id: sync_id.to_string(),
        };

        if self.is_live(sync_id) {
            return Err(already_running());
        }

        let job = match self.jobs.find_latest(sync_id).await? {
            None => self.create_job(sync_id, entity_type, None).await?,
            Some(previous) => {
                let status = previous.job_status();
                match status {
                    JobStatus::Running | JobStatus::Pending | JobStatus::Paused => {
                        if status != JobStatus::Paused && self.heartbeat_fresh(&previous) {
                            return Err(already_running());
                        }
                        let stale_before =
                            (status != JobStatus::Paused).then(|| self.stale_before());

                        if resume {
                            let claimed = self
                                .jobs
                                .transition(
                                    &self.db,
                                    previous.id,
                                    status,
                                    JobStatus::Pending,
                                    stale_before,
                                )
                                .await?;
                            if !claimed {
                                return Err(already_running());
                            }
                            info!(job_id = %previous.id, from = %status, "resuming job record");
                            self.jobs.find_by_id(previous.id).await?.ok_or_else(|| {
                                SyncError::NotFound {
                                    sync_id: sync_id.to_string(),
                                }
                            })?
                        } else {
                            let mut progress =
                                Progress::from_model(&previous, self.config.max_errors)?;
                            progress.push_error(
                                progress.next_page(),
                                Some("superseded"),
                                None,
                                "superseded by a new run",
                            );
                            if !self.jobs.supersede(&self.db, &previous, &progress).await? {
                                return Err(already_running());
                            }
                            info!(job_id = %previous.id, from = %status, "superseded job record");
                            self.create_job(sync_id, entity_type, None).await?
                        }
                    }
                    JobStatus::Failed if resume => {
                        self.create_job(sync_id, entity_type, Some(&previous))
                            .await?
                    }
                    JobStatus::Failed | JobStatus::Completed => {
                        self.create_job(sync_id, entity_type, None).await?
                    }
                }
            }
        };

        self.spawn_run(job, entity_type)
    }

    /// Insert a `pending` record, optionally seeded from a failed one.
    async fn create_job(
        &self,
        sync_id: &str,
        entity_type: EntityType,
        seed: Option<&Model>,
    ) -> Result<Model, SyncError> {
        let (progress, start_time) = match seed {
            Some(failed) => {
                let previous = Progress::from_model(failed, self.config.max_errors)?;
                (
                    Progress::seeded_from(&previous, failed.id),
                    failed.start_time.unwrap_or(failed.created_at),
                )
            }
            None => (
                Progress::new(self.config.max_errors),
                Utc::now().fixed_offset(),
            ),
        };

        let created = self
            .jobs
            .create(
                &self.db,
                NewSyncJob {
                    sync_id,
                    entity_type,
                    status: JobStatus::Pending,
                    start_time,
                    progress: &progress,
                },
            )
            .await;

        match created {
            Ok(job) => {
                info!(job_id = %job.id, seeded = seed.is_some(), "created job record");
                Ok(job)
            }
            Err(err) if is_unique_violation(&err) => Err(SyncError::AlreadyRunning {
                sync_id: sync_id.to_string(),
            }),
            Err(err) => Err(err.into()),
        }
    }

    fn spawn_run(&self, job: Model, entity_type: EntityType) -> Result<(), SyncError> {
        let importer = self
            .importers
            .get(&entity_type)
            .cloned()
            .ok_or_else(|| SyncError::UnknownEntityType(entity_type.to_string()))?;
        let orchestrator = Orchestrator::new(
            self.db.clone(),
            Arc::clone(&self.source),
            importer,
            entity_type,
            self.config.clone(),
        );

        let sync_id = job.sync_id.clone();
        let cancel = CancellationToken::new();
        lock_live(&self.live).insert(sync_id.clone(), cancel.clone());
        let guard = LiveGuard {
            live: Arc::clone(&self.live),
            sync_id: sync_id.clone(),
        };

        let handle = tokio::spawn(async move {
            let _guard = guard;
            orchestrator.run(job, cancel).await
        });

        let mut handles = self
            .handles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        handles.retain(|_, h| !h.is_finished());
        handles.insert(sync_id, handle);
        Ok(())
    }

    /// Wait for the in-process run of `sync_id` (if any) and report its status.
    pub async fn wait_for(&self, sync_id: &str) -> Result<SyncStatus, SyncError> {
        let handle = self
            .handles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(sync_id);

        if let Some(handle) = handle {
            match handle.await {
                Ok(Ok(status)) => info!(sync_id, status = %status, "run ended"),
                Ok(Err(err)) => warn!(sync_id, error = %err, "run ended with error"),
                Err(join_err) => {
                    return Err(SyncError::Aborted {
                        sync_id: sync_id.to_string(),
                        reason: join_err.to_string(),
                    });
                }
            }
        }

        self.get_sync_status(sync_id).await
    }

    /// Status of the most recent record for `sync_id`.
    pub async fn get_sync_status(&self, sync_id: &str) -> Result<SyncStatus, SyncError> {
        let job = self
            .jobs
            .find_latest(sync_id)
            .await?
            .ok_or_else(|| SyncError::NotFound {
                sync_id: sync_id.to_string(),
            })?;
        Ok(SyncStatus::from_model(&job))
    }

    /// Ask a live run to pause after its current page commit.
    ///
    /// A record with no live task anywhere (stale heartbeat) is paused directly.
    #[instrument(skip(self))]
    pub async fn pause_sync(&self, sync_id: &str) -> Result<(), SyncError> {
        let job = self
            .jobs
            .find_latest(sync_id)
            .await?
            .ok_or_else(|| SyncError::NotFound {
                sync_id: sync_id.to_string(),
            })?;

        let status = job.job_status();
        match status {
            JobStatus::Paused => Ok(()),
            JobStatus::Running | JobStatus::Pending => {
                self.jobs.request_pause(job.id).await?;

                let token = lock_live(&self.live).get(sync_id).cloned();
                if let Some(token) = token {
                    info!("cancelling in-process run");
                    token.cancel();
                    return Ok(());
                }

                if !self.heartbeat_fresh(&job) {
                    let moved = self
                        .jobs
                        .transition(
                            &self.db,
                            job.id,
                            status,
                            JobStatus::Paused,
                            Some(self.stale_before()),
                        )
                        .await?;
                    if moved {
                        info!(job_id = %job.id, "paused abandoned job record");
                    }
                }
                Ok(())
            }
            JobStatus::Completed | JobStatus::Failed => Err(SyncError::InvalidState {
                sync_id: sync_id.to_string(),
                status: status.to_string(),
                operation: "pause",
            }),
        }
    }

    /// Resume a paused job from its last committed cursor.
    #[instrument(skip(self))]
    pub async fn resume_sync(&self, sync_id: &str) -> Result<(), SyncError> {
        let job = self
            .jobs
            .find_latest(sync_id)
            .await?
            .ok_or_else(|| SyncError::NotFound {
                sync_id: sync_id.to_string(),
            })?;

        let status = job.job_status();
        if status != JobStatus::Paused {
            return Err(SyncError::InvalidState {
                sync_id: sync_id.to_string(),
                status: status.to_string(),
                operation: "resume",
            });
        }

        let entity_type: EntityType = job
            .entity_type
            .parse()
            .map_err(SyncError::UnknownEntityType)?;
        self.start_named(sync_id, entity_type, true).await
    }

    /// Cancel every in-process run; each pauses after its current page.
    pub fn shutdown(&self) {
        for token in lock_live(&self.live).values() {
            token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_continuous_sync_ids_do_not_collide() {
        let ids: Vec<String> = EntityType::ALL.iter().map(|e| continuous_sync_id(*e)).collect();
        assert_eq!(ids, vec!["contacts_import", "matters_import", "tasks_import"]);
    }
}
