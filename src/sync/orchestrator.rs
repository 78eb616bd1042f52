//! Page loop for one sync job record.
//!
//! Each page is merged and its progress committed in a single transaction
//! before the next fetch. Records merge under their own savepoint so one bad
//! record never poisons the page.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use metrics::{counter, histogram};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::{DatabaseConnection, DatabaseTransaction, TransactionTrait};
use serde_json::Value as JsonValue;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::progress::{PageCounts, Progress};
use crate::api_client::{Page, PageSource};
use crate::config::SyncConfig;
use crate::error::{ImportError, SyncError};
use crate::merge::RecordImporter;
use crate::models::EntityType;
use crate::models::sync_job::{JobStatus, Model};
use crate::repositories::SyncJobRepository;

/// Everything one run needs; cheap to clone into a spawned task.
#[derive(Clone)]
pub struct Orchestrator {
    db: DatabaseConnection,
    jobs: SyncJobRepository,
    source: Arc<dyn PageSource>,
    importer: Arc<dyn RecordImporter>,
    entity_type: EntityType,
    config: SyncConfig,
}

enum Step {
    Continue,
    Finished(JobStatus),
}

fn external_id_of(raw: &JsonValue) -> Option<String> {
    match raw.get("id")? {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl Orchestrator {
    pub fn new(
        db: DatabaseConnection,
        source: Arc<dyn PageSource>,
        importer: Arc<dyn RecordImporter>,
        entity_type: EntityType,
        config: SyncConfig,
    ) -> Self {
        Self {
            jobs: SyncJobRepository::new(db.clone()),
            db,
            source,
            importer,
            entity_type,
            config,
        }
    }

    /// Drive a claimed (`pending`) job until it completes, pauses or fails.
    ///
    /// Failures are written to the job record; `Err` is only returned when the
    /// record itself could not be updated or was taken over by someone else.
    /// Every write is fenced on `job.lease_id`, the lease issued when the row
    /// was claimed.
    #[instrument(skip_all, fields(sync_id = %job.sync_id, job_id = %job.id, entity = %self.entity_type))]
    pub async fn run(&self, job: Model, cancel: CancellationToken) -> Result<JobStatus, SyncError> {
        let started = Instant::now();
        let outcome = self.drive(&job, &cancel).await;

        let status = match outcome {
            Ok(status) => status,
            Err(SyncError::LeaseLost { sync_id }) => {
                warn!("job record left running underneath this run; stopping");
                counter!("sync_lease_lost_total", "entity" => self.entity_type.as_str())
                    .increment(1);
                return Err(SyncError::LeaseLost { sync_id });
            }
            Err(err) => {
                error!(error = %err, "sync run aborted");
                self.fail_from_last_commit(&job, &err.to_string()).await?;
                JobStatus::Failed
            }
        };

        counter!(
            "sync_jobs_finished_total",
            "entity" => self.entity_type.as_str(),
            "status" => status.as_str()
        )
        .increment(1);
        histogram!("sync_job_duration_ms", "entity" => self.entity_type.as_str())
            .record(started.elapsed().as_secs_f64() * 1_000.0);
        info!(status = %status, elapsed_ms = started.elapsed().as_millis() as u64, "sync run finished");

        Ok(status)
    }

    async fn drive(&self, job: &Model, cancel: &CancellationToken) -> Result<JobStatus, SyncError> {
        let lease_lost = || SyncError::LeaseLost {
            sync_id: job.sync_id.clone(),
        };

        if !self.jobs.begin_run(&self.db, job.id, job.lease_id).await? {
            return Err(lease_lost());
        }

        let mut progress = Progress::from_model(job, self.config.max_errors)?;
        let start_time = job.start_time.unwrap_or(job.created_at);
        info!(
            cursor = ?progress.cursor,
            records_processed = progress.records_processed,
            next_page = progress.next_page(),
            "sync run started"
        );

        loop {
            if cancel.is_cancelled() || self.jobs.pause_requested(&self.db, job.id).await? {
                return self.pause(job, &progress).await;
            }

            let page_no = progress.next_page();
            let fetched = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(page = page_no, "cancelled while fetching; last commit stands");
                    return self.pause(job, &progress).await;
                }
                fetched = self.source.fetch_page(self.entity_type, progress.cursor.as_deref()) => fetched,
            };

            let page = match fetched {
                Ok(page) => page,
                Err(err) if err.is_fatal_for_run() => {
                    error!(page = page_no, error = %err, "credential failure; failing run");
                    progress.push_error(page_no, Some(err.kind()), None, err.to_string());
                    return self.finish(job, JobStatus::Failed, &progress).await;
                }
                Err(err) => {
                    let attempts = progress.record_failed_attempt();
                    warn!(page = page_no, attempts, error = %err, "page fetch failed");
                    progress.push_error(page_no, Some(err.kind()), None, err.to_string());
                    counter!(
                        "sync_page_failures_total",
                        "entity" => self.entity_type.as_str(),
                        "kind" => err.kind()
                    )
                    .increment(1);

                    if attempts >= self.config.max_page_attempts {
                        error!(page = page_no, attempts, "page attempts exhausted; failing run");
                        return self.finish(job, JobStatus::Failed, &progress).await;
                    }
                    if !self
                        .jobs
                        .commit_progress(&self.db, job.id, job.lease_id, &progress)
                        .await?
                    {
                        return Err(lease_lost());
                    }
                    continue;
                }
            };

            match self.commit_page(job, &mut progress, page, start_time).await? {
                Step::Continue => {}
                Step::Finished(status) => return Ok(status),
            }
        }
    }

    /// Merge one page and commit it together with the advanced cursor.
    async fn commit_page(
        &self,
        job: &Model,
        progress: &mut Progress,
        page: Page,
        start_time: DateTimeWithTimeZone,
    ) -> Result<Step, SyncError> {
        let page_started = Instant::now();
        let page_no = progress.next_page();
        let synced_at = Utc::now().fixed_offset();

        let txn = self.db.begin().await?;
        let counts = self.merge_records(&txn, progress, page_no, &page.records, synced_at).await?;
        let last_page = page.next_page_token.is_none();
        progress.apply_page(counts, page.next_page_token, page.total_records);

        let committed = if last_page {
            if self.config.deactivate_missing {
                let deactivated = self.importer.deactivate_unseen(&txn, start_time).await?;
                progress.statistics.records_deactivated = Some(deactivated);
                info!(deactivated, "deactivated records not seen by this run");
            }
            progress.mark_completed();
            self.jobs
                .finish(&txn, job.id, job.lease_id, JobStatus::Completed, progress)
                .await?
        } else {
            self.jobs
                .commit_progress(&txn, job.id, job.lease_id, progress)
                .await?
        };

        if !committed {
            txn.rollback().await?;
            return Err(SyncError::LeaseLost {
                sync_id: job.sync_id.clone(),
            });
        }
        txn.commit().await?;

        let entity = self.entity_type.as_str();
        counter!("sync_pages_committed_total", "entity" => entity).increment(1);
        counter!("sync_records_total", "entity" => entity, "action" => "created")
            .increment(counts.created);
        counter!("sync_records_total", "entity" => entity, "action" => "updated")
            .increment(counts.updated);
        counter!("sync_records_total", "entity" => entity, "action" => "unchanged")
            .increment(counts.unchanged);
        counter!("sync_records_total", "entity" => entity, "action" => "failed")
            .increment(counts.failed);
        histogram!("sync_page_duration_ms", "entity" => entity)
            .record(page_started.elapsed().as_secs_f64() * 1_000.0);

        debug!(
            page = page_no,
            created = counts.created,
            updated = counts.updated,
            unchanged = counts.unchanged,
            failed = counts.failed,
            progress = progress.statistics.progress_percentage,
            "page committed"
        );

        if last_page {
            Ok(Step::Finished(JobStatus::Completed))
        } else {
            Ok(Step::Continue)
        }
    }

    async fn merge_records(
        &self,
        txn: &DatabaseTransaction,
        progress: &mut Progress,
        page_no: u64,
        records: &[JsonValue],
        synced_at: DateTimeWithTimeZone,
    ) -> Result<PageCounts, SyncError> {
        let mut counts = PageCounts::default();

        for raw in records {
            let savepoint = txn.begin().await?;
            match self.importer.import(&savepoint, raw, synced_at).await {
                Ok(action) => {
                    savepoint.commit().await?;
                    counts.record(action);
                }
                Err(err) => {
                    savepoint.rollback().await?;
                    counts.failed += 1;
                    let kind = match err {
                        ImportError::Merge(_) => "merge",
                        ImportError::Database(_) => "database",
                    };
                    let external_id = external_id_of(raw);
                    warn!(page = page_no, external_id = ?external_id, error = %err, "record failed to merge");
                    progress.push_error(page_no, Some(kind), external_id, err.to_string());
                }
            }
        }

        Ok(counts)
    }

    async fn pause(&self, job: &Model, progress: &Progress) -> Result<JobStatus, SyncError> {
        info!(cursor = ?progress.cursor, "pausing after last committed page");
        self.finish(job, JobStatus::Paused, progress).await
    }

    async fn finish(
        &self,
        job: &Model,
        status: JobStatus,
        progress: &Progress,
    ) -> Result<JobStatus, SyncError> {
        if self
            .jobs
            .finish(&self.db, job.id, job.lease_id, status, progress)
            .await?
        {
            Ok(status)
        } else {
            Err(SyncError::LeaseLost {
                sync_id: job.sync_id.clone(),
            })
        }
    }

    /// Fail the job from its last durable state, appending `reason`.
    async fn fail_from_last_commit(&self, job: &Model, reason: &str) -> Result<(), SyncError> {
        let Some(current) = self.jobs.find_by_id(job.id).await? else {
            return Ok(());
        };
        let mut progress = Progress::from_columns(&current, self.config.max_errors);
        progress.push_error(progress.next_page(), Some("internal"), None, reason);

        if !self
            .jobs
            .finish(&self.db, job.id, job.lease_id, JobStatus::Failed, &progress)
            .await?
        {
            warn!(status = %current.status, "job was no longer running; leaving it as is");
        }
        Ok(())
    }
}
