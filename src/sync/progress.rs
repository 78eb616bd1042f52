//! In-memory progress of one run, mirrored into the sync job row at every commit.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::merge::MergeAction;
use crate::models::sync_job::Model;

/// Contents of the `statistics` column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobStatistics {
    /// Last page whose results are committed; the next fetch is page `current_page + 1`
    #[serde(default)]
    pub current_page: u64,
    /// Total reported by the data API, when it reports one
    pub total_records: Option<u64>,
    #[serde(default)]
    pub progress_percentage: f64,
    /// Records re-observed without changes; counted within `records_updated`
    #[serde(default)]
    pub records_unchanged: u64,
    /// Consecutive failed attempts at the current cursor
    #[serde(default)]
    pub failed_page_attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub records_deactivated: Option<u64>,
    /// Job row this run was seeded from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resumed_from: Option<Uuid>,
}

/// One entry of the bounded `errors` column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobErrorEntry {
    pub page: u64,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
}

/// Per-page tally produced while merging one page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageCounts {
    pub created: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub failed: u64,
}

impl PageCounts {
    pub fn record(&mut self, action: MergeAction) {
        match action {
            MergeAction::Created => self.created += 1,
            MergeAction::Updated => self.updated += 1,
            MergeAction::Unchanged => self.unchanged += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.created + self.updated + self.unchanged + self.failed
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Progress {
    pub cursor: Option<String>,
    pub records_processed: u64,
    pub records_created: u64,
    pub records_updated: u64,
    pub records_failed: u64,
    pub statistics: JobStatistics,
    pub errors: VecDeque<JobErrorEntry>,
    max_errors: usize,
}

impl Progress {
    pub fn new(max_errors: usize) -> Self {
        Self {
            cursor: None,
            records_processed: 0,
            records_created: 0,
            records_updated: 0,
            records_failed: 0,
            statistics: JobStatistics::default(),
            errors: VecDeque::new(),
            max_errors: max_errors.max(1),
        }
    }

    /// Rebuild progress from a stored job row.
    pub fn from_model(model: &Model, max_errors: usize) -> Result<Self, serde_json::Error> {
        let mut progress = Self::with_counters(model, max_errors);
        progress.statistics = serde_json::from_value(model.statistics.clone())?;
        progress.errors = serde_json::from_value(model.errors.clone())?;
        progress.trim_errors();
        Ok(progress)
    }

    /// Like [`Progress::from_model`], but an unreadable `statistics` or `errors`
    /// column starts over empty while cursor and counters are kept.
    pub fn from_columns(model: &Model, max_errors: usize) -> Self {
        let mut progress = Self::with_counters(model, max_errors);
        progress.statistics = serde_json::from_value(model.statistics.clone()).unwrap_or_default();
        progress.errors = serde_json::from_value(model.errors.clone()).unwrap_or_default();
        progress.trim_errors();
        progress
    }

    fn with_counters(model: &Model, max_errors: usize) -> Self {
        Self {
            cursor: model.cursor.clone(),
            records_processed: model.records_processed.max(0) as u64,
            records_created: model.records_created.max(0) as u64,
            records_updated: model.records_updated.max(0) as u64,
            records_failed: model.records_failed.max(0) as u64,
            ..Self::new(max_errors)
        }
    }

    /// Carry cursor and counters of a failed run into a fresh one.
    pub fn seeded_from(previous: &Progress, previous_id: Uuid) -> Self {
        let mut seeded = previous.clone();
        seeded.errors.clear();
        seeded.statistics.failed_page_attempts = 0;
        seeded.statistics.records_deactivated = None;
        seeded.statistics.resumed_from = Some(previous_id);
        seeded
    }

    pub fn next_page(&self) -> u64 {
        self.statistics.current_page + 1
    }

    pub fn push_error(
        &mut self,
        page: u64,
        kind: Option<&str>,
        external_id: Option<String>,
        message: impl Into<String>,
    ) {
        self.errors.push_back(JobErrorEntry {
            page,
            message: message.into(),
            timestamp: Utc::now(),
            kind: kind.map(str::to_string),
            external_id,
        });
        self.trim_errors();
    }

    fn trim_errors(&mut self) {
        while self.errors.len() > self.max_errors {
            self.errors.pop_front();
        }
    }

    /// Fold a merged page into the totals and advance the cursor.
    pub fn apply_page(
        &mut self,
        counts: PageCounts,
        next_cursor: Option<String>,
        total_records: Option<u64>,
    ) {
        self.records_created += counts.created;
        self.records_updated += counts.updated + counts.unchanged;
        self.records_failed += counts.failed;
        self.records_processed += counts.total();

        self.statistics.records_unchanged += counts.unchanged;
        self.statistics.current_page += 1;
        self.statistics.failed_page_attempts = 0;
        if total_records.is_some() {
            self.statistics.total_records = total_records;
        }
        self.cursor = next_cursor;
        self.statistics.progress_percentage = self.running_percentage();
    }

    /// Count a failed attempt at the current cursor; returns the consecutive count.
    pub fn record_failed_attempt(&mut self) -> u32 {
        self.statistics.failed_page_attempts += 1;
        self.statistics.failed_page_attempts
    }

    pub fn mark_completed(&mut self) {
        self.statistics.progress_percentage = 100.0;
    }

    /// `processed / total` when the total is known, otherwise a page-count estimate
    /// that approaches but never reaches 100 before completion.
    pub fn running_percentage(&self) -> f64 {
        let pct = match self.statistics.total_records {
            Some(0) => 99.0,
            Some(total) => self.records_processed as f64 / total as f64 * 100.0,
            None => {
                let pages = self.statistics.current_page as f64;
                pages / (pages + 1.0) * 100.0
            }
        };
        round2(pct.clamp(0.0, 99.0))
    }

    pub fn statistics_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.statistics).unwrap_or_default()
    }

    pub fn errors_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.errors).unwrap_or_default()
    }

    pub fn counters_consistent(&self) -> bool {
        self.records_processed == self.records_created + self.records_updated + self.records_failed
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
