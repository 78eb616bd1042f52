//! # Exchange Sync
//!
//! Synchronization engine that mirrors contacts, matters and tasks from an
//! OAuth-protected practice-management API into local tables. It owns the
//! provider credential lifecycle, rate-limited paging, field-precedence merging
//! and resumable, progress-tracked import runs.

pub mod api_client;
pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod merge;
pub mod models;
pub mod oauth;
pub mod repositories;
pub mod sync;
pub mod telemetry;
pub mod token_manager;
pub use migration;
