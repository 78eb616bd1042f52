//! Error taxonomy for the sync engine.
//!
//! Each layer owns one enum. The orchestrator relies on the classification
//! helpers on [`ApiClientError`] to decide between a page-level failure and a
//! run-ending one.

use sea_orm::DbErr;
use thiserror::Error;

use crate::crypto::CryptoError;

/// Upstream response bodies are clipped to this many characters before they are
/// stored in errors or logs.
pub const MAX_BODY_CHARS: usize = 200;

/// Truncate an upstream body on a char boundary.
pub fn truncate_body(body: &str) -> String {
    match body.char_indices().nth(MAX_BODY_CHARS) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}

/// Failures surfaced by the token manager.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("no usable credential for provider '{provider}'; re-authorization required")]
    NoToken { provider: String },
    #[error("token refresh for provider '{provider}' failed after {attempts} attempt(s): {reason}")]
    RefreshFailed {
        provider: String,
        attempts: u32,
        reason: String,
    },
    #[error("authorization state is unknown, expired, or already used")]
    InvalidState,
    #[error("authorization code exchange failed: {0}")]
    AuthorizationFailed(String),
    #[error("token store error: {0}")]
    Database(#[from] DbErr),
    #[error("token encryption error: {0}")]
    Crypto(#[from] CryptoError),
}

/// Failures surfaced by the data API client for a single page request.
#[derive(Debug, Error)]
pub enum ApiClientError {
    /// The credential was rejected twice in a row.
    #[error("credential rejected by the data API: {message}")]
    Unauthorized { message: String },
    #[error("rate limited after {attempts} attempt(s) (retry after {retry_after_secs:?}s)")]
    RateLimited {
        retry_after_secs: Option<u64>,
        attempts: u32,
    },
    #[error("transient failure after {attempts} attempt(s): {message}")]
    Transient { message: String, attempts: u32 },
    #[error("request rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("malformed page response: {0}")]
    Malformed(String),
    #[error(transparent)]
    Token(#[from] TokenError),
}

impl ApiClientError {
    /// No page can succeed without a working credential.
    pub fn is_fatal_for_run(&self) -> bool {
        matches!(self, Self::Unauthorized { .. } | Self::Token(_))
    }

    /// Whether the same page may be attempted again later.
    pub fn is_retryable(&self) -> bool {
        !self.is_fatal_for_run()
    }

    /// Stable label for metrics and stored error entries.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unauthorized { .. } => "unauthorized",
            Self::RateLimited { .. } => "rate_limited",
            Self::Transient { .. } => "transient",
            Self::Rejected { .. } => "rejected",
            Self::Malformed(_) => "malformed",
            Self::Token(TokenError::NoToken { .. }) => "no_token",
            Self::Token(TokenError::RefreshFailed { .. }) => "refresh_failed",
            Self::Token(_) => "token",
        }
    }
}

/// A single external record could not be mapped onto its local entity.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MergeError {
    #[error("record has no usable external id")]
    MissingExternalId,
    #[error("field '{field}' is malformed: {reason}")]
    MalformedField { field: String, reason: String },
}

impl MergeError {
    pub fn malformed(field: &str, reason: impl Into<String>) -> Self {
        Self::MalformedField {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

/// Per-record import failure; recorded against the page, never fatal to the job.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error(transparent)]
    Merge(#[from] MergeError),
    #[error("failed to persist record: {0}")]
    Database(#[from] DbErr),
}

/// Errors returned by the engine-facing sync API.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("sync '{sync_id}' is already running")]
    AlreadyRunning { sync_id: String },
    #[error("sync '{sync_id}' not found")]
    NotFound { sync_id: String },
    #[error("cannot {operation} sync '{sync_id}' while it is {status}")]
    InvalidState {
        sync_id: String,
        status: String,
        operation: &'static str,
    },
    #[error("unknown entity type '{0}'")]
    UnknownEntityType(String),
    #[error("sync '{sync_id}' lost its claim on the job record")]
    LeaseLost { sync_id: String },
    #[error("sync '{sync_id}' task aborted: {reason}")]
    Aborted { sync_id: String, reason: String },
    #[error("progress store error: {0}")]
    Database(#[from] DbErr),
    #[error("progress payload error: {0}")]
    Serialization(#[from] serde_json::Error),
}
