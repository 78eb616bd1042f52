//! # Token Manager
//!
//! Owns every mutation of the token store. Callers ask for a valid access token
//! and either get one or a [`TokenError`]; refreshes for a provider are
//! serialized through a per-provider mutex with a re-read after acquiring it,
//! so racing callers reuse the refreshed row instead of exchanging twice.
//!
//! The same serialized path backs the background refresher ([`TokenManager::run`]),
//! the forced refresh used after a 401, and the authorization bootstrap.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use metrics::{counter, histogram};
use tokio::sync::Mutex;
use tokio::time::{Duration as TokioDuration, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use crate::config::TokenRefreshConfig;
use crate::error::TokenError;
use crate::oauth::{TokenEndpoint, TokenGrant};
use crate::repositories::{
    NewToken, OAuthStateRepository, RefreshMetadata, StoredToken, TokenRepository,
};

/// Lifetime assumed when the token endpoint omits `expires_in`.
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;

/// Upper bound on a provider-reported `expires_in`.
const MAX_TOKEN_LIFETIME_SECS: i64 = 366 * 24 * 3600;

/// `last_used_at` is written at most this often on the fast path.
const LAST_USED_RESOLUTION_SECS: i64 = 60;

/// What the data API client needs from the credential layer.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// A non-expired access token for `provider`.
    async fn get_valid_access_token(&self, provider: &str) -> Result<String, TokenError>;

    /// Replace `rejected` after the API refused it. A no-op when another caller
    /// already replaced it; returns the token to retry with.
    async fn force_refresh(&self, provider: &str, rejected: &str) -> Result<String, TokenError>;
}

/// Result of [`TokenManager::begin_authorization`].
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub url: Url,
    pub state: String,
    pub expires_at: DateTime<Utc>,
}

pub struct TokenManager {
    tokens: TokenRepository,
    states: OAuthStateRepository,
    endpoint: Arc<dyn TokenEndpoint>,
    config: TokenRefreshConfig,
    state_ttl_minutes: i64,
    provider_locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl TokenManager {
    pub fn new(
        tokens: TokenRepository,
        states: OAuthStateRepository,
        endpoint: Arc<dyn TokenEndpoint>,
        config: TokenRefreshConfig,
        state_ttl_minutes: i64,
    ) -> Self {
        Self {
            tokens,
            states,
            endpoint,
            config,
            state_ttl_minutes,
            provider_locks: StdMutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &TokenRepository {
        &self.tokens
    }

    fn provider_lock(&self, provider: &str) -> Arc<Mutex<()>> {
        let mut locks = self
            .provider_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .entry(provider.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn safety_margin(&self) -> Duration {
        Duration::seconds(self.config.safety_margin_seconds as i64)
    }

    fn is_fresh(&self, token: &StoredToken, now: DateTime<Utc>) -> bool {
        token.expires_at > now + self.safety_margin()
    }

    async fn note_use(&self, token: &StoredToken, now: DateTime<Utc>) -> Result<(), TokenError> {
        if needs_use_stamp(token.last_used_at, now) {
            self.tokens.touch_last_used(token.id).await?;
        }
        Ok(())
    }

    /// Fast path: no lock and no network call while the token is outside the margin.
    #[instrument(skip(self))]
    pub async fn get_valid_access_token(&self, provider: &str) -> Result<String, TokenError> {
        if let Some(token) = self.tokens.find_active(provider).await? {
            let now = Utc::now();
            if self.is_fresh(&token, now) {
                self.note_use(&token, now).await?;
                return Ok(token.access_token);
            }
        }

        let lock = self.provider_lock(provider);
        let _guard = lock.lock().await;

        // Another caller may have refreshed while we waited.
        let Some(token) = self.tokens.find_active(provider).await? else {
            return Err(TokenError::NoToken {
                provider: provider.to_string(),
            });
        };

        let now = Utc::now();
        if self.is_fresh(&token, now) {
            self.note_use(&token, now).await?;
            return Ok(token.access_token);
        }

        if token.refresh_token.is_none() {
            if token.expires_at > now {
                debug!(provider, "token inside safety margin but cannot be renewed; using it");
                self.note_use(&token, now).await?;
                return Ok(token.access_token);
            }
            warn!(provider, "access token expired and no refresh token is stored");
            return Err(TokenError::NoToken {
                provider: provider.to_string(),
            });
        }

        self.refresh_locked(token).await
    }

    /// Refresh regardless of expiry unless the rejected token was already replaced.
    #[instrument(skip(self, rejected))]
    pub async fn force_refresh(&self, provider: &str, rejected: &str) -> Result<String, TokenError> {
        let lock = self.provider_lock(provider);
        let _guard = lock.lock().await;

        let Some(token) = self.tokens.find_active(provider).await? else {
            return Err(TokenError::NoToken {
                provider: provider.to_string(),
            });
        };

        if token.access_token != rejected {
            debug!(provider, "rejected token already replaced; reusing current one");
            return Ok(token.access_token);
        }

        if token.refresh_token.is_none() {
            warn!(provider, "access token rejected and no refresh token is stored");
            return Err(TokenError::NoToken {
                provider: provider.to_string(),
            });
        }

        self.refresh_locked(token).await
    }

    /// Exchange the refresh token with bounded retries. Caller holds the provider lock.
    async fn refresh_locked(&self, token: StoredToken) -> Result<String, TokenError> {
        let provider = token.provider.clone();
        let Some(refresh_token) = token.refresh_token.clone() else {
            return Err(TokenError::NoToken { provider });
        };

        let started = Instant::now();
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            counter!("token_refresh_attempts_total", "provider" => provider.clone()).increment(1);

            match self.endpoint.refresh(&refresh_token).await {
                Ok(grant) => {
                    histogram!("token_refresh_duration_ms")
                        .record(started.elapsed().as_secs_f64() * 1_000.0);
                    return self.install_refreshed(&token, &refresh_token, grant).await;
                }
                Err(err) if err.is_permanent() || attempt >= max_attempts => {
                    counter!("token_refresh_failure_total", "provider" => provider.clone())
                        .increment(1);
                    error!(
                        provider = %provider,
                        attempt,
                        permanent = err.is_permanent(),
                        error = %err,
                        "token refresh failed; deactivating credential"
                    );
                    let reason = err.to_string();
                    self.tokens.mark_refresh_failed(&token, &reason).await?;
                    return Err(TokenError::RefreshFailed {
                        provider,
                        attempts: attempt,
                        reason,
                    });
                }
                Err(err) => {
                    let delay = refresh_backoff(&self.config, attempt);
                    warn!(
                        provider = %provider,
                        attempt,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %err,
                        "token refresh attempt failed; retrying"
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    async fn install_refreshed(
        &self,
        previous: &StoredToken,
        previous_refresh_token: &str,
        grant: TokenGrant,
    ) -> Result<String, TokenError> {
        let now = Utc::now();
        let access_token = grant.access_token.clone();
        let new_token = NewToken {
            access_token: grant.access_token,
            // Providers that do not rotate refresh tokens omit it from the response.
            refresh_token: grant
                .refresh_token
                .or_else(|| Some(previous_refresh_token.to_string())),
            expires_at: expires_at_from(now, grant.expires_in),
        };
        let metadata = RefreshMetadata {
            issued_by: "refresh_token".to_string(),
            refresh_count: previous.metadata.refresh_count + 1,
            last_refreshed_at: Some(now),
            previous_token_id: Some(previous.id),
            consecutive_failures: 0,
            last_error: None,
            last_failed_at: None,
        };

        match self
            .tokens
            .replace_active(&previous.provider, Some(previous.id), new_token, metadata)
            .await?
        {
            Some(new_id) => {
                counter!("token_refresh_success_total", "provider" => previous.provider.clone())
                    .increment(1);
                info!(
                    provider = %previous.provider,
                    previous_token_id = %previous.id,
                    token_id = %new_id,
                    refresh_count = previous.metadata.refresh_count + 1,
                    "access token refreshed"
                );
                Ok(access_token)
            }
            None => {
                // Another process swapped the row first; its token is authoritative.
                warn!(provider = %previous.provider, "token replaced concurrently; using stored token");
                self.tokens
                    .find_active(&previous.provider)
                    .await?
                    .map(|t| t.access_token)
                    .ok_or_else(|| TokenError::NoToken {
                        provider: previous.provider.clone(),
                    })
            }
        }
    }

    /// Start the human-in-the-loop authorization: build the URL and persist its state.
    #[instrument(skip(self))]
    pub async fn begin_authorization(
        &self,
        provider: &str,
    ) -> Result<AuthorizationRequest, TokenError> {
        let (url, state) = self
            .endpoint
            .authorize_url()
            .map_err(|e| TokenError::AuthorizationFailed(e.to_string()))?;
        let record = self
            .states
            .create(provider, &state, self.state_ttl_minutes)
            .await?;

        Ok(AuthorizationRequest {
            url,
            state,
            expires_at: record.expires_at.with_timezone(&Utc),
        })
    }

    /// Finish authorization: consume `state` once, exchange `code`, install the token.
    #[instrument(skip(self, state, code))]
    pub async fn complete_authorization(
        &self,
        provider: &str,
        state: &str,
        code: &str,
    ) -> Result<(), TokenError> {
        if !self.states.consume(provider, state).await? {
            warn!(provider, "authorization callback with unknown or reused state");
            return Err(TokenError::InvalidState);
        }

        let grant = self
            .endpoint
            .exchange_code(code)
            .await
            .map_err(|e| TokenError::AuthorizationFailed(e.to_string()))?;

        let lock = self.provider_lock(provider);
        let _guard = lock.lock().await;

        let now = Utc::now();
        let token = NewToken {
            access_token: grant.access_token,
            refresh_token: grant.refresh_token,
            expires_at: expires_at_from(now, grant.expires_in),
        };
        let metadata = RefreshMetadata {
            issued_by: "authorization_code".to_string(),
            ..RefreshMetadata::default()
        };
        let id = self
            .tokens
            .replace_active(provider, None, token, metadata)
            .await?;

        info!(provider, token_id = ?id, "authorization completed; credential installed");
        Ok(())
    }

    /// Refresh every active token that is inside the safety margin.
    #[instrument(skip_all)]
    pub async fn tick(&self) -> Result<usize, TokenError> {
        let now = Utc::now();
        let due: Vec<StoredToken> = self
            .tokens
            .list_active()
            .await?
            .into_iter()
            .filter(|t| t.refresh_token.is_some() && !self.is_fresh(t, now))
            .collect();

        let mut refreshed = 0;
        for token in due {
            match self.get_valid_access_token(&token.provider).await {
                Ok(_) => refreshed += 1,
                Err(err) => error!(provider = %token.provider, error = %err, "proactive refresh failed"),
            }
        }

        if let Err(err) = self.states.purge_expired().await {
            warn!(error = %err, "failed to purge expired oauth states");
        }

        Ok(refreshed)
    }

    /// Run the proactive refresher until `shutdown` fires.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            tick_seconds = self.config.tick_seconds,
            safety_margin_seconds = self.config.safety_margin_seconds,
            "token refresher started"
        );
        let tick_interval = TokioDuration::from_secs(self.config.tick_seconds);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = sleep(tick_interval) => {
                    match self.tick().await {
                        Ok(count) if count > 0 => info!(count, "proactively refreshed tokens"),
                        Ok(_) => {}
                        Err(err) => error!(error = %err, "token refresher tick failed"),
                    }
                }
            }
        }

        info!("token refresher stopped");
    }
}

#[async_trait]
impl CredentialSource for TokenManager {
    async fn get_valid_access_token(&self, provider: &str) -> Result<String, TokenError> {
        TokenManager::get_valid_access_token(self, provider).await
    }

    async fn force_refresh(&self, provider: &str, rejected: &str) -> Result<String, TokenError> {
        TokenManager::force_refresh(self, provider, rejected).await
    }
}

fn needs_use_stamp(last_used_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    last_used_at
        .map(|at| now - at >= Duration::seconds(LAST_USED_RESOLUTION_SECS))
        .unwrap_or(true)
}

/// Expiry for a grant. `expires_in` is clamped to [`MAX_TOKEN_LIFETIME_SECS`].
fn expires_at_from(now: DateTime<Utc>, expires_in: Option<std::time::Duration>) -> DateTime<Utc> {
    let secs = expires_in
        .map(|d| {
            i64::try_from(d.as_secs())
                .unwrap_or(i64::MAX)
                .min(MAX_TOKEN_LIFETIME_SECS)
        })
        .unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);
    Duration::try_seconds(secs)
        .and_then(|lifetime| now.checked_add_signed(lifetime))
        .unwrap_or(now + Duration::seconds(DEFAULT_TOKEN_LIFETIME_SECS))
}

/// `base * 2^(attempt-1)`, capped at `max_backoff_ms`.
fn refresh_backoff(config: &TokenRefreshConfig, attempt: u32) -> TokioDuration {
    let exp = attempt.saturating_sub(1).min(16);
    let delay = config.base_backoff_ms.saturating_mul(1u64 << exp);
    TokioDuration::from_millis(delay.min(config.max_backoff_ms))
}
