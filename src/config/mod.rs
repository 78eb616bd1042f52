//! Configuration loading for the exchange sync engine.
//!
//! Loads layered `.env` files and environment variables prefixed with
//! `EXSYNC_`, producing a typed [`AppConfig`].

use std::{collections::BTreeMap, env, path::PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application configuration derived from `EXSYNC_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppConfig {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_acquire_timeout_ms")]
    pub db_acquire_timeout_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crypto_key: Option<Vec<u8>>,
    #[serde(default)]
    pub provider: OAuthProviderConfig,
    #[serde(default)]
    pub token_refresh: TokenRefreshConfig,
    #[serde(default)]
    pub api_retry: RetryPolicyConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

/// OAuth and data-API settings for the external practice-management provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct OAuthProviderConfig {
    /// Provider identity key used for token records (default: `clio`)
    #[serde(default = "default_provider_slug")]
    pub slug: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,
    #[serde(default = "default_authorize_url")]
    pub authorize_url: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    /// Space separated scope string requested during authorization
    #[serde(default = "default_scopes")]
    pub scopes: String,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Lifetime of an issued authorization `state` value
    #[serde(default = "default_state_ttl_minutes")]
    pub state_ttl_minutes: i64,
}

/// Token manager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct TokenRefreshConfig {
    /// Background refresh interval in seconds (default: 60)
    #[serde(default = "default_token_refresh_tick_seconds")]
    pub tick_seconds: u64,

    /// Tokens expiring within this margin are refreshed before use (default: 300)
    #[serde(default = "default_token_refresh_safety_margin_seconds")]
    pub safety_margin_seconds: u64,

    /// Refresh exchange attempts before surfacing failure (default: 3)
    #[serde(default = "default_token_refresh_max_attempts")]
    pub max_attempts: u32,

    /// First delay between refresh attempts in milliseconds (default: 500)
    #[serde(default = "default_token_refresh_base_backoff_ms")]
    pub base_backoff_ms: u64,

    /// Upper bound for the delay between refresh attempts (default: 10000)
    #[serde(default = "default_token_refresh_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

/// Retry policy for throttled or failing data API requests
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RetryPolicyConfig {
    /// Base retry interval in milliseconds (default: 1000)
    ///
    /// Subsequent retries use exponential backoff: base_delay_ms * 2^attempt.
    #[serde(default = "default_retry_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Maximum retry interval in milliseconds (default: 60000)
    #[serde(default = "default_retry_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Retries after the first attempt before a page is reported as transient failure (default: 5)
    #[serde(default = "default_retry_max_retries")]
    pub max_retries: u32,

    /// Jitter factor (default: 0.1, range: 0.0-1.0)
    #[serde(default = "default_retry_jitter_factor")]
    pub jitter_factor: f64,

    /// Per-request timeout in milliseconds (default: 30000)
    #[serde(default = "default_retry_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

/// Import orchestration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct SyncConfig {
    /// Records requested per page (default: 200)
    #[serde(default = "default_sync_page_size")]
    pub page_size: u32,

    /// Capacity of a job's error list; oldest entries are dropped (default: 100)
    #[serde(default = "default_sync_max_errors")]
    pub max_errors: usize,

    /// Attempts at the same cursor before the job fails (default: 3)
    #[serde(default = "default_sync_max_page_attempts")]
    pub max_page_attempts: u32,

    /// A running job without a heartbeat for this long is considered abandoned (default: 300)
    #[serde(default = "default_sync_stale_after_seconds")]
    pub stale_after_seconds: u64,

    /// Deactivate local records not re-observed by a completed run (default: false)
    #[serde(default)]
    pub deactivate_missing: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            database_url: default_database_url(),
            db_max_connections: default_db_max_connections(),
            db_acquire_timeout_ms: default_db_acquire_timeout_ms(),
            crypto_key: None,
            provider: OAuthProviderConfig::default(),
            token_refresh: TokenRefreshConfig::default(),
            api_retry: RetryPolicyConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

impl Default for OAuthProviderConfig {
    fn default() -> Self {
        Self {
            slug: default_provider_slug(),
            client_id: None,
            client_secret: None,
            redirect_uri: default_redirect_uri(),
            authorize_url: default_authorize_url(),
            token_url: default_token_url(),
            scopes: default_scopes(),
            api_base_url: default_api_base_url(),
            state_ttl_minutes: default_state_ttl_minutes(),
        }
    }
}

impl Default for TokenRefreshConfig {
    fn default() -> Self {
        Self {
            tick_seconds: default_token_refresh_tick_seconds(),
            safety_margin_seconds: default_token_refresh_safety_margin_seconds(),
            max_attempts: default_token_refresh_max_attempts(),
            base_backoff_ms: default_token_refresh_base_backoff_ms(),
            max_backoff_ms: default_token_refresh_max_backoff_ms(),
        }
    }
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_retry_base_delay_ms(),
            max_delay_ms: default_retry_max_delay_ms(),
            max_retries: default_retry_max_retries(),
            jitter_factor: default_retry_jitter_factor(),
            request_timeout_ms: default_retry_request_timeout_ms(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: default_sync_page_size(),
            max_errors: default_sync_max_errors(),
            max_page_attempts: default_sync_max_page_attempts(),
            stale_after_seconds: default_sync_stale_after_seconds(),
            deactivate_missing: false,
        }
    }
}

impl OAuthProviderConfig {
    /// Validate provider endpoints and, outside local/test, credentials.
    pub fn validate(&self, require_credentials: bool) -> Result<(), ConfigError> {
        if self.slug.trim().is_empty() {
            return Err(ConfigError::MissingProviderSlug);
        }

        for (field, value) in [
            ("authorize_url", &self.authorize_url),
            ("token_url", &self.token_url),
            ("api_base_url", &self.api_base_url),
            ("redirect_uri", &self.redirect_uri),
        ] {
            if let Err(source) = url::Url::parse(value) {
                return Err(ConfigError::InvalidUrl {
                    field: field.to_string(),
                    value: value.clone(),
                    source,
                });
            }
        }

        if self.state_ttl_minutes <= 0 {
            return Err(ConfigError::InvalidStateTtl {
                value: self.state_ttl_minutes,
            });
        }

        if require_credentials {
            if self.client_id.is_none() {
                return Err(ConfigError::MissingClientId);
            }
            if self.client_secret.is_none() {
                return Err(ConfigError::MissingClientSecret);
            }
        }

        Ok(())
    }
}

impl TokenRefreshConfig {
    /// Validate token refresh configuration bounds
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_seconds < 10 {
            return Err(ConfigError::InvalidTokenRefreshTickInterval {
                value: self.tick_seconds,
            });
        }

        if self.safety_margin_seconds > 86400 {
            return Err(ConfigError::InvalidTokenSafetyMargin {
                value: self.safety_margin_seconds,
            });
        }

        if self.max_attempts == 0 || self.max_attempts > 10 {
            return Err(ConfigError::InvalidTokenRefreshAttempts {
                value: self.max_attempts,
            });
        }

        if self.base_backoff_ms > self.max_backoff_ms {
            return Err(ConfigError::InvalidTokenRefreshBackoff {
                base: self.base_backoff_ms,
                max: self.max_backoff_ms,
            });
        }

        Ok(())
    }
}

impl RetryPolicyConfig {
    /// Validate retry policy configuration bounds
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_delay_ms > self.max_delay_ms {
            return Err(ConfigError::InvalidRetryBounds {
                base: self.base_delay_ms,
                max: self.max_delay_ms,
            });
        }

        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(ConfigError::InvalidRetryJitter {
                value: self.jitter_factor,
            });
        }

        if self.request_timeout_ms == 0 {
            return Err(ConfigError::InvalidRequestTimeout);
        }

        Ok(())
    }
}

impl SyncConfig {
    /// Validate sync orchestration bounds
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.page_size == 0 || self.page_size > 1000 {
            return Err(ConfigError::InvalidPageSize {
                value: self.page_size,
            });
        }

        if self.max_errors == 0 {
            return Err(ConfigError::InvalidMaxErrors);
        }

        if self.max_page_attempts == 0 {
            return Err(ConfigError::InvalidPageAttempts);
        }

        if self.stale_after_seconds < 30 {
            return Err(ConfigError::InvalidStaleAfter {
                value: self.stale_after_seconds,
            });
        }

        Ok(())
    }
}

impl AppConfig {
    /// Returns a redacted JSON representation (secrets are redacted).
    pub fn redacted_json(&self) -> serde_json::Result<String> {
        let mut config = self.clone();
        if config.crypto_key.is_some() {
            config.crypto_key = Some(b"[REDACTED]".to_vec());
        }
        if config.provider.client_id.is_some() {
            config.provider.client_id = Some("[REDACTED]".to_string());
        }
        if config.provider.client_secret.is_some() {
            config.provider.client_secret = Some("[REDACTED]".to_string());
        }
        serde_json::to_string_pretty(&config)
    }

    /// Whether the active profile is a development profile (`local` or `test`).
    pub fn is_dev_profile(&self) -> bool {
        matches!(self.profile.as_str(), "local" | "test")
    }

    /// Validates the configuration, returning an error if required settings are missing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.crypto_key {
            Some(ref key) if key.len() != 32 => {
                return Err(ConfigError::InvalidCryptoKeyLength { length: key.len() });
            }
            Some(_) => {}
            None => return Err(ConfigError::MissingCryptoKey),
        }

        if self.database_url.is_empty() {
            return Err(ConfigError::MissingDatabaseUrl);
        }

        self.provider.validate(!self.is_dev_profile())?;
        self.token_refresh.validate()?;
        self.api_retry.validate()?;
        self.sync.validate()?;

        Ok(())
    }
}

fn default_profile() -> String {
    "local".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_database_url() -> String {
    "postgresql://localhost:5432/exchange_sync".to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_acquire_timeout_ms() -> u64 {
    5000
}

fn default_provider_slug() -> String {
    "clio".to_string()
}

fn default_redirect_uri() -> String {
    "http://localhost:8080/oauth/callback".to_string()
}

fn default_authorize_url() -> String {
    "https://app.clio.com/oauth/authorize".to_string()
}

fn default_token_url() -> String {
    "https://app.clio.com/oauth/token".to_string()
}

fn default_scopes() -> String {
    "contacts matters tasks".to_string()
}

fn default_api_base_url() -> String {
    "https://app.clio.com/api/v4".to_string()
}

fn default_state_ttl_minutes() -> i64 {
    10
}

fn default_token_refresh_tick_seconds() -> u64 {
    60
}

fn default_token_refresh_safety_margin_seconds() -> u64 {
    300 // 5 minutes
}

fn default_token_refresh_max_attempts() -> u32 {
    3
}

fn default_token_refresh_base_backoff_ms() -> u64 {
    500
}

fn default_token_refresh_max_backoff_ms() -> u64 {
    10_000
}

fn default_retry_base_delay_ms() -> u64 {
    1_000
}

fn default_retry_max_delay_ms() -> u64 {
    60_000
}

fn default_retry_max_retries() -> u32 {
    5
}

fn default_retry_jitter_factor() -> f64 {
    0.1 // 10% jitter
}

fn default_retry_request_timeout_ms() -> u64 {
    30_000
}

fn default_sync_page_size() -> u32 {
    200
}

fn default_sync_max_errors() -> usize {
    100
}

fn default_sync_max_page_attempts() -> u32 {
    3
}

fn default_sync_stale_after_seconds() -> u64 {
    300
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("crypto key is missing; set EXSYNC_CRYPTO_KEY environment variable")]
    MissingCryptoKey,
    #[error("crypto key is invalid base64: {error}")]
    InvalidCryptoKeyBase64 { error: String },
    #[error("crypto key must decode to exactly 32 bytes, got {length} bytes")]
    InvalidCryptoKeyLength { length: usize },
    #[error("database url is empty; set EXSYNC_DATABASE_URL")]
    MissingDatabaseUrl,
    #[error("provider slug cannot be empty")]
    MissingProviderSlug,
    #[error("OAuth client ID is missing; set EXSYNC_OAUTH_CLIENT_ID environment variable")]
    MissingClientId,
    #[error("OAuth client secret is missing; set EXSYNC_OAUTH_CLIENT_SECRET environment variable")]
    MissingClientSecret,
    #[error("invalid {field} '{value}': {source}")]
    InvalidUrl {
        field: String,
        value: String,
        source: url::ParseError,
    },
    #[error("OAuth state TTL must be positive, got {value} minutes")]
    InvalidStateTtl { value: i64 },
    #[error("token refresh tick interval must be at least 10 seconds, got {value}")]
    InvalidTokenRefreshTickInterval { value: u64 },
    #[error("token safety margin must not exceed 86400 seconds, got {value}")]
    InvalidTokenSafetyMargin { value: u64 },
    #[error("token refresh attempts must be between 1 and 10, got {value}")]
    InvalidTokenRefreshAttempts { value: u32 },
    #[error("token refresh base backoff ({base}ms) cannot be greater than max backoff ({max}ms)")]
    InvalidTokenRefreshBackoff { base: u64, max: u64 },
    #[error("retry base delay ({base}ms) cannot be greater than max delay ({max}ms)")]
    InvalidRetryBounds { base: u64, max: u64 },
    #[error("retry jitter factor must be between 0.0 and 1.0, got {value}")]
    InvalidRetryJitter { value: f64 },
    #[error("request timeout must be positive")]
    InvalidRequestTimeout,
    #[error("sync page size must be between 1 and 1000, got {value}")]
    InvalidPageSize { value: u32 },
    #[error("sync error list capacity must be positive")]
    InvalidMaxErrors,
    #[error("sync page attempts must be positive")]
    InvalidPageAttempts,
    #[error("sync stale threshold must be at least 30 seconds, got {value}")]
    InvalidStaleAfter { value: u64 },
}

/// Loads configuration using layered `.env` files and `EXSYNC_*` env vars.
pub struct ConfigLoader {
    base_dir: PathBuf,
}

impl ConfigLoader {
    /// Creates a new loader rooted at the current working directory.
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Creates a loader rooted at the provided directory (useful for tests).
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Loads and validates configuration from files and the process environment.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let (mut layered, profile_hint) = self.collect_layered_env()?;

        // Overlay process environment last so it wins.
        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix("EXSYNC_") {
                layered.insert(stripped.to_string(), value);
            }
        }

        let config = Self::build(layered, profile_hint)?;
        config.validate()?;
        Ok(config)
    }

    /// Builds an unvalidated configuration from already-collected `EXSYNC_`-stripped values.
    pub fn build(
        mut layered: BTreeMap<String, String>,
        profile_hint: String,
    ) -> Result<AppConfig, ConfigError> {
        let profile = take_non_empty(&mut layered, "PROFILE").unwrap_or(profile_hint);
        let log_level = take_non_empty(&mut layered, "LOG_LEVEL").unwrap_or_else(default_log_level);
        let log_format =
            take_non_empty(&mut layered, "LOG_FORMAT").unwrap_or_else(default_log_format);
        let database_url =
            take_non_empty(&mut layered, "DATABASE_URL").unwrap_or_else(default_database_url);
        let db_max_connections =
            take_parsed(&mut layered, "DB_MAX_CONNECTIONS").unwrap_or_else(default_db_max_connections);
        let db_acquire_timeout_ms = take_parsed(&mut layered, "DB_ACQUIRE_TIMEOUT_MS")
            .unwrap_or_else(default_db_acquire_timeout_ms);

        let crypto_key = match take_non_empty(&mut layered, "CRYPTO_KEY") {
            Some(key_str) => {
                use base64::{Engine as _, engine::general_purpose};
                Some(general_purpose::STANDARD.decode(key_str.trim()).map_err(|e| {
                    ConfigError::InvalidCryptoKeyBase64 {
                        error: e.to_string(),
                    }
                })?)
            }
            None => None,
        };

        let provider = OAuthProviderConfig {
            slug: take_non_empty(&mut layered, "PROVIDER").unwrap_or_else(default_provider_slug),
            client_id: take_non_empty(&mut layered, "OAUTH_CLIENT_ID"),
            client_secret: take_non_empty(&mut layered, "OAUTH_CLIENT_SECRET"),
            redirect_uri: take_non_empty(&mut layered, "OAUTH_REDIRECT_URI")
                .unwrap_or_else(default_redirect_uri),
            authorize_url: take_non_empty(&mut layered, "OAUTH_AUTHORIZE_URL")
                .unwrap_or_else(default_authorize_url),
            token_url: take_non_empty(&mut layered, "OAUTH_TOKEN_URL")
                .unwrap_or_else(default_token_url),
            scopes: take_non_empty(&mut layered, "OAUTH_SCOPES").unwrap_or_else(default_scopes),
            api_base_url: take_non_empty(&mut layered, "API_BASE_URL")
                .unwrap_or_else(default_api_base_url),
            state_ttl_minutes: take_parsed(&mut layered, "OAUTH_STATE_TTL_MINUTES")
                .unwrap_or_else(default_state_ttl_minutes),
        };

        let token_refresh = TokenRefreshConfig {
            tick_seconds: take_parsed(&mut layered, "TOKEN_REFRESH_TICK_SECONDS")
                .unwrap_or_else(default_token_refresh_tick_seconds),
            safety_margin_seconds: take_parsed(&mut layered, "TOKEN_SAFETY_MARGIN_SECONDS")
                .unwrap_or_else(default_token_refresh_safety_margin_seconds),
            max_attempts: take_parsed(&mut layered, "TOKEN_REFRESH_MAX_ATTEMPTS")
                .unwrap_or_else(default_token_refresh_max_attempts),
            base_backoff_ms: take_parsed(&mut layered, "TOKEN_REFRESH_BASE_BACKOFF_MS")
                .unwrap_or_else(default_token_refresh_base_backoff_ms),
            max_backoff_ms: take_parsed(&mut layered, "TOKEN_REFRESH_MAX_BACKOFF_MS")
                .unwrap_or_else(default_token_refresh_max_backoff_ms),
        };

        let api_retry = RetryPolicyConfig {
            base_delay_ms: take_parsed(&mut layered, "API_RETRY_BASE_DELAY_MS")
                .unwrap_or_else(default_retry_base_delay_ms),
            max_delay_ms: take_parsed(&mut layered, "API_RETRY_MAX_DELAY_MS")
                .unwrap_or_else(default_retry_max_delay_ms),
            max_retries: take_parsed(&mut layered, "API_RETRY_MAX_RETRIES")
                .unwrap_or_else(default_retry_max_retries),
            jitter_factor: take_parsed(&mut layered, "API_RETRY_JITTER_FACTOR")
                .unwrap_or_else(default_retry_jitter_factor),
            request_timeout_ms: take_parsed(&mut layered, "API_REQUEST_TIMEOUT_MS")
                .unwrap_or_else(default_retry_request_timeout_ms),
        };

        let sync = SyncConfig {
            page_size: take_parsed(&mut layered, "SYNC_PAGE_SIZE")
                .unwrap_or_else(default_sync_page_size),
            max_errors: take_parsed(&mut layered, "SYNC_MAX_ERRORS")
                .unwrap_or_else(default_sync_max_errors),
            max_page_attempts: take_parsed(&mut layered, "SYNC_MAX_PAGE_ATTEMPTS")
                .unwrap_or_else(default_sync_max_page_attempts),
            stale_after_seconds: take_parsed(&mut layered, "SYNC_STALE_AFTER_SECONDS")
                .unwrap_or_else(default_sync_stale_after_seconds),
            deactivate_missing: take_parsed(&mut layered, "SYNC_DEACTIVATE_MISSING")
                .unwrap_or(false),
        };

        Ok(AppConfig {
            profile,
            log_level,
            log_format,
            database_url,
            db_max_connections,
            db_acquire_timeout_ms,
            crypto_key,
            provider,
            token_refresh,
            api_retry,
            sync,
        })
    }

    fn collect_layered_env(&self) -> Result<(BTreeMap<String, String>, String), ConfigError> {
        let mut values = BTreeMap::new();

        self.merge_dotenv(self.base_dir.join(".env"), &mut values)?;
        self.merge_dotenv(self.base_dir.join(".env.local"), &mut values)?;

        let profile = env::var("EXSYNC_PROFILE")
            .ok()
            .or_else(|| values.get("PROFILE").cloned())
            .unwrap_or_else(default_profile);

        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}", &profile)),
            &mut values,
        )?;
        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}.local", &profile)),
            &mut values,
        )?;

        Ok((values, profile))
    }

    fn merge_dotenv(
        &self,
        path: PathBuf,
        values: &mut BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        match dotenvy::from_path_iter(&path) {
            Ok(iter) => {
                for item in iter {
                    let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                        path: path.clone(),
                        source,
                    })?;
                    if let Some(stripped) = key.strip_prefix("EXSYNC_") {
                        values.insert(stripped.to_string(), value);
                    }
                }
                Ok(())
            }
            Err(dotenvy::Error::Io(ref io_err))
                if io_err.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(())
            }
            Err(err) => Err(ConfigError::EnvFile { path, source: err }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn take_non_empty(values: &mut BTreeMap<String, String>, key: &str) -> Option<String> {
    values
        .remove(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn take_parsed<T: std::str::FromStr>(values: &mut BTreeMap<String, String>, key: &str) -> Option<T> {
    values.remove(key).and_then(|v| v.trim().parse().ok())
}
