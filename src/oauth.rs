//! OAuth2 token endpoint client for the practice-management provider.
//!
//! Handles the authorize URL, the authorization-code exchange and the
//! refresh-token exchange. The token manager talks to it through the
//! [`TokenEndpoint`] trait so tests can substitute the endpoint.

use std::time::Duration;

use async_trait::async_trait;
use oauth2::CsrfToken;
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::config::OAuthProviderConfig;
use crate::error::truncate_body;

/// Credential returned by a successful exchange.
#[derive(Clone)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<Duration>,
}

impl std::fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenGrant")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum OAuthError {
    /// The grant itself is dead (revoked, expired, wrong client); retrying cannot help.
    #[error("token endpoint rejected the grant: {0}")]
    Permanent(String),
    #[error("token endpoint unavailable: {0}")]
    Transient(String),
    #[error("invalid OAuth configuration: {0}")]
    Configuration(String),
}

impl OAuthError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, OAuthError::Permanent(_) | OAuthError::Configuration(_))
    }
}

/// The provider's OAuth surface.
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    /// Authorize URL and the random `state` embedded in it.
    fn authorize_url(&self) -> Result<(Url, String), OAuthError>;

    async fn exchange_code(&self, code: &str) -> Result<TokenGrant, OAuthError>;

    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, OAuthError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct TokenErrorResponse {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

/// Error codes (RFC 6749 §5.2) that mean the grant or client is unusable.
const PERMANENT_ERROR_CODES: &[&str] = &[
    "invalid_grant",
    "invalid_client",
    "unauthorized_client",
    "unsupported_grant_type",
];

/// reqwest-backed [`TokenEndpoint`].
#[derive(Debug, Clone)]
pub struct OAuthClient {
    http: reqwest::Client,
    client_id: String,
    client_secret: String,
    authorize_url: String,
    token_url: String,
    redirect_uri: String,
    scopes: String,
}

impl OAuthClient {
    pub fn new(config: &OAuthProviderConfig, timeout: Duration) -> Result<Self, OAuthError> {
        let client_id = config
            .client_id
            .clone()
            .ok_or_else(|| OAuthError::Configuration("client_id is not set".to_string()))?;
        let client_secret = config
            .client_secret
            .clone()
            .ok_or_else(|| OAuthError::Configuration("client_secret is not set".to_string()))?;

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| OAuthError::Configuration(e.to_string()))?;

        Ok(Self {
            http,
            client_id,
            client_secret,
            authorize_url: config.authorize_url.clone(),
            token_url: config.token_url.clone(),
            redirect_uri: config.redirect_uri.clone(),
            scopes: config.scopes.clone(),
        })
    }

    async fn post_token_form(&self, params: &[(&str, &str)]) -> Result<TokenGrant, OAuthError> {
        let response = self
            .http
            .post(&self.token_url)
            .header("Accept", "application/json")
            .form(params)
            .send()
            .await
            .map_err(|e| OAuthError::Transient(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| OAuthError::Transient(e.to_string()))?;

        if status.is_success() {
            let parsed: TokenResponse = serde_json::from_str(&body).map_err(|e| {
                OAuthError::Transient(format!("unreadable token response: {e}"))
            })?;
            return Ok(TokenGrant {
                access_token: parsed.access_token,
                refresh_token: parsed.refresh_token.filter(|t| !t.is_empty()),
                expires_in: parsed.expires_in.map(Duration::from_secs),
            });
        }

        Err(classify_failure(status, &body))
    }
}

/// Map a non-success token endpoint response onto permanent vs transient.
fn classify_failure(status: StatusCode, body: &str) -> OAuthError {
    let parsed: TokenErrorResponse = serde_json::from_str(body).unwrap_or_default();
    let code = parsed.error.as_deref().unwrap_or("");
    let detail = match parsed.error_description {
        Some(ref description) => format!("{status} {code}: {description}"),
        None => format!("{status} {}", truncate_body(body)),
    };

    if PERMANENT_ERROR_CODES.contains(&code) {
        return OAuthError::Permanent(detail);
    }

    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        OAuthError::Transient(detail)
    } else if status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED {
        OAuthError::Permanent(detail)
    } else {
        OAuthError::Transient(detail)
    }
}

#[async_trait]
impl TokenEndpoint for OAuthClient {
    fn authorize_url(&self) -> Result<(Url, String), OAuthError> {
        let state = CsrfToken::new_random().secret().clone();
        let mut url = Url::parse(&self.authorize_url)
            .map_err(|e| OAuthError::Configuration(format!("authorize_url: {e}")))?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("scope", &self.scopes)
            .append_pair("state", &state);
        Ok((url, state))
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenGrant, OAuthError> {
        self.post_token_form(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", &self.redirect_uri),
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
        ])
        .await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, OAuthError> {
        self.post_token_form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
        ])
        .await
    }
}
