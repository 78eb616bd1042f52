//! Rate-limited client for the practice-management data API.
//!
//! Every request carries a token from the [`CredentialSource`]. A 401 forces one
//! refresh and one retry; 429 and 5xx responses back off exponentially with
//! jitter (honouring `Retry-After`) up to `max_retries` before the page is
//! reported as failed.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use rand::Rng;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::config::RetryPolicyConfig;
use crate::error::{ApiClientError, truncate_body};
use crate::models::EntityType;
use crate::token_manager::CredentialSource;

/// One page of external records.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub records: Vec<JsonValue>,
    /// Opaque continuation token; `None` on the last page
    pub next_page_token: Option<String>,
    /// Total record count, when the API reports one
    pub total_records: Option<u64>,
}

/// Source of pages for the orchestrator.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_page(
        &self,
        entity_type: EntityType,
        page_token: Option<&str>,
    ) -> Result<Page, ApiClientError>;
}

#[derive(Debug, Deserialize)]
struct PageEnvelope {
    #[serde(default)]
    data: Vec<JsonValue>,
    #[serde(default)]
    meta: PageMeta,
}

#[derive(Debug, Default, Deserialize)]
struct PageMeta {
    #[serde(default)]
    records: Option<u64>,
    #[serde(default)]
    paging: Paging,
}

#[derive(Debug, Default, Deserialize)]
struct Paging {
    #[serde(default)]
    next: Option<String>,
}

/// Continuation token carried by a `meta.paging.next` value.
///
/// A URL yields its `page_token` query parameter; anything else is used verbatim.
pub fn extract_page_token(next: &str) -> Option<String> {
    let next = next.trim();
    if next.is_empty() {
        return None;
    }
    match Url::parse(next) {
        Ok(url) => url
            .query_pairs()
            .find(|(key, _)| key == "page_token")
            .map(|(_, value)| value.into_owned())
            .or_else(|| Some(next.to_string())),
        Err(_) => Some(next.to_string()),
    }
}

/// Delay before retry number `attempt` (0-based).
///
/// `base * 2^attempt` capped at `max_delay_ms`, plus up to `jitter_factor` of
/// the delay. A server-provided `Retry-After` raises the floor but never the cap.
pub fn compute_backoff(
    policy: &RetryPolicyConfig,
    attempt: u32,
    retry_after_secs: Option<u64>,
) -> Duration {
    let exp = attempt.min(20);
    let exponential = policy.base_delay_ms.saturating_mul(1u64 << exp);
    let floor = retry_after_secs.map(|s| s.saturating_mul(1_000)).unwrap_or(0);
    let delay = exponential.max(floor).min(policy.max_delay_ms);

    let jitter_range = (delay as f64 * policy.jitter_factor) as u64;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..=jitter_range)
    } else {
        0
    };

    Duration::from_millis(delay.saturating_add(jitter).min(policy.max_delay_ms.max(delay)))
}

fn retry_after_header(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
}

pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    provider: String,
    page_size: u32,
    retry: RetryPolicyConfig,
    credentials: Arc<dyn CredentialSource>,
}

impl ApiClient {
    pub fn new(
        base_url: &str,
        provider: &str,
        page_size: u32,
        retry: RetryPolicyConfig,
        credentials: Arc<dyn CredentialSource>,
    ) -> Result<Self, ApiClientError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(retry.request_timeout_ms))
            .user_agent(concat!("exchange-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ApiClientError::Malformed(format!("http client: {e}")))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            provider: provider.to_string(),
            page_size,
            retry,
            credentials,
        })
    }

    fn endpoint(&self, entity_type: EntityType) -> String {
        format!("{}/{}.json", self.base_url, entity_type.as_str())
    }

    async fn send(
        &self,
        entity_type: EntityType,
        page_token: Option<&str>,
        access_token: &str,
    ) -> Result<reqwest::Response, reqwest::Error> {
        let limit = self.page_size.to_string();
        let mut query: Vec<(&str, &str)> = vec![("limit", limit.as_str())];
        if let Some(token) = page_token {
            query.push(("page_token", token));
        }

        self.http
            .get(self.endpoint(entity_type))
            .bearer_auth(access_token)
            .header("Accept", "application/json")
            .query(&query)
            .send()
            .await
    }

    async fn parse_page(response: reqwest::Response) -> Result<Page, ApiClientError> {
        let body = response
            .text()
            .await
            .map_err(|e| ApiClientError::Malformed(format!("failed to read body: {e}")))?;
        let envelope: PageEnvelope = serde_json::from_str(&body).map_err(|e| {
            ApiClientError::Malformed(format!("{e}; body: {}", truncate_body(&body)))
        })?;

        Ok(Page {
            records: envelope.data,
            next_page_token: envelope
                .meta
                .paging
                .next
                .as_deref()
                .and_then(extract_page_token),
            total_records: envelope.meta.records,
        })
    }
}

#[async_trait]
impl PageSource for ApiClient {
    #[instrument(skip(self), fields(provider = %self.provider))]
    async fn fetch_page(
        &self,
        entity_type: EntityType,
        page_token: Option<&str>,
    ) -> Result<Page, ApiClientError> {
        let mut access_token = self
            .credentials
            .get_valid_access_token(&self.provider)
            .await?;
        let mut refreshed_after_401 = false;
        let mut attempt: u32 = 0;

        loop {
            let outcome = self.send(entity_type, page_token, &access_token).await;

            let (retry_after, failure) = match outcome {
                Err(err) => {
                    let failure = ApiClientError::Transient {
                        message: err.to_string(),
                        attempts: attempt + 1,
                    };
                    (None, failure)
                }
                Ok(response) if response.status().is_success() => {
                    return Self::parse_page(response).await;
                }
                Ok(response) if response.status() == StatusCode::UNAUTHORIZED => {
                    let body = response.text().await.unwrap_or_default();
                    if refreshed_after_401 {
                        counter!("api_unauthorized_total", "entity" => entity_type.as_str())
                            .increment(1);
                        return Err(ApiClientError::Unauthorized {
                            message: format!(
                                "401 after forced refresh: {}",
                                truncate_body(&body)
                            ),
                        });
                    }
                    warn!(entity = %entity_type, "data API returned 401; forcing token refresh");
                    refreshed_after_401 = true;
                    access_token = self
                        .credentials
                        .force_refresh(&self.provider, &access_token)
                        .await?;
                    continue;
                }
                Ok(response) if response.status() == StatusCode::TOO_MANY_REQUESTS => {
                    let retry_after = retry_after_header(&response);
                    counter!("api_throttled_total", "entity" => entity_type.as_str()).increment(1);
                    (
                        retry_after,
                        ApiClientError::RateLimited {
                            retry_after_secs: retry_after,
                            attempts: attempt + 1,
                        },
                    )
                }
                Ok(response) if response.status().is_server_error() => {
                    let status = response.status();
                    let retry_after = retry_after_header(&response);
                    let body = response.text().await.unwrap_or_default();
                    (
                        retry_after,
                        ApiClientError::Transient {
                            message: format!("{status}: {}", truncate_body(&body)),
                            attempts: attempt + 1,
                        },
                    )
                }
                Ok(response) => {
                    let status = response.status().as_u16();
                    let body = response.text().await.unwrap_or_default();
                    return Err(ApiClientError::Rejected {
                        status,
                        body: truncate_body(&body),
                    });
                }
            };

            if attempt >= self.retry.max_retries {
                warn!(
                    entity = %entity_type,
                    attempts = attempt + 1,
                    error = %failure,
                    "giving up on page after retries"
                );
                return Err(failure);
            }

            let delay = compute_backoff(&self.retry, attempt, retry_after);
            counter!("api_retries_total", "entity" => entity_type.as_str()).increment(1);
            debug!(
                entity = %entity_type,
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                error = %failure,
                "retrying page request"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
