//! Test utilities shared by the integration suites.
//!
//! In-memory SQLite with migrations applied, plus builders for the token
//! manager, API client and sync service wired against a `wiremock` server.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use exchange_sync::api_client::ApiClient;
use exchange_sync::config::{
    OAuthProviderConfig, RetryPolicyConfig, SyncConfig, TokenRefreshConfig,
};
use exchange_sync::crypto::CryptoKey;
use exchange_sync::oauth::OAuthClient;
use exchange_sync::repositories::{
    NewToken, OAuthStateRepository, RefreshMetadata, TokenRepository,
};
use exchange_sync::sync::SyncService;
use exchange_sync::token_manager::{CredentialSource, TokenManager};
use migration::{Migrator, MigratorTrait};
use sea_orm::{Database, DatabaseConnection};
use serde_json::{Value, json};
use uuid::Uuid;
use wiremock::MockServer;

pub const PROVIDER: &str = "clio";

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await?;
    Migrator::up(&db, None).await?;
    Ok(db)
}

pub fn test_key() -> CryptoKey {
    CryptoKey::new(vec![7u8; 32]).expect("32-byte key")
}

pub fn token_repo(db: &DatabaseConnection) -> TokenRepository {
    TokenRepository::new(db.clone(), test_key())
}

pub fn provider_config(server: &MockServer) -> OAuthProviderConfig {
    OAuthProviderConfig {
        client_id: Some("client-1".to_string()),
        client_secret: Some("secret-1".to_string()),
        redirect_uri: "http://localhost:8080/oauth/callback".to_string(),
        authorize_url: format!("{}/oauth/authorize", server.uri()),
        token_url: format!("{}/oauth/token", server.uri()),
        api_base_url: format!("{}/api/v4", server.uri()),
        ..OAuthProviderConfig::default()
    }
}

pub fn refresh_config() -> TokenRefreshConfig {
    TokenRefreshConfig {
        max_attempts: 3,
        base_backoff_ms: 1,
        max_backoff_ms: 5,
        ..TokenRefreshConfig::default()
    }
}

pub fn retry_policy() -> RetryPolicyConfig {
    RetryPolicyConfig {
        base_delay_ms: 1,
        max_delay_ms: 5,
        max_retries: 2,
        jitter_factor: 0.0,
        request_timeout_ms: 5_000,
    }
}

pub fn sync_config() -> SyncConfig {
    SyncConfig {
        page_size: 2,
        max_errors: 10,
        max_page_attempts: 2,
        stale_after_seconds: 300,
        deactivate_missing: false,
    }
}

pub fn token_manager(db: &DatabaseConnection, server: &MockServer) -> Arc<TokenManager> {
    let endpoint = OAuthClient::new(&provider_config(server), Duration::from_secs(5))
        .expect("oauth client");
    Arc::new(TokenManager::new(
        token_repo(db),
        OAuthStateRepository::new(db.clone()),
        Arc::new(endpoint),
        refresh_config(),
        10,
    ))
}

pub fn api_client(server: &MockServer, credentials: Arc<dyn CredentialSource>) -> ApiClient {
    ApiClient::new(
        &format!("{}/api/v4", server.uri()),
        PROVIDER,
        2,
        retry_policy(),
        credentials,
    )
    .expect("api client")
}

pub fn sync_service(
    db: &DatabaseConnection,
    server: &MockServer,
    config: SyncConfig,
) -> (Arc<TokenManager>, SyncService) {
    let tokens = token_manager(db, server);
    let client = api_client(server, tokens.clone());
    let service = SyncService::new(db.clone(), Arc::new(client), config);
    (tokens, service)
}

/// Install an active credential expiring `expires_in_secs` from now.
pub async fn seed_token(
    db: &DatabaseConnection,
    access_token: &str,
    refresh_token: Option<&str>,
    expires_in_secs: i64,
) -> Result<Uuid> {
    let id = token_repo(db)
        .replace_active(
            PROVIDER,
            None,
            NewToken {
                access_token: access_token.to_string(),
                refresh_token: refresh_token.map(str::to_string),
                expires_at: Utc::now() + chrono::Duration::seconds(expires_in_secs),
            },
            RefreshMetadata {
                issued_by: "authorization_code".to_string(),
                ..RefreshMetadata::default()
            },
        )
        .await?
        .ok_or_else(|| anyhow::anyhow!("seed token lost the replace race"))?;
    Ok(id)
}

pub fn contact_json(id: u64, first: &str, last: &str, email: &str) -> Value {
    json!({
        "id": id,
        "first_name": first,
        "last_name": last,
        "name": format!("{first} {last}"),
        "primary_email_address": email,
        "primary_phone_number": null,
        "type": "Person",
        "company": null,
        "updated_at": "2025-11-01T10:00:00Z"
    })
}

/// Response body of a data endpoint page.
pub fn page_body(records: Vec<Value>, next_token: Option<&str>, total: Option<u64>) -> Value {
    let next = next_token.map(|t| {
        format!("https://app.example.com/api/v4/contacts.json?limit=2&page_token={t}")
    });
    json!({
        "data": records,
        "meta": {
            "records": total,
            "paging": { "next": next }
        }
    })
}
