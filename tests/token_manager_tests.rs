//! Integration tests for the token manager against a mock token endpoint.

mod test_utils;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use exchange_sync::error::TokenError;
use exchange_sync::models::oauth_token;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, sea_query::Expr};
use serde_json::json;
use test_utils::{PROVIDER, seed_token, setup_test_db, token_manager, token_repo};
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn refreshed_grant(access: &str, refresh: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "access_token": access,
        "refresh_token": refresh,
        "token_type": "bearer",
        "expires_in": 3600
    }))
}

#[tokio::test]
async fn fresh_token_is_returned_without_network_call() {
    let db = setup_test_db().await.unwrap();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(refreshed_grant("never", "never"))
        .expect(0)
        .mount(&server)
        .await;

    seed_token(&db, "at-1", Some("rt-1"), 3_600).await.unwrap();
    let manager = token_manager(&db, &server);

    let token = manager.get_valid_access_token(PROVIDER).await.unwrap();
    assert_eq!(token, "at-1");

    let stored = token_repo(&db).find_active(PROVIDER).await.unwrap().unwrap();
    assert_eq!(stored.metadata.refresh_count, 0);
}

#[tokio::test]
async fn fast_path_stamps_last_used_at_sparingly() {
    let db = setup_test_db().await.unwrap();
    let server = MockServer::start().await;
    let id = seed_token(&db, "at-1", Some("rt-1"), 3_600).await.unwrap();
    let manager = token_manager(&db, &server);
    let repo = token_repo(&db);

    let seeded = repo.find_active(PROVIDER).await.unwrap().unwrap().last_used_at;
    assert!(seeded.is_some());
    for _ in 0..3 {
        manager.get_valid_access_token(PROVIDER).await.unwrap();
    }
    let after_burst = repo.find_active(PROVIDER).await.unwrap().unwrap().last_used_at;
    assert_eq!(after_burst, seeded);

    let long_ago = (Utc::now() - chrono::Duration::minutes(10)).fixed_offset();
    oauth_token::Entity::update_many()
        .col_expr(oauth_token::Column::LastUsedAt, Expr::value(long_ago))
        .filter(oauth_token::Column::Id.eq(id))
        .exec(&db)
        .await
        .unwrap();

    manager.get_valid_access_token(PROVIDER).await.unwrap();
    let stamped = repo.find_active(PROVIDER).await.unwrap().unwrap().last_used_at.unwrap();
    assert!(stamped > long_ago.with_timezone(&Utc) + chrono::Duration::minutes(5));
}

#[tokio::test]
async fn token_inside_safety_margin_is_refreshed_and_rotated() {
    let db = setup_test_db().await.unwrap();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=rt-1"))
        .respond_with(refreshed_grant("at-2", "rt-2"))
        .expect(1)
        .mount(&server)
        .await;

    let old_id = seed_token(&db, "at-1", Some("rt-1"), 60).await.unwrap();
    let manager = token_manager(&db, &server);

    let token = manager.get_valid_access_token(PROVIDER).await.unwrap();
    assert_eq!(token, "at-2");

    let repo = token_repo(&db);
    let active = repo.find_active(PROVIDER).await.unwrap().unwrap();
    assert_ne!(active.id, old_id);
    assert_eq!(active.refresh_token.as_deref(), Some("rt-2"));
    assert_eq!(active.metadata.refresh_count, 1);
    assert_eq!(active.metadata.previous_token_id, Some(old_id));
    assert!(active.metadata.last_refreshed_at.is_some());
    assert_eq!(repo.count_active(PROVIDER).await.unwrap(), 1);

    let history = repo.history(PROVIDER).await.unwrap();
    assert_eq!(history.len(), 2);
    assert!(history.iter().any(|t| t.id == old_id && !t.is_active));
}

#[tokio::test]
async fn concurrent_callers_share_a_single_refresh() {
    let db = setup_test_db().await.unwrap();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(refreshed_grant("at-2", "rt-2").set_delay(Duration::from_millis(100)))
        .expect(1)
        .mount(&server)
        .await;

    seed_token(&db, "at-1", Some("rt-1"), 30).await.unwrap();
    let manager = token_manager(&db, &server);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let manager = Arc::clone(&manager);
        handles.push(tokio::spawn(async move {
            manager.get_valid_access_token(PROVIDER).await
        }));
    }

    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), "at-2");
    }
    assert_eq!(token_repo(&db).count_active(PROVIDER).await.unwrap(), 1);
}

#[tokio::test]
async fn transient_refresh_failure_is_retried() {
    let db = setup_test_db().await.unwrap();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(refreshed_grant("at-2", "rt-2"))
        .expect(1)
        .mount(&server)
        .await;

    seed_token(&db, "at-1", Some("rt-1"), -10).await.unwrap();
    let manager = token_manager(&db, &server);

    assert_eq!(manager.get_valid_access_token(PROVIDER).await.unwrap(), "at-2");
}

#[tokio::test]
async fn revoked_refresh_token_deactivates_without_deleting() {
    let db = setup_test_db().await.unwrap();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "refresh token revoked"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let id = seed_token(&db, "at-1", Some("rt-dead"), -10).await.unwrap();
    let manager = token_manager(&db, &server);

    let err = manager.get_valid_access_token(PROVIDER).await.unwrap_err();
    assert!(
        matches!(err, TokenError::RefreshFailed { attempts: 1, .. }),
        "unexpected: {err:?}"
    );

    let repo = token_repo(&db);
    assert_eq!(repo.count_active(PROVIDER).await.unwrap(), 0);
    let history = repo.history(PROVIDER).await.unwrap();
    let row = history.iter().find(|t| t.id == id).expect("row kept");
    assert!(!row.is_active);
    assert!(row.metadata.last_error.is_some());
    assert_eq!(row.metadata.consecutive_failures, 1);

    let again = manager.get_valid_access_token(PROVIDER).await.unwrap_err();
    assert!(matches!(again, TokenError::NoToken { .. }));
}

#[tokio::test]
async fn missing_credential_is_no_token() {
    let db = setup_test_db().await.unwrap();
    let server = MockServer::start().await;
    let manager = token_manager(&db, &server);

    let err = manager.get_valid_access_token(PROVIDER).await.unwrap_err();
    assert!(matches!(err, TokenError::NoToken { ref provider } if provider == PROVIDER));
}

#[tokio::test]
async fn expired_token_without_refresh_token_is_no_token() {
    let db = setup_test_db().await.unwrap();
    let server = MockServer::start().await;
    seed_token(&db, "at-1", None, -60).await.unwrap();
    let manager = token_manager(&db, &server);

    let err = manager.get_valid_access_token(PROVIDER).await.unwrap_err();
    assert!(matches!(err, TokenError::NoToken { .. }));
}

#[tokio::test]
async fn force_refresh_skips_exchange_when_token_already_replaced() {
    let db = setup_test_db().await.unwrap();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(refreshed_grant("at-2", "rt-2"))
        .expect(1)
        .mount(&server)
        .await;

    seed_token(&db, "at-1", Some("rt-1"), 3_600).await.unwrap();
    let manager = token_manager(&db, &server);

    assert_eq!(manager.force_refresh(PROVIDER, "at-1").await.unwrap(), "at-2");
    // A second caller that also saw at-1 rejected reuses the new token.
    assert_eq!(manager.force_refresh(PROVIDER, "at-1").await.unwrap(), "at-2");
}

#[tokio::test]
async fn authorization_state_is_single_use() {
    let db = setup_test_db().await.unwrap();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=code-1"))
        .respond_with(refreshed_grant("at-1", "rt-1"))
        .expect(1)
        .mount(&server)
        .await;

    let manager = token_manager(&db, &server);
    let request = manager.begin_authorization(PROVIDER).await.unwrap();
    assert!(request.url.as_str().contains(&request.state));

    manager
        .complete_authorization(PROVIDER, &request.state, "code-1")
        .await
        .unwrap();
    let active = token_repo(&db).find_active(PROVIDER).await.unwrap().unwrap();
    assert_eq!(active.access_token, "at-1");
    assert_eq!(active.metadata.issued_by, "authorization_code");

    let replay = manager
        .complete_authorization(PROVIDER, &request.state, "code-1")
        .await
        .unwrap_err();
    assert!(matches!(replay, TokenError::InvalidState));
}

#[tokio::test]
async fn tick_refreshes_tokens_inside_margin() {
    let db = setup_test_db().await.unwrap();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(refreshed_grant("at-2", "rt-2"))
        .expect(1)
        .mount(&server)
        .await;

    seed_token(&db, "at-1", Some("rt-1"), 120).await.unwrap();
    let manager = token_manager(&db, &server);

    let refreshed = manager.tick().await.unwrap();
    assert_eq!(refreshed, 1);
    let active = token_repo(&db).find_active(PROVIDER).await.unwrap().unwrap();
    assert_eq!(active.access_token, "at-2");
}
