//! End-to-end tests of import runs: paging, merging, progress, pause/resume
//! and crash recovery.

mod test_utils;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use exchange_sync::api_client::{Page, PageSource};
use exchange_sync::error::{ApiClientError, SyncError};
use exchange_sync::merge::MergingImporter;
use exchange_sync::models::sync_job::JobStatus;
use exchange_sync::models::{EntityType, contact, exchange, task};
use exchange_sync::repositories::{ContactStore, NewSyncJob};
use exchange_sync::sync::{Orchestrator, Progress, StartOptions, SyncService, SyncStatus};
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use serde_json::{Value, json};
use test_utils::{contact_json, page_body, seed_token, setup_test_db, sync_config, sync_service};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use wiremock::matchers::{header, method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CONTACTS_PATH: &str = "/api/v4/contacts.json";

async fn mount_first_page(server: &MockServer, records: Vec<Value>, next: Option<&str>) {
    Mock::given(method("GET"))
        .and(path(CONTACTS_PATH))
        .and(query_param_is_missing("page_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page_body(records, next, None)))
        .mount(server)
        .await;
}

async fn mount_page(server: &MockServer, token: &str, records: Vec<Value>, next: Option<&str>) {
    Mock::given(method("GET"))
        .and(path(CONTACTS_PATH))
        .and(query_param("page_token", token))
        .respond_with(ResponseTemplate::new(200).set_body_json(page_body(records, next, None)))
        .mount(server)
        .await;
}

/// Two pages of two contacts each.
async fn mount_two_pages(server: &MockServer) {
    mount_first_page(
        server,
        vec![
            contact_json(1, "Ada", "Lovelace", "ada@example.com"),
            contact_json(2, "Grace", "Hopper", "grace@example.com"),
        ],
        Some("tok-2"),
    )
    .await;
    mount_page(
        server,
        "tok-2",
        vec![
            contact_json(3, "Alan", "Turing", "alan@example.com"),
            contact_json(4, "Edsger", "Dijkstra", "edsger@example.com"),
        ],
        None,
    )
    .await;
}

async fn contact_count(db: &DatabaseConnection) -> usize {
    contact::Entity::find().all(db).await.unwrap().len()
}

async fn wait_until<F>(service: &SyncService, sync_id: &str, predicate: F) -> SyncStatus
where
    F: Fn(&SyncStatus) -> bool,
{
    for _ in 0..200 {
        if let Ok(status) = service.get_sync_status(sync_id).await {
            if predicate(&status) {
                return status;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached for {sync_id}");
}

#[tokio::test]
async fn fresh_import_creates_every_record() {
    let db = setup_test_db().await.unwrap();
    let server = MockServer::start().await;
    mount_two_pages(&server).await;
    seed_token(&db, "at-1", Some("rt-1"), 3_600).await.unwrap();
    let (_tokens, service) = sync_service(&db, &server, sync_config());

    let sync_id = service
        .start_sync(EntityType::Contacts, StartOptions::default())
        .await
        .unwrap();
    assert_eq!(sync_id, "contacts_import");

    let status = service.wait_for(&sync_id).await.unwrap();
    assert_eq!(status.status, JobStatus::Completed);
    assert_eq!(status.records_processed, 4);
    assert_eq!(status.records_created, 4);
    assert_eq!(status.records_updated, 0);
    assert_eq!(status.records_failed, 0);
    assert_eq!(status.current_page, 2);
    assert_eq!(status.progress_percentage, 100.0);
    assert_eq!(status.cursor, None);
    assert!(status.end_time.is_some());
    assert!(status.errors.is_empty());
    assert_eq!(contact_count(&db).await, 4);
}

#[tokio::test]
async fn rerun_over_same_data_is_idempotent() {
    let db = setup_test_db().await.unwrap();
    let server = MockServer::start().await;
    mount_two_pages(&server).await;
    seed_token(&db, "at-1", Some("rt-1"), 3_600).await.unwrap();
    let (_tokens, service) = sync_service(&db, &server, sync_config());

    let sync_id = service
        .start_sync(EntityType::Contacts, StartOptions::default())
        .await
        .unwrap();
    service.wait_for(&sync_id).await.unwrap();

    service
        .start_sync(EntityType::Contacts, StartOptions::default())
        .await
        .unwrap();
    let second = service.wait_for(&sync_id).await.unwrap();

    assert_eq!(second.status, JobStatus::Completed);
    assert_eq!(second.records_created, 0);
    assert_eq!(second.records_updated, 4);
    assert_eq!(second.records_processed, 4);
    assert_eq!(contact_count(&db).await, 4);

    let runs = service.jobs().list_runs(&sync_id, 10).await.unwrap();
    assert_eq!(runs.len(), 2);
    let latest = &runs[0];
    assert_eq!(latest.statistics["records_unchanged"], 4);
}

#[tokio::test]
async fn token_expiry_mid_run_refreshes_once_without_reprocessing() {
    let db = setup_test_db().await.unwrap();
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(CONTACTS_PATH))
        .and(query_param_is_missing("page_token"))
        .and(header("authorization", "Bearer at-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page_body(
            vec![
                contact_json(1, "Ada", "Lovelace", "ada@example.com"),
                contact_json(2, "Grace", "Hopper", "grace@example.com"),
            ],
            Some("tok-2"),
            None,
        )))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(CONTACTS_PATH))
        .and(query_param("page_token", "tok-2"))
        .and(header("authorization", "Bearer at-1"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(CONTACTS_PATH))
        .and(query_param("page_token", "tok-2"))
        .and(header("authorization", "Bearer at-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page_body(
            vec![
                contact_json(3, "Alan", "Turing", "alan@example.com"),
                contact_json(4, "Edsger", "Dijkstra", "edsger@example.com"),
            ],
            None,
            None,
        )))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "at-2",
            "refresh_token": "rt-2",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&server)
        .await;

    seed_token(&db, "at-1", Some("rt-1"), 3_600).await.unwrap();
    let (_tokens, service) = sync_service(&db, &server, sync_config());

    let sync_id = service
        .start_sync(EntityType::Contacts, StartOptions::default())
        .await
        .unwrap();
    let status = service.wait_for(&sync_id).await.unwrap();

    assert_eq!(status.status, JobStatus::Completed);
    assert_eq!(status.records_processed, 4);
    assert_eq!(status.records_created, 4);
    assert_eq!(status.records_failed, 0);
}

/// Page source that replays fixed pages. It can panic before a given page,
/// or hold a given page until the test releases it.
struct ScriptedSource {
    pages: HashMap<Option<String>, Page>,
    panic_at: Option<String>,
    hold_at: Option<String>,
    gate: Semaphore,
    calls: Mutex<Vec<Option<String>>>,
}

impl ScriptedSource {
    fn three_pages(panic_at: Option<&str>) -> Self {
        let mut pages = HashMap::new();
        let chain = [(None, Some("p2")), (Some("p2"), Some("p3")), (Some("p3"), None)];
        let mut next_id = 1u64;
        for (token, next) in chain {
            let records = (0..2)
                .map(|_| {
                    next_id += 1;
                    contact_json(next_id, "Test", "Person", &format!("p{next_id}@example.com"))
                })
                .collect();
            pages.insert(
                token.map(str::to_string),
                Page {
                    records,
                    next_page_token: next.map(str::to_string),
                    total_records: Some(6),
                },
            );
        }
        Self {
            pages,
            panic_at: panic_at.map(str::to_string),
            hold_at: None,
            gate: Semaphore::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn holding_at(token: &str) -> Self {
        Self {
            hold_at: Some(token.to_string()),
            ..Self::three_pages(None)
        }
    }

    fn release(&self) {
        self.gate.add_permits(1);
    }

    fn calls(&self) -> Vec<Option<String>> {
        self.calls.lock().unwrap().clone()
    }

    async fn reached(&self, token: &str) {
        for _ in 0..200 {
            if self.calls().contains(&Some(token.to_string())) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("page {token} was never requested");
    }
}

#[async_trait]
impl PageSource for ScriptedSource {
    async fn fetch_page(
        &self,
        _entity_type: EntityType,
        page_token: Option<&str>,
    ) -> Result<Page, ApiClientError> {
        let key = page_token.map(str::to_string);
        self.calls.lock().unwrap().push(key.clone());
        if key.is_some() && key == self.panic_at {
            panic!("simulated crash before page commit");
        }
        if key.is_some() && key == self.hold_at {
            self.gate.acquire().await.expect("gate open").forget();
        }
        Ok(self.pages.get(&key).cloned().expect("scripted page"))
    }
}

#[tokio::test]
async fn crashed_run_resumes_after_last_committed_page() {
    // Uninterrupted baseline.
    let baseline_db = setup_test_db().await.unwrap();
    let baseline = SyncService::new(
        baseline_db.clone(),
        Arc::new(ScriptedSource::three_pages(None)),
        sync_config(),
    );
    let sync_id = baseline
        .start_sync(EntityType::Contacts, StartOptions::default())
        .await
        .unwrap();
    let expected = baseline.wait_for(&sync_id).await.unwrap();
    assert_eq!(expected.status, JobStatus::Completed);
    assert_eq!(expected.records_processed, 6);

    // Crash while fetching page 2.
    let db = setup_test_db().await.unwrap();
    let crashing = SyncService::new(
        db.clone(),
        Arc::new(ScriptedSource::three_pages(Some("p2"))),
        sync_config(),
    );
    crashing
        .start_sync(EntityType::Contacts, StartOptions::default())
        .await
        .unwrap();
    let err = crashing.wait_for(&sync_id).await.unwrap_err();
    assert!(matches!(err, SyncError::Aborted { .. }));

    let stranded = crashing.get_sync_status(&sync_id).await.unwrap();
    assert_eq!(stranded.status, JobStatus::Running);
    assert_eq!(stranded.cursor.as_deref(), Some("p2"));
    assert_eq!(stranded.records_processed, 2);

    // A fresh heartbeat blocks the takeover.
    let blocked = crashing
        .start_sync(EntityType::Contacts, StartOptions { resume: true, one_shot: false })
        .await
        .unwrap_err();
    assert!(matches!(blocked, SyncError::AlreadyRunning { .. }));

    // Once the lease is stale, a restart continues at page 2.
    let source = Arc::new(ScriptedSource::three_pages(None));
    let mut config = sync_config();
    config.stale_after_seconds = 0;
    let restarted = SyncService::new(db.clone(), source.clone(), config);
    tokio::time::sleep(Duration::from_millis(20)).await;
    restarted
        .start_sync(EntityType::Contacts, StartOptions { resume: true, one_shot: false })
        .await
        .unwrap();
    let status = restarted.wait_for(&sync_id).await.unwrap();

    assert_eq!(source.calls(), vec![Some("p2".to_string()), Some("p3".to_string())]);
    assert_eq!(status.job_id, stranded.job_id);
    assert_eq!(status.status, JobStatus::Completed);
    assert_eq!(status.records_processed, expected.records_processed);
    assert_eq!(status.records_created, expected.records_created);
    assert_eq!(status.records_updated, expected.records_updated);
    assert_eq!(status.records_failed, expected.records_failed);
    assert_eq!(contact_count(&db).await, 6);
}

#[tokio::test]
async fn taken_over_run_can_no_longer_commit() {
    let db = setup_test_db().await.unwrap();

    // The first holder stalls on page 2 until its heartbeat is stale.
    let stalled_source = Arc::new(ScriptedSource::holding_at("p2"));
    let stalled = SyncService::new(db.clone(), stalled_source.clone(), sync_config());
    let sync_id = stalled
        .start_sync(EntityType::Contacts, StartOptions::default())
        .await
        .unwrap();
    stalled_source.reached("p2").await;

    let mut config = sync_config();
    config.stale_after_seconds = 0;
    let takeover_source = Arc::new(ScriptedSource::holding_at("p2"));
    let takeover = SyncService::new(db.clone(), takeover_source.clone(), config);
    tokio::time::sleep(Duration::from_millis(20)).await;
    takeover
        .start_sync(EntityType::Contacts, StartOptions { resume: true, one_shot: false })
        .await
        .unwrap();
    takeover_source.reached("p2").await;

    // The stalled run wakes up while the new holder is running.
    stalled_source.release();
    let after_stalled = stalled.wait_for(&sync_id).await.unwrap();
    assert_eq!(after_stalled.status, JobStatus::Running);
    assert_eq!(after_stalled.cursor.as_deref(), Some("p2"));
    assert_eq!(after_stalled.records_processed, 2);
    assert_eq!(contact_count(&db).await, 2);

    takeover_source.release();
    let done = takeover.wait_for(&sync_id).await.unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.job_id, after_stalled.job_id);
    assert_eq!(done.records_processed, 6);
    assert_eq!(done.records_created, 6);
    assert_eq!(done.records_updated, 0);
    assert_eq!(contact_count(&db).await, 6);
    assert_eq!(
        takeover_source.calls(),
        vec![Some("p2".to_string()), Some("p3".to_string())]
    );
}

#[tokio::test]
async fn pause_from_another_process_is_honoured_after_next_commit() {
    let db = setup_test_db().await.unwrap();
    let source = Arc::new(ScriptedSource::holding_at("p2"));
    let worker = SyncService::new(db.clone(), source.clone(), sync_config());
    let sync_id = worker
        .start_sync(EntityType::Contacts, StartOptions::default())
        .await
        .unwrap();
    source.reached("p2").await;

    let operator = SyncService::new(
        db.clone(),
        Arc::new(ScriptedSource::three_pages(None)),
        sync_config(),
    );
    operator.pause_sync(&sync_id).await.unwrap();
    let flagged = operator.jobs().find_latest(&sync_id).await.unwrap().unwrap();
    assert_eq!(flagged.job_status(), JobStatus::Running);
    assert!(flagged.pause_requested);

    source.release();
    let paused = worker.wait_for(&sync_id).await.unwrap();
    assert_eq!(paused.status, JobStatus::Paused);
    assert_eq!(paused.cursor.as_deref(), Some("p3"));
    assert_eq!(paused.records_processed, 4);
    assert_eq!(source.calls(), vec![None, Some("p2".to_string())]);

    operator.resume_sync(&sync_id).await.unwrap();
    let done = operator.wait_for(&sync_id).await.unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.job_id, paused.job_id);
    assert_eq!(done.records_processed, 6);
}

#[tokio::test]
async fn pausing_an_abandoned_record_moves_it_to_paused() {
    let db = setup_test_db().await.unwrap();
    let mut config = sync_config();
    config.stale_after_seconds = 0;
    let source = Arc::new(ScriptedSource::three_pages(None));
    let service = SyncService::new(db.clone(), source.clone(), config);

    let progress = Progress::new(10);
    let abandoned = service
        .jobs()
        .create(
            &db,
            NewSyncJob {
                sync_id: "contacts_import",
                entity_type: EntityType::Contacts,
                status: JobStatus::Running,
                start_time: Utc::now().fixed_offset(),
                progress: &progress,
            },
        )
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    service.pause_sync("contacts_import").await.unwrap();
    let paused = service.get_sync_status("contacts_import").await.unwrap();
    assert_eq!(paused.status, JobStatus::Paused);
    assert_eq!(paused.job_id, abandoned.id);
    assert!(paused.end_time.is_none());
    assert!(source.calls().is_empty());

    service.resume_sync("contacts_import").await.unwrap();
    let done = service.wait_for("contacts_import").await.unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.job_id, abandoned.id);
    assert_eq!(done.records_processed, 6);
}

#[tokio::test]
async fn pause_requested_while_pending_survives_into_running() {
    let db = setup_test_db().await.unwrap();
    let source = Arc::new(ScriptedSource::three_pages(None));
    let service = SyncService::new(db.clone(), source.clone(), sync_config());

    let progress = Progress::new(10);
    let job = service
        .jobs()
        .create(
            &db,
            NewSyncJob {
                sync_id: "contacts_import",
                entity_type: EntityType::Contacts,
                status: JobStatus::Pending,
                start_time: Utc::now().fixed_offset(),
                progress: &progress,
            },
        )
        .await
        .unwrap();

    service.pause_sync("contacts_import").await.unwrap();
    let pending = service.jobs().find_by_id(job.id).await.unwrap().unwrap();
    assert_eq!(pending.job_status(), JobStatus::Pending);
    assert!(pending.pause_requested);

    let orchestrator = Orchestrator::new(
        db.clone(),
        source.clone(),
        Arc::new(MergingImporter::new(ContactStore)),
        EntityType::Contacts,
        sync_config(),
    );
    let status = orchestrator
        .run(pending, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(status, JobStatus::Paused);
    assert!(source.calls().is_empty());
    let row = service.jobs().find_by_id(job.id).await.unwrap().unwrap();
    assert_eq!(row.job_status(), JobStatus::Paused);
    assert!(!row.pause_requested);
}

#[tokio::test]
async fn pause_stops_after_commit_and_resume_finishes() {
    let db = setup_test_db().await.unwrap();
    let server = MockServer::start().await;
    mount_first_page(
        &server,
        vec![
            contact_json(1, "Ada", "Lovelace", "ada@example.com"),
            contact_json(2, "Grace", "Hopper", "grace@example.com"),
        ],
        Some("tok-2"),
    )
    .await;
    Mock::given(method("GET"))
        .and(path(CONTACTS_PATH))
        .and(query_param("page_token", "tok-2"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(page_body(
                    vec![contact_json(3, "Alan", "Turing", "alan@example.com")],
                    None,
                    None,
                ))
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&server)
        .await;
    seed_token(&db, "at-1", Some("rt-1"), 3_600).await.unwrap();
    let (_tokens, service) = sync_service(&db, &server, sync_config());

    let sync_id = service
        .start_sync(EntityType::Contacts, StartOptions::default())
        .await
        .unwrap();
    wait_until(&service, &sync_id, |s| s.current_page == 1).await;

    service.pause_sync(&sync_id).await.unwrap();
    let paused = service.wait_for(&sync_id).await.unwrap();
    assert_eq!(paused.status, JobStatus::Paused);
    assert_eq!(paused.cursor.as_deref(), Some("tok-2"));
    assert_eq!(paused.records_processed, 2);
    assert!(paused.end_time.is_none());

    // Pausing again is a no-op.
    service.pause_sync(&sync_id).await.unwrap();

    service.resume_sync(&sync_id).await.unwrap();
    let done = service.wait_for(&sync_id).await.unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.job_id, paused.job_id);
    assert_eq!(done.records_processed, 3);
    assert_eq!(done.records_created, 3);
    assert_eq!(contact_count(&db).await, 3);
}

#[tokio::test]
async fn second_start_while_running_is_rejected() {
    let db = setup_test_db().await.unwrap();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(CONTACTS_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(page_body(vec![], None, Some(0)))
                .set_delay(Duration::from_millis(200)),
        )
        .mount(&server)
        .await;
    seed_token(&db, "at-1", Some("rt-1"), 3_600).await.unwrap();
    let (_tokens, service) = sync_service(&db, &server, sync_config());

    let sync_id = service
        .start_sync(EntityType::Contacts, StartOptions::default())
        .await
        .unwrap();
    let err = service
        .start_sync(EntityType::Contacts, StartOptions { resume: true, one_shot: false })
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::AlreadyRunning { .. }));

    // A one-shot run gets its own id and is not blocked.
    let one_shot = service
        .start_sync(EntityType::Contacts, StartOptions { resume: false, one_shot: true })
        .await
        .unwrap();
    assert!(one_shot.starts_with("contacts_import_"));

    assert_eq!(service.wait_for(&sync_id).await.unwrap().status, JobStatus::Completed);
    assert_eq!(service.wait_for(&one_shot).await.unwrap().status, JobStatus::Completed);
}

#[tokio::test]
async fn live_record_held_by_another_process_is_rejected() {
    let db = setup_test_db().await.unwrap();
    let server = MockServer::start().await;
    let (_tokens, service) = sync_service(&db, &server, sync_config());

    let progress = Progress::new(10);
    service
        .jobs()
        .create(
            &db,
            NewSyncJob {
                sync_id: "tasks_import",
                entity_type: EntityType::Tasks,
                status: JobStatus::Running,
                start_time: Utc::now().fixed_offset(),
                progress: &progress,
            },
        )
        .await
        .unwrap();

    let err = service
        .start_sync(EntityType::Tasks, StartOptions { resume: true, one_shot: false })
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::AlreadyRunning { ref sync_id } if sync_id == "tasks_import"));
}

#[tokio::test]
async fn malformed_records_are_counted_and_the_job_continues() {
    let db = setup_test_db().await.unwrap();
    let server = MockServer::start().await;
    mount_first_page(
        &server,
        vec![
            contact_json(1, "Ada", "Lovelace", "ada@example.com"),
            contact_json(2, "Bad", "Email", "not-an-email"),
        ],
        Some("tok-2"),
    )
    .await;
    mount_page(
        &server,
        "tok-2",
        vec![json!({"first_name": "No", "last_name": "Id"})],
        None,
    )
    .await;
    seed_token(&db, "at-1", Some("rt-1"), 3_600).await.unwrap();
    let (_tokens, service) = sync_service(&db, &server, sync_config());

    let sync_id = service
        .start_sync(EntityType::Contacts, StartOptions::default())
        .await
        .unwrap();
    let status = service.wait_for(&sync_id).await.unwrap();

    assert_eq!(status.status, JobStatus::Completed);
    assert_eq!(status.records_processed, 3);
    assert_eq!(status.records_created, 1);
    assert_eq!(status.records_failed, 2);
    assert_eq!(status.errors.len(), 2);
    assert_eq!(status.errors[0].page, 1);
    assert_eq!(status.errors[0].external_id.as_deref(), Some("2"));
    assert_eq!(status.errors[0].kind.as_deref(), Some("merge"));
    assert_eq!(status.errors[1].page, 2);
    assert_eq!(contact_count(&db).await, 1);
}

#[tokio::test]
async fn missing_credential_fails_the_run() {
    let db = setup_test_db().await.unwrap();
    let server = MockServer::start().await;
    let (_tokens, service) = sync_service(&db, &server, sync_config());

    let sync_id = service
        .start_sync(EntityType::Matters, StartOptions::default())
        .await
        .unwrap();
    let status = service.wait_for(&sync_id).await.unwrap();

    assert_eq!(status.status, JobStatus::Failed);
    assert_eq!(status.records_processed, 0);
    assert!(status.end_time.is_some());
    assert_eq!(status.errors.len(), 1);
    assert_eq!(status.errors[0].kind.as_deref(), Some("no_token"));
}

#[tokio::test]
async fn exhausted_page_attempts_fail_then_resume_seeds_a_new_run() {
    let db = setup_test_db().await.unwrap();
    let server = MockServer::start().await;
    mount_first_page(
        &server,
        vec![
            contact_json(1, "Ada", "Lovelace", "ada@example.com"),
            contact_json(2, "Grace", "Hopper", "grace@example.com"),
        ],
        Some("tok-2"),
    )
    .await;
    Mock::given(method("GET"))
        .and(path(CONTACTS_PATH))
        .and(query_param("page_token", "tok-2"))
        .respond_with(ResponseTemplate::new(503).set_body_string("down for maintenance"))
        .mount(&server)
        .await;
    seed_token(&db, "at-1", Some("rt-1"), 3_600).await.unwrap();
    let (_tokens, service) = sync_service(&db, &server, sync_config());

    let sync_id = service
        .start_sync(EntityType::Contacts, StartOptions::default())
        .await
        .unwrap();
    let failed = service.wait_for(&sync_id).await.unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.cursor.as_deref(), Some("tok-2"));
    assert_eq!(failed.records_processed, 2);
    assert_eq!(failed.errors.len(), 2);
    assert!(failed.errors.iter().all(|e| e.kind.as_deref() == Some("transient")));

    server.reset().await;
    mount_page(
        &server,
        "tok-2",
        vec![contact_json(3, "Alan", "Turing", "alan@example.com")],
        None,
    )
    .await;

    service
        .start_sync(EntityType::Contacts, StartOptions { resume: true, one_shot: false })
        .await
        .unwrap();
    let resumed = service.wait_for(&sync_id).await.unwrap();
    assert_eq!(resumed.status, JobStatus::Completed);
    assert_ne!(resumed.job_id, failed.job_id);
    assert_eq!(resumed.records_processed, 3);
    assert_eq!(resumed.start_time, failed.start_time);

    let latest = service.jobs().find_latest(&sync_id).await.unwrap().unwrap();
    assert_eq!(latest.statistics["resumed_from"], json!(failed.job_id));
}

#[tokio::test]
async fn local_fields_survive_and_unlinked_rows_are_attached() {
    let db = setup_test_db().await.unwrap();
    let server = MockServer::start().await;
    let now = Utc::now().fixed_offset();

    let linked_id = Uuid::new_v4();
    contact::ActiveModel {
        id: Set(linked_id),
        external_id: Set(Some("1".to_string())),
        first_name: Set(Some("Ada".to_string())),
        last_name: Set(Some("Byron".to_string())),
        display_name: Set(Some("Ada Byron".to_string())),
        email: Set(Some("ada@example.com".to_string())),
        phone: Set(None),
        contact_type: Set(Some("Person".to_string())),
        company_name: Set(None),
        notes: Set(Some("prefers phone calls".to_string())),
        relationship_status: Set(Some("vip".to_string())),
        raw_external: Set(None),
        last_synced_at: Set(None),
        is_active: Set(true),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(&db)
    .await
    .unwrap();

    let unlinked_id = Uuid::new_v4();
    contact::ActiveModel {
        id: Set(unlinked_id),
        external_id: Set(None),
        first_name: Set(Some("Grace".to_string())),
        last_name: Set(None),
        display_name: Set(Some("Grace".to_string())),
        email: Set(Some("grace@example.com".to_string())),
        phone: Set(None),
        contact_type: Set(None),
        company_name: Set(None),
        notes: Set(Some("met at conference".to_string())),
        relationship_status: Set(None),
        raw_external: Set(None),
        last_synced_at: Set(None),
        is_active: Set(true),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(&db)
    .await
    .unwrap();

    mount_first_page(
        &server,
        vec![
            contact_json(1, "Ada", "Lovelace", "ada@example.com"),
            contact_json(2, "Grace", "Hopper", "GRACE@example.com"),
        ],
        None,
    )
    .await;
    seed_token(&db, "at-1", Some("rt-1"), 3_600).await.unwrap();
    let (_tokens, service) = sync_service(&db, &server, sync_config());

    let sync_id = service
        .start_sync(EntityType::Contacts, StartOptions::default())
        .await
        .unwrap();
    let status = service.wait_for(&sync_id).await.unwrap();
    assert_eq!(status.records_created, 0);
    assert_eq!(status.records_updated, 2);
    assert_eq!(contact_count(&db).await, 2);

    let linked = contact::Entity::find_by_id(linked_id).one(&db).await.unwrap().unwrap();
    assert_eq!(linked.last_name.as_deref(), Some("Lovelace"));
    assert_eq!(linked.notes.as_deref(), Some("prefers phone calls"));
    assert_eq!(linked.relationship_status.as_deref(), Some("vip"));
    assert!(linked.raw_external.is_some());
    assert!(linked.last_synced_at.is_some());

    let attached = contact::Entity::find_by_id(unlinked_id).one(&db).await.unwrap().unwrap();
    assert_eq!(attached.external_id.as_deref(), Some("2"));
    assert_eq!(attached.last_name.as_deref(), Some("Hopper"));
    assert_eq!(attached.notes.as_deref(), Some("met at conference"));
}

#[tokio::test]
async fn completed_run_deactivates_records_it_did_not_see() {
    let db = setup_test_db().await.unwrap();
    let server = MockServer::start().await;
    let now = Utc::now().fixed_offset();

    let gone_id = Uuid::new_v4();
    contact::ActiveModel {
        id: Set(gone_id),
        external_id: Set(Some("99".to_string())),
        first_name: Set(Some("Former".to_string())),
        last_name: Set(Some("Client".to_string())),
        display_name: Set(Some("Former Client".to_string())),
        email: Set(None),
        phone: Set(None),
        contact_type: Set(None),
        company_name: Set(None),
        notes: Set(None),
        relationship_status: Set(None),
        raw_external: Set(None),
        last_synced_at: Set(Some(now - chrono::Duration::days(3))),
        is_active: Set(true),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(&db)
    .await
    .unwrap();

    mount_two_pages(&server).await;
    seed_token(&db, "at-1", Some("rt-1"), 3_600).await.unwrap();
    let mut config = sync_config();
    config.deactivate_missing = true;
    let (_tokens, service) = sync_service(&db, &server, config);

    let sync_id = service
        .start_sync(EntityType::Contacts, StartOptions::default())
        .await
        .unwrap();
    let status = service.wait_for(&sync_id).await.unwrap();
    assert_eq!(status.status, JobStatus::Completed);

    let gone = contact::Entity::find_by_id(gone_id).one(&db).await.unwrap().unwrap();
    assert!(!gone.is_active);
    let active = contact::Entity::find()
        .filter(contact::Column::IsActive.eq(true))
        .all(&db)
        .await
        .unwrap();
    assert_eq!(active.len(), 4);

    let latest = service.jobs().find_latest(&sync_id).await.unwrap().unwrap();
    assert_eq!(latest.statistics["records_deactivated"], 1);
}

#[tokio::test]
async fn status_pause_and_resume_report_invalid_requests() {
    let db = setup_test_db().await.unwrap();
    let server = MockServer::start().await;
    let (_tokens, service) = sync_service(&db, &server, sync_config());

    let missing = service.get_sync_status("contacts_import").await.unwrap_err();
    assert!(matches!(missing, SyncError::NotFound { .. }));

    let sync_id = service
        .start_sync(EntityType::Contacts, StartOptions::default())
        .await
        .unwrap();
    let failed = service.wait_for(&sync_id).await.unwrap();
    assert_eq!(failed.status, JobStatus::Failed);

    let pause = service.pause_sync(&sync_id).await.unwrap_err();
    assert!(matches!(pause, SyncError::InvalidState { operation: "pause", .. }));
    let resume = service.resume_sync(&sync_id).await.unwrap_err();
    assert!(matches!(resume, SyncError::InvalidState { operation: "resume", .. }));
}

fn matter_json(id: u64, display_number: &str, description: &str) -> Value {
    json!({
        "id": id,
        "display_number": display_number,
        "description": description,
        "status": "Open",
        "open_date": "2025-01-15",
        "close_date": null,
        "client": {"id": 501, "name": "Smith"},
        "practice_area": {"name": "Real Estate"},
        "updated_at": "2025-11-01T10:00:00Z"
    })
}

fn task_json(id: &str, name: &str, matter_id: u64) -> Value {
    json!({
        "id": id,
        "name": name,
        "description": null,
        "status": "pending",
        "priority": "High",
        "due_at": "2025-12-01T17:00:00Z",
        "matter": {"id": matter_id},
        "assignee": {"name": "Q. Intermediary"},
        "updated_at": "2025-11-01T10:00:00Z"
    })
}

#[tokio::test]
async fn matters_and_tasks_import_keeps_local_workflow_fields() {
    let db = setup_test_db().await.unwrap();
    let server = MockServer::start().await;
    let now = Utc::now().fixed_offset();

    let unlinked_id = Uuid::new_v4();
    exchange::ActiveModel {
        id: Set(unlinked_id),
        external_id: Set(None),
        display_number: Set(Some("00042-Smith".to_string())),
        description: Set(Some("Smith exchange".to_string())),
        matter_status: Set(None),
        client_external_id: Set(None),
        practice_area: Set(None),
        open_date: Set(None),
        close_date: Set(None),
        exchange_stage: Set(Some("identification".to_string())),
        notes: Set(Some("45-day clock started".to_string())),
        raw_external: Set(None),
        last_synced_at: Set(None),
        is_active: Set(true),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(&db)
    .await
    .unwrap();

    let closed_id = Uuid::new_v4();
    exchange::ActiveModel {
        id: Set(closed_id),
        external_id: Set(Some("7777".to_string())),
        display_number: Set(Some("00001-Old".to_string())),
        description: Set(None),
        matter_status: Set(Some("Closed".to_string())),
        client_external_id: Set(None),
        practice_area: Set(None),
        open_date: Set(None),
        close_date: Set(None),
        exchange_stage: Set(Some("closed".to_string())),
        notes: Set(None),
        raw_external: Set(None),
        last_synced_at: Set(Some(now - chrono::Duration::days(3))),
        is_active: Set(true),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(&db)
    .await
    .unwrap();

    let task_id = Uuid::new_v4();
    task::ActiveModel {
        id: Set(task_id),
        external_id: Set(Some("t-1".to_string())),
        name: Set(Some("Old name".to_string())),
        description: Set(None),
        task_status: Set(None),
        priority: Set(None),
        due_at: Set(None),
        matter_external_id: Set(None),
        assignee_name: Set(None),
        notes: Set(Some("call the intermediary".to_string())),
        local_priority: Set(Some("urgent".to_string())),
        raw_external: Set(None),
        last_synced_at: Set(Some(now)),
        is_active: Set(true),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(&db)
    .await
    .unwrap();

    Mock::given(method("GET"))
        .and(path("/api/v4/matters.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page_body(
            vec![
                matter_json(9001, "00042-Smith", "Elm St relinquished property"),
                matter_json(9002, "00043-Jones", "Oak Ave replacement"),
            ],
            None,
            Some(2),
        )))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v4/tasks.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page_body(
            vec![
                task_json("t-1", "Identify replacement property", 9001),
                task_json("t-2", "Close on replacement", 9002),
            ],
            None,
            Some(2),
        )))
        .mount(&server)
        .await;
    seed_token(&db, "at-1", Some("rt-1"), 3_600).await.unwrap();
    let mut config = sync_config();
    config.deactivate_missing = true;
    let (_tokens, service) = sync_service(&db, &server, config);

    let matters = service
        .start_sync(EntityType::Matters, StartOptions::default())
        .await
        .unwrap();
    assert_eq!(matters, "matters_import");
    let status = service.wait_for(&matters).await.unwrap();
    assert_eq!(status.status, JobStatus::Completed);
    assert_eq!(status.records_processed, 2);
    assert_eq!(status.records_created, 1);
    assert_eq!(status.records_updated, 1);
    let latest = service.jobs().find_latest(&matters).await.unwrap().unwrap();
    assert_eq!(latest.statistics["records_deactivated"], 1);

    let linked = exchange::Entity::find_by_id(unlinked_id).one(&db).await.unwrap().unwrap();
    assert_eq!(linked.external_id.as_deref(), Some("9001"));
    assert_eq!(linked.description.as_deref(), Some("Elm St relinquished property"));
    assert_eq!(linked.practice_area.as_deref(), Some("Real Estate"));
    assert_eq!(linked.client_external_id.as_deref(), Some("501"));
    assert_eq!(linked.open_date, NaiveDate::from_ymd_opt(2025, 1, 15));
    assert_eq!(linked.exchange_stage.as_deref(), Some("identification"));
    assert_eq!(linked.notes.as_deref(), Some("45-day clock started"));
    assert!(linked.last_synced_at.is_some());

    let closed = exchange::Entity::find_by_id(closed_id).one(&db).await.unwrap().unwrap();
    assert!(!closed.is_active);
    assert_eq!(closed.exchange_stage.as_deref(), Some("closed"));
    assert_eq!(exchange::Entity::find().all(&db).await.unwrap().len(), 3);

    // Same data again: both rows are unchanged and only their sync marker moves.
    service
        .start_sync(EntityType::Matters, StartOptions::default())
        .await
        .unwrap();
    let rerun = service.wait_for(&matters).await.unwrap();
    assert_eq!(rerun.records_created, 0);
    assert_eq!(rerun.records_updated, 2);
    let latest = service.jobs().find_latest(&matters).await.unwrap().unwrap();
    assert_eq!(latest.statistics["records_unchanged"], 2);
    let relinked = exchange::Entity::find_by_id(unlinked_id).one(&db).await.unwrap().unwrap();
    assert_eq!(relinked.exchange_stage.as_deref(), Some("identification"));
    assert!(relinked.last_synced_at >= linked.last_synced_at);

    let tasks = service
        .start_sync(EntityType::Tasks, StartOptions::default())
        .await
        .unwrap();
    let status = service.wait_for(&tasks).await.unwrap();
    assert_eq!(status.status, JobStatus::Completed);
    assert_eq!(status.records_created, 1);
    assert_eq!(status.records_updated, 1);

    let updated = task::Entity::find_by_id(task_id).one(&db).await.unwrap().unwrap();
    assert_eq!(updated.name.as_deref(), Some("Identify replacement property"));
    assert_eq!(updated.priority.as_deref(), Some("High"));
    assert_eq!(updated.matter_external_id.as_deref(), Some("9001"));
    assert_eq!(updated.assignee_name.as_deref(), Some("Q. Intermediary"));
    assert!(updated.due_at.is_some());
    assert_eq!(updated.notes.as_deref(), Some("call the intermediary"));
    assert_eq!(updated.local_priority.as_deref(), Some("urgent"));

    let created = task::Entity::find()
        .filter(task::Column::ExternalId.eq("t-2"))
        .one(&db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(created.name.as_deref(), Some("Close on replacement"));
    assert_eq!(created.notes, None);
    assert_eq!(created.local_priority, None);
}
