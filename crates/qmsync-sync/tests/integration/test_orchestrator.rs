use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use qmsync_core::domain::{SyncFailure, SyncLogAction, SyncOutcome};
use qmsync_sync::{LoadOptions, SyncOptions};

use crate::common::{documents, http_engine, record};

#[tokio::test]
async fn test_sync_then_pull_contains_both_records() {
    let server = MockServer::start().await;
    let engine = http_engine(&server, true).await;
    let key = documents("user-7");
    let records = vec![record(1, "Budget"), record(2, "Minutes")];

    Mock::given(method("POST"))
        .and(path("/api/documents-sync"))
        .and(body_partial_json(json!({
            "userId": "user-7",
            "documents": [{"id": 1, "title": "Budget"}, {"id": 2, "title": "Minutes"}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/documents-load"))
        .and(query_param("userId", "user-7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "documents": [{"id": 1, "title": "Budget"}, {"id": 2, "title": "Minutes"}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    engine.edit(&key, records.clone()).await.unwrap();
    let outcome = engine
        .orchestrator()
        .sync_with_server(&key, records.clone(), SyncOptions::default().with_pull(true))
        .await
        .expect("sync succeeds");

    assert!(matches!(
        outcome,
        SyncOutcome::Synced {
            pulled: true,
            records: 2,
            ..
        }
    ));
    assert_eq!(engine.store().get(&key).await, records);

    let state = engine.registry().state(&key);
    assert!(!state.is_syncing());
    assert!(!state.pending_changes());
    assert!(state.last_synced().is_some());
    assert!(state.last_error().is_none());

    let actions: Vec<_> = engine
        .logger()
        .entries(&key)
        .into_iter()
        .map(|e| e.action)
        .collect();
    assert_eq!(
        actions,
        vec![
            SyncLogAction::DataChanged,
            SyncLogAction::SyncStart,
            SyncLogAction::SyncSuccess
        ]
    );
    assert_eq!(engine.logger().persisted(Some(&key), 10).await.len(), 3);
}

#[tokio::test]
async fn test_offline_sync_makes_no_http_calls() {
    let server = MockServer::start().await;
    let engine = http_engine(&server, false).await;
    let key = documents("user-7");
    let records = vec![record(1, "Draft")];

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .expect(0)
        .mount(&server)
        .await;

    engine.edit(&key, records.clone()).await.unwrap();
    let result = engine
        .orchestrator()
        .sync_with_server(&key, records.clone(), SyncOptions::default())
        .await;

    assert_eq!(result, Err(SyncFailure::Offline));
    assert!(server.received_requests().await.unwrap().is_empty());
    assert_eq!(engine.store().get(&key).await, records);

    let state = engine.registry().state(&key);
    assert!(state.pending_changes());
    assert!(!state.is_syncing());
    assert!(state.last_error().is_none());
}

#[tokio::test]
async fn test_pull_returning_script_is_a_protocol_failure() {
    let server = MockServer::start().await;
    let engine = http_engine(&server, true).await;
    let key = documents("user-7");
    let records = vec![record(1, "Budget"), record(2, "Minutes")];

    Mock::given(method("POST"))
        .and(path("/api/documents-sync"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/documents-load"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<script>document.location='/login'</script>"),
        )
        .expect(1)
        .mount(&server)
        .await;

    engine.edit(&key, records.clone()).await.unwrap();
    let result = engine
        .orchestrator()
        .sync_with_server(&key, records.clone(), SyncOptions::default().with_pull(true))
        .await;

    assert!(matches!(result, Err(SyncFailure::Protocol(_))));
    assert_eq!(engine.store().get(&key).await, records);

    let state = engine.registry().state(&key);
    let error = state.last_error().expect("error recorded");
    assert!(error.starts_with("Invalid server response"), "{error}");
    assert!(state.pending_changes());
    assert!(state.last_synced().is_none());
}

#[tokio::test]
async fn test_server_error_is_retried_then_transport_failure() {
    let server = MockServer::start().await;
    let engine = http_engine(&server, true).await;
    let key = documents("user-7");

    Mock::given(method("POST"))
        .and(path("/api/documents-sync"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .expect(2)
        .mount(&server)
        .await;

    let result = engine
        .orchestrator()
        .sync_with_server(&key, vec![record(1, "a")], SyncOptions::default())
        .await;

    assert!(matches!(result, Err(SyncFailure::Transport(_))));
    let state = engine.registry().state(&key);
    assert!(state.last_error().unwrap().starts_with("Network error"));
}

#[tokio::test]
async fn test_application_failure_carries_server_message() {
    let server = MockServer::start().await;
    let engine = http_engine(&server, true).await;
    let key = documents("user-7");

    Mock::given(method("POST"))
        .and(path("/api/documents-sync"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": false,
            "message": "document 2 is locked"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let result = engine
        .orchestrator()
        .sync_with_server(&key, vec![record(2, "b")], SyncOptions::default())
        .await;

    assert_eq!(
        result,
        Err(SyncFailure::Application("document 2 is locked".into()))
    );
}

#[tokio::test]
async fn test_push_without_pull_confirms_pushed_records() {
    let server = MockServer::start().await;
    let engine = http_engine(&server, true).await;
    let key = documents("user-7");
    let records = vec![record(3, "Agenda")];

    Mock::given(method("POST"))
        .and(path("/api/documents-sync"))
        .and(body_partial_json(json!({"members": [{"id": 9}]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "timestamp": "2026-05-01T08:30:00Z"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&server)
        .await;

    let options = SyncOptions::default()
        .with_pull(false)
        .with_related("members", json!([{"id": 9}]));
    let outcome = engine
        .orchestrator()
        .sync_with_server(&key, records.clone(), options)
        .await
        .unwrap();

    let SyncOutcome::Synced {
        timestamp, pulled, ..
    } = outcome
    else {
        panic!("expected a completed sync");
    };
    assert!(!pulled);
    assert_eq!(timestamp.to_rfc3339(), "2026-05-01T08:30:00+00:00");
    assert_eq!(engine.store().get(&key).await, records);
    assert_eq!(engine.store().last_synced(&key).await, Some(timestamp));
}

#[tokio::test]
async fn test_load_from_server_falls_back_to_local_copy() {
    let server = MockServer::start().await;
    let engine = http_engine(&server, true).await;
    let key = documents("user-7");
    let local = vec![record(1, "local")];
    engine.store().set(&key, local.clone()).await.unwrap();

    Mock::given(method("GET"))
        .and(path("/api/documents-load"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<?php echo $rows; ?>"))
        .mount(&server)
        .await;

    let records = engine
        .orchestrator()
        .load_from_server(&key, &LoadOptions::default())
        .await;
    assert_eq!(records, local);
}

#[tokio::test]
async fn test_load_from_server_keeps_pending_edits_unless_forced() {
    let server = MockServer::start().await;
    let engine = http_engine(&server, true).await;
    let key = documents("user-7");
    let edited = vec![record(1, "edited offline")];

    Mock::given(method("GET"))
        .and(path("/api/documents-load"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 1, "title": "server"}])))
        .expect(1)
        .mount(&server)
        .await;

    engine.edit(&key, edited.clone()).await.unwrap();
    let kept = engine
        .orchestrator()
        .load_from_server(&key, &LoadOptions::default())
        .await;
    assert_eq!(kept, edited);

    let forced = engine
        .orchestrator()
        .load_from_server(&key, &LoadOptions { force: true })
        .await;
    assert_eq!(forced, vec![json!({"id": 1, "title": "server"})]);
}
