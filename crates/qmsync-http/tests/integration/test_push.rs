use serde_json::{json, Map};
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, ResponseTemplate};

use qmsync_core::ports::{FormatError, IRemoteStore, RemoteError};

use crate::common::{documents, setup};

#[tokio::test]
async fn test_push_sends_whole_table() {
    let (server, store) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api/documents-sync"))
        .and(body_json(json!({
            "userId": "user-7",
            "documents": [{"id": "d1"}, {"id": "d2"}],
            "members": []
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "message": "saved"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut related = Map::new();
    related.insert("members".into(), json!([]));

    let ack = store
        .push(&documents(), &[json!({"id": "d1"}), json!({"id": "d2"})], &related)
        .await
        .expect("push succeeds");
    assert_eq!(ack.message.as_deref(), Some("saved"));
}

#[tokio::test]
async fn test_push_application_failure() {
    let (server, store) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api/documents-sync"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": false,
            "message": "Base de données indisponible"
        })))
        .mount(&server)
        .await;

    let err = store.push(&documents(), &[], &Map::new()).await.unwrap_err();
    assert_eq!(
        err,
        RemoteError::Application("Base de données indisponible".into())
    );
}

#[tokio::test]
async fn test_push_php_source_is_format_error() {
    let (server, store) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api/documents-sync"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/x-httpd-php")
                .set_body_string("<?php\nheader('Content-Type: application/json');"),
        )
        .mount(&server)
        .await;

    let err = store.push(&documents(), &[], &Map::new()).await.unwrap_err();
    assert!(matches!(err, RemoteError::Format(FormatError::Markup(_))));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_push_server_error_status() {
    let (server, store) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api/documents-sync"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let err = store.push(&documents(), &[], &Map::new()).await.unwrap_err();
    match &err {
        RemoteError::Status { status, body } => {
            assert_eq!(*status, 503);
            assert_eq!(body, "maintenance");
        }
        other => panic!("expected status error, got {other:?}"),
    }
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_push_timeout() {
    let (server, store) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api/documents-sync"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"success": true}))
                .set_delay(std::time::Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let err = store.push(&documents(), &[], &Map::new()).await.unwrap_err();
    assert_eq!(err, RemoteError::Timeout);
}
