use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, ResponseTemplate};

use qmsync_core::ports::{FormatError, IRemoteStore, PullPayload, RemoteError};

use crate::common::{documents, setup};

#[tokio::test]
async fn test_pull_flat_array() {
    let (server, store) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/documents-load"))
        .and(query_param("userId", "user-7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": "d1"},
            {"id": "d2"}
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let payload = store.pull(&documents()).await.expect("pull succeeds");
    assert!(matches!(payload, PullPayload::Flat(_)));
    assert_eq!(payload.records().len(), 2);
}

#[tokio::test]
async fn test_pull_nested_object() {
    let (server, store) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/documents-load"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "documents": [{"id": "d1"}],
            "lastSynced": "2026-06-01T12:00:00Z"
        })))
        .mount(&server)
        .await;

    let payload = store.pull(&documents()).await.unwrap();
    assert!(matches!(payload, PullPayload::Nested { .. }));
    assert!(payload.server_timestamp().is_some());
    assert_eq!(payload.into_records(), vec![json!({"id": "d1"})]);
}

#[tokio::test]
async fn test_pull_script_markup() {
    let (server, store) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/documents-load"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<script>window.location='/login'</script>"))
        .mount(&server)
        .await;

    let err = store.pull(&documents()).await.unwrap_err();
    assert_eq!(
        err,
        RemoteError::Format(FormatError::Markup("<script".into()))
    );
}

#[tokio::test]
async fn test_pull_html_error_page() {
    let (server, store) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/documents-load"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html")
                .set_body_string("Service temporarily unavailable"),
        )
        .mount(&server)
        .await;

    let err = store.pull(&documents()).await.unwrap_err();
    assert!(matches!(err, RemoteError::Format(FormatError::Markup(_))));
}

#[tokio::test]
async fn test_pull_not_found_is_not_retryable() {
    let (server, store) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/documents-load"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = store.pull(&documents()).await.unwrap_err();
    assert!(matches!(err, RemoteError::Status { status: 404, .. }));
    assert!(!err.is_retryable());
}
