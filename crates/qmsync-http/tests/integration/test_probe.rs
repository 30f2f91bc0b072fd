use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

use qmsync_core::ports::{IRemoteStore, RemoteError};
use qmsync_http::HttpRemoteStore;

use crate::common::setup;

#[tokio::test]
async fn test_probe_reachable() {
    let (server, store) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/ping"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    store.probe().await.expect("server reachable");
}

#[tokio::test]
async fn test_probe_error_status() {
    let (server, store) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/ping"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    assert!(matches!(
        store.probe().await,
        Err(RemoteError::Status { status: 502, .. })
    ));
}

#[tokio::test]
async fn test_probe_timeout() {
    let (server, store) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/ping"))
        .respond_with(ResponseTemplate::new(200).set_delay(std::time::Duration::from_secs(1)))
        .mount(&server)
        .await;

    assert_eq!(store.probe().await, Err(RemoteError::Timeout));
}

#[tokio::test]
async fn test_probe_unreachable_server() {
    // Port 1 is privileged and unused; the connection is refused
    let store = HttpRemoteStore::with_base_url("http://127.0.0.1:1/api").unwrap();

    assert!(matches!(
        store.probe().await,
        Err(RemoteError::Transport(_))
    ));
}
