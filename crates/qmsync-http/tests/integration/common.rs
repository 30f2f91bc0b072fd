//! Shared test helpers for the HTTP adapter integration tests

use std::time::Duration;

use wiremock::MockServer;

use qmsync_core::domain::newtypes::TableKey;
use qmsync_http::HttpRemoteStore;

/// Starts a mock server and returns a store pointing at it
///
/// Timeouts are short so the timeout tests stay fast.
pub async fn setup() -> (MockServer, HttpRemoteStore) {
    let server = MockServer::start().await;
    let store = HttpRemoteStore::with_base_url(format!("{}/api", server.uri()))
        .expect("valid base URL")
        .with_timeouts(Duration::from_millis(500), Duration::from_millis(200));
    (server, store)
}

pub fn documents() -> TableKey {
    TableKey::parse("documents", "user-7").expect("valid key")
}
