use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use qmsync_core::ports::RemoteError;

use crate::common::{documents, engine_with, eventually, record, MockRemote};

#[tokio::test]
async fn test_pass_syncs_only_pending_tables() {
    let remote = MockRemote::new();
    let engine = engine_with(remote.clone(), true, None).await;
    let pending = documents("u1");
    let clean = qmsync_core::domain::TableKey::parse("members", "u1").unwrap();

    engine.edit(&pending, vec![record(1, "queued")]).await.unwrap();
    engine.scheduler().register(clean.clone());
    assert_eq!(engine.scheduler().registered(), vec![pending.clone(), clean]);

    assert_eq!(engine.scheduler().run_pass(false).await, 1);
    assert_eq!(remote.server_copy(&pending), vec![record(1, "queued")]);
    assert!(!engine.registry().state(&pending).pending_changes());

    // Nothing left to do
    assert_eq!(engine.scheduler().run_pass(false).await, 0);
    assert_eq!(remote.pushes(), 1);
}

#[tokio::test]
async fn test_pass_does_nothing_offline() {
    let remote = MockRemote::new();
    let engine = engine_with(remote.clone(), false, None).await;
    let key = documents("u1");
    engine.edit(&key, vec![record(1, "queued")]).await.unwrap();

    assert_eq!(engine.scheduler().run_pass(true).await, 0);
    assert_eq!(remote.pushes(), 0);
    assert!(engine.registry().state(&key).pending_changes());
}

#[tokio::test]
async fn test_failed_table_is_retried_on_a_later_pass() {
    let remote = MockRemote::new();
    remote.fail_pushes(Some(RemoteError::Status {
        status: 502,
        body: "Bad Gateway".into(),
    }));
    let engine = engine_with(remote.clone(), true, None).await;
    let key = documents("u1");
    engine.edit(&key, vec![record(1, "queued")]).await.unwrap();

    assert_eq!(engine.scheduler().run_pass(false).await, 0);
    assert!(engine.registry().state(&key).last_error().is_some());

    remote.fail_pushes(None);
    assert_eq!(engine.scheduler().run_pass(false).await, 1);
    let state = engine.registry().state(&key);
    assert!(state.last_error().is_none());
    assert!(!state.pending_changes());
}

#[tokio::test]
async fn test_reconnect_triggers_catch_up() {
    let remote = MockRemote::new();
    let engine = Arc::new(engine_with(remote.clone(), false, None).await);
    let key = documents("u1");
    engine.edit(&key, vec![record(1, "written offline")]).await.unwrap();

    let shutdown = CancellationToken::new();
    let scheduler = {
        let engine = engine.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { engine.scheduler().run(shutdown).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(remote.pushes(), 0);

    engine.connectivity().report_network_change(true).await;

    assert!(eventually(|| !engine.registry().state(&key).pending_changes()).await);
    assert_eq!(remote.server_copy(&key), vec![record(1, "written offline")]);

    shutdown.cancel();
    scheduler.await.unwrap();
}

#[tokio::test]
async fn test_request_sync_wakes_the_loop() {
    let remote = MockRemote::new();
    let engine = Arc::new(engine_with(remote.clone(), true, None).await);
    let key = documents("u1");

    let shutdown = CancellationToken::new();
    let scheduler = {
        let engine = engine.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { engine.scheduler().run(shutdown).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    engine.edit(&key, vec![record(2, "nudged")]).await.unwrap();
    engine.scheduler().request_sync();

    assert!(eventually(|| remote.pushes() == 1).await);
    assert!(eventually(|| !engine.registry().state(&key).pending_changes()).await);

    shutdown.cancel();
    scheduler.await.unwrap();
}
