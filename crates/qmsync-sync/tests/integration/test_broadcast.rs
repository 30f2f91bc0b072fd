use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use qmsync_cache::{DatabasePool, LocalStore, SqliteMarkerChannel, SqliteRecordStore};
use qmsync_core::domain::ContextId;
use qmsync_core::ports::IChangeChannel;
use qmsync_sync::{InMemoryChangeChannel, SyncEngine, SyncOptions};

use crate::common::{documents, engine_with, fast_config, record, MockRemote};

/// Two contexts sharing one server and one change channel
async fn two_contexts() -> (Arc<MockRemote>, SyncEngine, SyncEngine) {
    let remote = MockRemote::new();
    let channel: Arc<dyn IChangeChannel> = Arc::new(InMemoryChangeChannel::new());
    let a = engine_with(remote.clone(), true, Some(channel.clone())).await;
    let b = engine_with(remote.clone(), true, Some(channel)).await;
    (remote, a, b)
}

#[tokio::test]
async fn test_duplicate_notices_are_harmless() {
    let (remote, a, b) = two_contexts().await;
    let key = documents("u1");
    let mut notices = b.broadcaster().subscribe_remote().expect("shared channel");

    a.orchestrator()
        .sync_with_server(&key, vec![record(1, "from a")], SyncOptions::default().with_pull(false))
        .await
        .unwrap();

    let notice = notices.recv().await.unwrap();
    assert_eq!(notice.key, key);
    assert_eq!(notice.origin, a.origin());

    let pulls_before = remote.pulls();
    assert!(b.listener().handle(notice.clone()).await);
    assert!(!b.listener().handle(notice.clone()).await);
    assert_eq!(remote.pulls(), pulls_before + 1);
    assert_eq!(b.store().get(&key).await, vec![record(1, "from a")]);

    // The publishing context ignores its own notice
    assert!(!a.listener().handle(notice).await);
}

#[tokio::test]
async fn test_changes_with_equal_timestamps_from_two_contexts() {
    let remote = MockRemote::new();
    let channel: Arc<dyn IChangeChannel> = Arc::new(InMemoryChangeChannel::new());
    let a = engine_with(remote.clone(), true, Some(channel.clone())).await;
    let b = engine_with(remote.clone(), true, Some(channel.clone())).await;
    let c = engine_with(remote.clone(), true, Some(channel)).await;
    let key = documents("u1");
    let mut notices = b.broadcaster().subscribe_remote().unwrap();

    // Both pushes are acknowledged within the same server second
    let acked = Utc::now();
    remote.queue_ack_time(acked);
    remote.queue_ack_time(acked);
    let push_only = SyncOptions::default().with_pull(false);

    a.orchestrator()
        .sync_with_server(&key, vec![record(1, "from a")], push_only.clone())
        .await
        .unwrap();
    let from_a = notices.recv().await.unwrap();
    assert!(b.listener().handle(from_a).await);
    assert_eq!(b.store().get(&key).await, vec![record(1, "from a")]);

    c.orchestrator()
        .sync_with_server(&key, vec![record(1, "from c")], push_only)
        .await
        .unwrap();
    let from_c = notices.recv().await.unwrap();
    assert_eq!(from_c.timestamp, acked);
    assert!(b.listener().handle(from_c.clone()).await);
    assert_eq!(b.store().get(&key).await, vec![record(1, "from c")]);

    // A redelivery of the same notice is still ignored
    assert!(!b.listener().handle(from_c).await);
}

#[tokio::test]
async fn test_later_change_with_older_timestamp_is_handled() {
    let (remote, a, b) = two_contexts().await;
    let key = documents("u1");
    let mut notices = b.broadcaster().subscribe_remote().unwrap();
    let push_only = SyncOptions::default().with_pull(false);

    let now = Utc::now();
    remote.queue_ack_time(now);
    remote.queue_ack_time(now - chrono::Duration::minutes(5));

    a.orchestrator()
        .sync_with_server(&key, vec![record(1, "first")], push_only.clone())
        .await
        .unwrap();
    assert!(b.listener().handle(notices.recv().await.unwrap()).await);

    a.orchestrator()
        .sync_with_server(&key, vec![record(1, "second")], push_only)
        .await
        .unwrap();
    assert!(b.listener().handle(notices.recv().await.unwrap()).await);
    assert_eq!(b.store().get(&key).await, vec![record(1, "second")]);
}

#[tokio::test]
async fn test_listener_refreshes_other_context() {
    let (_remote, a, b) = two_contexts().await;
    let key = documents("u1");
    let b = Arc::new(b);
    let mut refreshed = b.broadcaster().subscribe_local();

    let shutdown = CancellationToken::new();
    let listener = {
        let b = b.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { b.listener().run(shutdown).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    a.orchestrator()
        .sync_with_server(&key, vec![record(7, "shared")], SyncOptions::default())
        .await
        .unwrap();

    let notice = tokio::time::timeout(Duration::from_secs(2), refreshed.recv())
        .await
        .expect("refresh within timeout")
        .unwrap();
    assert_eq!(notice.key, key);
    assert_eq!(b.store().get(&key).await, vec![record(7, "shared")]);

    shutdown.cancel();
    listener.await.unwrap();
}

#[tokio::test]
async fn test_listener_without_channel_returns_immediately() {
    let engine = engine_with(MockRemote::new(), true, None).await;
    let shutdown = CancellationToken::new();

    let finished = tokio::time::timeout(Duration::from_secs(1), engine.listener().run(shutdown)).await;
    assert!(finished.is_ok());
}

#[tokio::test]
async fn test_sqlite_markers_connect_contexts() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("shared.db");
    let remote = MockRemote::new();

    let mut contexts = Vec::new();
    for _ in 0..2 {
        let pool = DatabasePool::new(&db).await.unwrap();
        let origin = ContextId::new();
        let channel = Arc::new(
            SqliteMarkerChannel::new(pool.pool().clone(), origin, Duration::from_millis(20))
                .await
                .unwrap(),
        );
        let store = Arc::new(LocalStore::new(Arc::new(SqliteRecordStore::new(
            pool.pool().clone(),
        ))));
        let engine = SyncEngine::builder(fast_config(), remote.clone(), store)
            .origin(origin)
            .initial_online(true)
            .change_channel(channel.clone())
            .build();
        contexts.push((channel, engine));
    }

    let key = documents("u1");
    let (channel_b, engine_b) = &contexts[1];
    let mut notices = engine_b.broadcaster().subscribe_remote().unwrap();

    contexts[0]
        .1
        .orchestrator()
        .sync_with_server(&key, vec![record(4, "marker")], SyncOptions::default())
        .await
        .unwrap();

    assert_eq!(channel_b.poll_once().await.unwrap(), 1);
    let notice = notices.recv().await.unwrap();
    assert!(engine_b.listener().handle(notice).await);
    assert_eq!(engine_b.store().get(&key).await, vec![record(4, "marker")]);
}
