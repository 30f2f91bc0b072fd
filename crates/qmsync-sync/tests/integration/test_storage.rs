use std::sync::Arc;

use qmsync_cache::LocalStore;
use qmsync_core::domain::SyncFailure;
use qmsync_sync::{SyncEngine, SyncOptions};

use crate::common::{documents, fast_config, record, MockRemote, QuotaBackend, RecordingNotifier};

fn quota_engine(
    remote: Arc<MockRemote>,
    backend: Arc<QuotaBackend>,
    notifier: Arc<RecordingNotifier>,
) -> SyncEngine {
    SyncEngine::builder(fast_config(), remote, Arc::new(LocalStore::new(backend)))
        .initial_online(true)
        .notifier(notifier)
        .build()
}

#[tokio::test]
async fn test_sync_reports_storage_failure_when_confirmed_copy_cannot_be_saved() {
    let remote = MockRemote::new();
    let backend = QuotaBackend::new();
    let notifier = RecordingNotifier::new();
    let engine = quota_engine(remote.clone(), backend.clone(), notifier.clone());
    let key = documents("u1");
    let pushed = vec![record(1, "a"), record(2, "b")];

    backend.set_full(true);
    let result = engine
        .orchestrator()
        .sync_with_server(&key, pushed.clone(), SyncOptions::default().with_pull(true))
        .await;

    assert!(matches!(result, Err(SyncFailure::Storage(_))));
    assert_eq!(remote.server_copy(&key), pushed);

    let state = engine.registry().state(&key);
    assert!(!state.is_syncing());
    assert!(state
        .last_error()
        .is_some_and(|error| error.contains("quota")));

    // The pulled copy is still served from memory
    assert_eq!(engine.store().get(&key).await, pushed);
    assert!(backend.persisted(&key).is_none());
    assert!(notifier.categories().contains(&"storage".to_string()));
}

#[tokio::test]
async fn test_local_edit_over_quota_stays_pending_in_memory() {
    let remote = MockRemote::new();
    let backend = QuotaBackend::new();
    let notifier = RecordingNotifier::new();
    let engine = quota_engine(remote.clone(), backend.clone(), notifier.clone());
    let key = documents("u1");
    let edited = vec![record(3, "kept in memory")];

    backend.set_full(true);
    let err = engine
        .orchestrator()
        .record_local_change(&key, edited.clone())
        .await
        .unwrap_err();

    assert!(err.is_quota());
    assert!(engine.registry().state(&key).pending_changes());
    assert_eq!(engine.store().get(&key).await, edited);
    assert_eq!(notifier.categories(), vec!["storage".to_string()]);
    assert_eq!(remote.pushes(), 0);

    // Once space is available again the edit still goes out
    backend.set_full(false);
    assert!(engine.sync_now(&key).await.unwrap().is_synced());
    assert_eq!(remote.server_copy(&key), edited);
    assert_eq!(backend.persisted(&key), Some(edited));
}
