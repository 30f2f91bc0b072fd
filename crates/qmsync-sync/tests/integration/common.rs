//! Shared helpers for the engine integration tests

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use wiremock::MockServer;

use qmsync_cache::{DatabasePool, LocalStore, SqliteRecordStore};
use qmsync_core::config::{Config, ConfigBuilder};
use qmsync_core::domain::{
    newtypes::{TableKey, UserId},
    Record,
};
use qmsync_core::ports::{
    IChangeChannel, INotificationService, IRecordStore, IRemoteStore, Notification, PullPayload,
    PushAck, RemoteError, StorageError,
};
use qmsync_http::HttpRemoteStore;
use qmsync_sync::{Backoff, RetryPolicy, SyncEngine};

/// Scripted remote store keeping one server copy per table
#[derive(Default)]
pub struct MockRemote {
    tables: Mutex<HashMap<TableKey, Vec<Record>>>,
    push_delay: Mutex<Duration>,
    push_error: Mutex<Option<RemoteError>>,
    pull_error: Mutex<Option<RemoteError>>,
    ack_times: Mutex<VecDeque<DateTime<Utc>>>,
    pushes: AtomicUsize,
    pulls: AtomicUsize,
}

impl MockRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_push_delay(&self, delay: Duration) {
        *self.push_delay.lock().unwrap() = delay;
    }

    pub fn fail_pushes(&self, error: Option<RemoteError>) {
        *self.push_error.lock().unwrap() = error;
    }

    pub fn fail_pulls(&self, error: Option<RemoteError>) {
        *self.pull_error.lock().unwrap() = error;
    }

    /// Timestamps returned by the next push acknowledgements, in order
    pub fn queue_ack_time(&self, timestamp: DateTime<Utc>) {
        self.ack_times.lock().unwrap().push_back(timestamp);
    }

    pub fn put(&self, key: &TableKey, records: Vec<Record>) {
        self.tables.lock().unwrap().insert(key.clone(), records);
    }

    pub fn server_copy(&self, key: &TableKey) -> Vec<Record> {
        self.tables
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    pub fn pushes(&self) -> usize {
        self.pushes.load(Ordering::SeqCst)
    }

    pub fn pulls(&self) -> usize {
        self.pulls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl IRemoteStore for MockRemote {
    async fn push(
        &self,
        key: &TableKey,
        records: &[Record],
        _related: &Map<String, Value>,
    ) -> Result<PushAck, RemoteError> {
        self.pushes.fetch_add(1, Ordering::SeqCst);
        let delay = *self.push_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.push_error.lock().unwrap().clone() {
            return Err(error);
        }

        self.put(key, records.to_vec());
        Ok(PushAck {
            message: Some("stored".into()),
            timestamp: self.ack_times.lock().unwrap().pop_front(),
        })
    }

    async fn pull(&self, key: &TableKey) -> Result<PullPayload, RemoteError> {
        self.pulls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.pull_error.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(PullPayload::Flat(self.server_copy(key)))
    }

    async fn probe(&self) -> Result<(), RemoteError> {
        Ok(())
    }
}

/// Record store whose writes can be rejected as over quota
#[derive(Default)]
pub struct QuotaBackend {
    records: Mutex<HashMap<TableKey, Vec<Record>>>,
    full: AtomicBool,
}

impl QuotaBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_full(&self, full: bool) {
        self.full.store(full, Ordering::SeqCst);
    }

    pub fn persisted(&self, key: &TableKey) -> Option<Vec<Record>> {
        self.records.lock().unwrap().get(key).cloned()
    }

    fn check_quota(&self) -> Result<(), StorageError> {
        if self.full.load(Ordering::SeqCst) {
            return Err(StorageError::QuotaExceeded("database or disk is full".into()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl IRecordStore for QuotaBackend {
    async fn load_records(&self, key: &TableKey) -> Result<Option<Vec<Record>>, StorageError> {
        Ok(self.persisted(key))
    }

    async fn save_records(&self, key: &TableKey, records: &[Record]) -> Result<(), StorageError> {
        self.check_quota()?;
        self.records
            .lock()
            .unwrap()
            .insert(key.clone(), records.to_vec());
        Ok(())
    }

    async fn delete_records(&self, key: &TableKey) -> Result<(), StorageError> {
        self.records.lock().unwrap().remove(key);
        Ok(())
    }

    async fn delete_user(&self, user: &UserId) -> Result<u64, StorageError> {
        let mut records = self.records.lock().unwrap();
        let before = records.len();
        records.retain(|key, _| key.user() != user);
        Ok((before - records.len()) as u64)
    }

    async fn list_keys(&self, user: &UserId) -> Result<Vec<TableKey>, StorageError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .keys()
            .filter(|key| key.user() == user)
            .cloned()
            .collect())
    }

    async fn load_last_synced(
        &self,
        _key: &TableKey,
    ) -> Result<Option<DateTime<Utc>>, StorageError> {
        Ok(None)
    }

    async fn save_last_synced(
        &self,
        _key: &TableKey,
        _timestamp: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        self.check_quota()
    }
}

/// Notification service that keeps everything it is sent
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn categories(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|n| n.category.clone())
            .collect()
    }
}

#[async_trait::async_trait]
impl INotificationService for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

/// Configuration with short intervals and no stale-guard grace period
pub fn fast_config() -> Config {
    ConfigBuilder::new()
        .sync_max_attempts(2)
        .sync_retry_delay_ms(10)
        .sync_min_retry_spacing_secs(0)
        .sync_stale_guard_secs(0)
        .diagnostics_capacity(50)
        .build()
}

pub async fn memory_backend() -> Arc<SqliteRecordStore> {
    let pool = DatabasePool::in_memory().await.expect("in-memory database");
    Arc::new(SqliteRecordStore::new(pool.pool().clone()))
}

/// Engine over a fresh in-memory database
pub async fn engine_with(
    remote: Arc<dyn IRemoteStore>,
    online: bool,
    channel: Option<Arc<dyn IChangeChannel>>,
) -> SyncEngine {
    let backend = memory_backend().await;
    let store = Arc::new(LocalStore::new(backend.clone()));
    let mut builder = SyncEngine::builder(fast_config(), remote, store)
        .initial_online(online)
        .diagnostics_store(backend)
        .retry_policy(RetryPolicy::new(2, Duration::from_millis(10), Backoff::Fixed));
    if let Some(channel) = channel {
        builder = builder.change_channel(channel);
    }
    builder.build()
}

/// Engine talking HTTP to `server`
pub async fn http_engine(server: &MockServer, online: bool) -> SyncEngine {
    let remote = HttpRemoteStore::with_base_url(format!("{}/api", server.uri()))
        .expect("valid base URL")
        .with_timeouts(Duration::from_millis(500), Duration::from_millis(200));
    engine_with(Arc::new(remote), online, None).await
}

pub fn documents(user: &str) -> TableKey {
    TableKey::parse("documents", user).expect("valid key")
}

pub fn record(id: u32, title: &str) -> Record {
    json!({ "id": id, "title": title })
}

/// Polls `condition` every 10 ms for up to two seconds
pub async fn eventually<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
