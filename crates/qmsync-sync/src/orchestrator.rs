//! Push/pull synchronization of one table at a time
//!
//! [`SyncOrchestrator::sync_with_server`] runs one optimistic cycle:
//!
//! ```text
//! offline? ──yes──→ Err(Offline), nothing sent
//!    │no
//! Start ──already syncing──→ Ok(AlreadySyncing), nothing sent
//!    │applied
//! reserve ticket → push (retried) → reserve ticket → pull (retried, optional)
//!    │
//! apply to LocalStore (if the ticket is still newest) → Success(ts)
//!    │
//! publish ChangeNotice + diagnostics
//! ```
//!
//! Every failure after the guard is taken turns into a `Failure` transition
//! and an `Err(SyncFailure)`; nothing escapes as a panic or an untyped error.
//! The guard is an RAII value, so a caller that drops the future mid-flight
//! leaves the table idle with a `Cancelled` error instead of stuck.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use qmsync_audit::SyncLogger;
use qmsync_cache::LocalStore;
use qmsync_core::config::SyncConfig;
use qmsync_core::domain::{
    newtypes::{TableKey, UserId},
    Record, SyncEvent, SyncFailure, SyncOutcome,
};
use qmsync_core::ports::{INotificationService, IRemoteStore, Notification, StorageError};

use crate::broadcast::CrossContextBroadcaster;
use crate::connectivity::ConnectivityMonitor;
use crate::registry::SyncStateRegistry;
use crate::retry::RetryPolicy;

/// Per-call options of [`SyncOrchestrator::sync_with_server`]
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Overrides `sync.pull_after_push` for this call
    pub pull_after_push: Option<bool>,
    /// Extra top-level fields sent with the push (related tables, metadata)
    pub related: Map<String, Value>,
}

impl SyncOptions {
    pub fn with_pull(mut self, pull: bool) -> Self {
        self.pull_after_push = Some(pull);
        self
    }

    pub fn with_related(mut self, field: impl Into<String>, value: Value) -> Self {
        self.related.insert(field.into(), value);
        self
    }
}

/// Per-call options of [`SyncOrchestrator::load_from_server`]
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadOptions {
    /// Apply the server copy even if local changes are waiting to be pushed
    pub force: bool,
}

/// Holds the in-progress flag of one table for the duration of a cycle
///
/// Dropping an unresolved guard records a `Cancelled` failure.
struct SyncGuard<'a> {
    registry: &'a SyncStateRegistry,
    key: &'a TableKey,
    started: DateTime<Utc>,
    armed: bool,
}

impl<'a> SyncGuard<'a> {
    fn new(registry: &'a SyncStateRegistry, key: &'a TableKey, started: DateTime<Utc>) -> Self {
        Self {
            registry,
            key,
            started,
            armed: true,
        }
    }

    fn resolve(mut self, event: SyncEvent) {
        self.armed = false;
        if !self
            .registry
            .finish(self.key, self.started, event)
            .is_applied()
        {
            debug!(key = %self.key, "Guard was released before the cycle finished");
        }
    }
}

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!(key = %self.key, "Sync abandoned before completion");
            self.registry.finish(
                self.key,
                self.started,
                SyncEvent::Failure(SyncFailure::Cancelled.to_string()),
            );
        }
    }
}

/// Runs synchronization cycles against the remote store
pub struct SyncOrchestrator {
    remote: Arc<dyn IRemoteStore>,
    store: Arc<LocalStore>,
    registry: Arc<SyncStateRegistry>,
    connectivity: Arc<ConnectivityMonitor>,
    broadcaster: Arc<CrossContextBroadcaster>,
    logger: Arc<SyncLogger>,
    notifier: Option<Arc<dyn INotificationService>>,
    retry: RetryPolicy,
    pull_after_push: bool,
}

impl SyncOrchestrator {
    pub fn new(
        remote: Arc<dyn IRemoteStore>,
        store: Arc<LocalStore>,
        registry: Arc<SyncStateRegistry>,
        connectivity: Arc<ConnectivityMonitor>,
        broadcaster: Arc<CrossContextBroadcaster>,
        logger: Arc<SyncLogger>,
        config: &SyncConfig,
    ) -> Self {
        Self {
            remote,
            store,
            registry,
            connectivity,
            broadcaster,
            logger,
            notifier: None,
            retry: RetryPolicy::from_config(config),
            pull_after_push: config.pull_after_push,
        }
    }

    /// Sends failure and storage notifications through `notifier`
    pub fn with_notifier(mut self, notifier: Arc<dyn INotificationService>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Replaces the retry policy derived from the configuration
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<SyncStateRegistry> {
        &self.registry
    }

    pub fn connectivity(&self) -> &Arc<ConnectivityMonitor> {
        &self.connectivity
    }

    pub fn broadcaster(&self) -> &Arc<CrossContextBroadcaster> {
        &self.broadcaster
    }

    pub fn logger(&self) -> &Arc<SyncLogger> {
        &self.logger
    }

    // ========================================================================
    // Sync cycle
    // ========================================================================

    /// Pushes `records` as the full content of `key`, then optionally pulls
    /// the canonical copy back
    pub async fn sync_with_server(
        &self,
        key: &TableKey,
        records: Vec<Record>,
        options: SyncOptions,
    ) -> Result<SyncOutcome, SyncFailure> {
        if !self.connectivity.is_online() {
            debug!(key = %key, "Offline, sync postponed");
            self.logger.log_offline(key).await;
            return Err(SyncFailure::Offline);
        }

        let Some(started) = self.registry.begin(key) else {
            debug!(key = %key, "Sync already in progress");
            self.logger.log_skipped(key, "already syncing").await;
            return Ok(SyncOutcome::AlreadySyncing);
        };
        let guard = SyncGuard::new(&self.registry, key, started);

        let pull = options.pull_after_push.unwrap_or(self.pull_after_push);
        info!(key = %key, records = records.len(), pull, "Sync started");
        self.logger.log_sync_start(key, records.len()).await;

        match self.run_cycle(key, records, &options.related, pull).await {
            Ok((timestamp, count)) => {
                guard.resolve(SyncEvent::Success(timestamp));
                if let Err(e) = self.store.set_last_synced(key, timestamp).await {
                    warn!(key = %key, error = %e, "Failed to persist last-synced time");
                }
                self.broadcaster.publish(key, timestamp).await;
                self.logger.log_sync_success(key, count, pull).await;
                info!(key = %key, records = count, %timestamp, "Sync completed");

                Ok(SyncOutcome::Synced {
                    timestamp,
                    pulled: pull,
                    records: count,
                })
            }
            Err(failure) => {
                guard.resolve(SyncEvent::Failure(failure.to_string()));
                warn!(key = %key, code = failure.code(), error = %failure, "Sync failed");
                self.logger.log_sync_failure(key, &failure).await;

                let notification = match &failure {
                    SyncFailure::Storage(reason) => Notification::storage_degraded(reason.clone()),
                    other => Notification::sync_failed(key.table().as_str(), other.to_string()),
                };
                self.notify(notification).await;
                Err(failure)
            }
        }
    }

    /// Push, optional pull and local apply; returns the confirmed time and
    /// record count
    async fn run_cycle(
        &self,
        key: &TableKey,
        records: Vec<Record>,
        related: &Map<String, Value>,
        pull: bool,
    ) -> Result<(DateTime<Utc>, usize), SyncFailure> {
        // Taken before any request so edits made meanwhile win over the response
        let edits_before = self.store.ticket();
        let remote = &self.remote;

        let ack = {
            let pushed = records.as_slice();
            self.retry
                .run("push", || remote.push(key, pushed, related))
                .await?
        };
        if let Some(message) = &ack.message {
            debug!(key = %key, message, "Push acknowledged");
        }

        // Orders this read against refreshes issued while the push was in flight
        let issued = self.store.ticket();
        let (confirmed, server_time) = if pull {
            let payload = self.retry.run("pull", || remote.pull(key)).await?;
            let server_time = payload.server_timestamp();
            (payload.into_records(), server_time)
        } else {
            (records, None)
        };

        let timestamp = server_time.or(ack.timestamp).unwrap_or_else(Utc::now);
        let count = confirmed.len();

        if !self
            .store
            .apply_confirmed(key, confirmed, edits_before, issued)
            .await?
        {
            debug!(key = %key, "Newer local or server data arrived during sync, keeping it");
        }
        Ok((timestamp, count))
    }

    // ========================================================================
    // Initial load
    // ========================================================================

    /// Reads the server copy of `key` into the local store
    ///
    /// Returns the local content afterwards. Offline, on failure, or while
    /// local changes are waiting to be pushed, the local content is returned
    /// unchanged.
    pub async fn load_from_server(&self, key: &TableKey, options: &LoadOptions) -> Vec<Record> {
        if let Some(last_synced) = self.store.last_synced(key).await {
            self.registry.hydrate_last_synced(key, last_synced);
        }

        if !self.connectivity.is_online() {
            debug!(key = %key, "Offline, serving local copy");
            return self.store.get(key).await;
        }
        if !options.force && self.registry.state(key).pending_changes() {
            debug!(key = %key, "Local changes pending, keeping local copy");
            self.logger.log_skipped(key, "local changes pending").await;
            return self.store.get(key).await;
        }

        let ticket = self.store.ticket();
        let remote = &self.remote;
        match self.retry.run("load", || remote.pull(key)).await {
            Ok(payload) => {
                let records = payload.into_records();
                let count = records.len();
                match self.store.apply_pulled(key, records, ticket).await {
                    Ok(true) => info!(key = %key, records = count, "Loaded table from server"),
                    Ok(false) => debug!(key = %key, "Discarded stale server copy"),
                    Err(e) => {
                        warn!(key = %key, error = %e, "Failed to persist server copy");
                        if e.is_quota() {
                            self.notify(Notification::storage_degraded(e.to_string()))
                                .await;
                        }
                    }
                }
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to load table, serving local copy");
            }
        }

        self.store.get(key).await
    }

    // ========================================================================
    // Local mutations
    // ========================================================================

    /// Stores an optimistic local edit and marks the table as pending
    ///
    /// The in-memory copy and the registry are updated even if persistence
    /// fails; the storage error is returned so the caller can warn the user.
    pub async fn record_local_change(
        &self,
        key: &TableKey,
        records: Vec<Record>,
    ) -> Result<(), StorageError> {
        let count = records.len();
        let result = self.store.set(key, records).await;
        self.registry.transition(key, SyncEvent::LocalChange);
        self.logger.log_data_changed(key, count).await;

        if let Err(e) = &result {
            if e.is_quota() {
                self.notify(Notification::storage_degraded(e.to_string()))
                    .await;
            }
        }
        result
    }

    /// Removes every table of `user` from the local store and the registry
    ///
    /// Tables known only from persisted storage (never touched by this
    /// context) are reset too. Returns the number of persisted tables removed.
    pub async fn reset_local_data(&self, user: &UserId) -> Result<u64, StorageError> {
        let mut keys = self.registry.keys_for(user);
        keys.extend(self.store.stored_keys(user).await);
        keys.sort();
        keys.dedup();

        let result = self.store.reset_user(user).await;
        self.registry.reset_user(user);
        self.logger.clear_user(user);
        for key in &keys {
            self.logger.log_reset(key).await;
        }

        info!(user = %user, tables = keys.len(), "Local data reset");
        result
    }

    async fn notify(&self, notification: Notification) {
        if let Some(notifier) = &self.notifier {
            if let Err(e) = notifier.notify(&notification).await {
                warn!(error = %e, "Failed to send notification");
            }
        }
    }
}
