//! SyncLogger - diagnostics ring buffer
//!
//! Keeps the last `capacity` entries per (table, user) in memory and
//! optionally mirrors them into an [`IDiagnosticsStore`]. All methods are
//! non-fatal: persistence errors are logged via `tracing::warn!` and dropped.
//! When the store reports a quota error the oldest persisted entries are
//! dropped and the write is retried once.

use std::collections::VecDeque;
use std::sync::Arc;

use dashmap::DashMap;

use qmsync_core::domain::{
    newtypes::{TableKey, UserId},
    SyncFailure, SyncLogAction, SyncLogEntry,
};
use qmsync_core::ports::IDiagnosticsStore;

/// Default number of entries kept per table
pub const DEFAULT_CAPACITY: usize = 100;

/// Bounded log of synchronization actions
pub struct SyncLogger {
    capacity: usize,
    buffers: DashMap<TableKey, VecDeque<SyncLogEntry>>,
    sink: Option<Arc<dyn IDiagnosticsStore>>,
}

impl SyncLogger {
    /// Creates an in-memory logger keeping `capacity` entries per table
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            buffers: DashMap::new(),
            sink: None,
        }
    }

    /// Mirrors every entry into `sink`
    pub fn with_sink(mut self, sink: Arc<dyn IDiagnosticsStore>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Entries kept per table
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Appends an entry, evicting the oldest one of its table when full
    pub async fn record(&self, entry: SyncLogEntry) {
        tracing::debug!(
            key = %entry.key,
            action = %entry.action,
            detail = entry.detail.as_deref().unwrap_or(""),
            "Sync log"
        );

        {
            let mut buffer = self.buffers.entry(entry.key.clone()).or_default();
            if buffer.len() >= self.capacity {
                buffer.pop_front();
            }
            buffer.push_back(entry.clone());
        }

        if let Some(sink) = &self.sink {
            self.persist(sink.as_ref(), &entry).await;
        }
    }

    async fn persist(&self, sink: &dyn IDiagnosticsStore, entry: &SyncLogEntry) {
        match sink.append(entry, self.capacity).await {
            Ok(()) => {}
            Err(e) if e.is_quota() => {
                let to_drop = (self.capacity / 2).max(1) as u32;
                match sink.drop_oldest(to_drop).await {
                    Ok(dropped) => {
                        tracing::info!(dropped, "Diagnostics storage full, dropped oldest entries");
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to trim diagnostics storage");
                    }
                }
                if let Err(e) = sink.append(entry, self.capacity).await {
                    tracing::warn!(error = %e, "Failed to persist diagnostics entry after trimming");
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to persist diagnostics entry");
            }
        }
    }

    // ========================================================================
    // Sync lifecycle
    // ========================================================================

    /// Log the start of a push/pull cycle.
    pub async fn log_sync_start(&self, key: &TableKey, records: usize) {
        self.record(
            SyncLogEntry::new(key.clone(), SyncLogAction::SyncStart)
                .with_detail(format!("{records} records")),
        )
        .await;
    }

    /// Log a completed cycle.
    pub async fn log_sync_success(&self, key: &TableKey, records: usize, pulled: bool) {
        let detail = if pulled {
            format!("{records} records confirmed by server")
        } else {
            format!("{records} records pushed")
        };
        self.record(SyncLogEntry::new(key.clone(), SyncLogAction::SyncSuccess).with_detail(detail))
            .await;
    }

    /// Log a failed cycle.
    pub async fn log_sync_failure(&self, key: &TableKey, failure: &SyncFailure) {
        self.record(
            SyncLogEntry::new(key.clone(), SyncLogAction::SyncFailure)
                .with_detail(format!("[{}] {}", failure.code(), failure)),
        )
        .await;
    }

    /// Log a sync request refused because the device is offline.
    pub async fn log_offline(&self, key: &TableKey) {
        self.record(SyncLogEntry::new(key.clone(), SyncLogAction::Offline))
            .await;
    }

    /// Log a request that was skipped (already syncing, stale data, ...).
    pub async fn log_skipped(&self, key: &TableKey, reason: &str) {
        self.record(SyncLogEntry::new(key.clone(), SyncLogAction::Skipped).with_detail(reason))
            .await;
    }

    // ========================================================================
    // Local data
    // ========================================================================

    /// Log a local modification of a table.
    pub async fn log_data_changed(&self, key: &TableKey, records: usize) {
        self.record(
            SyncLogEntry::new(key.clone(), SyncLogAction::DataChanged)
                .with_detail(format!("{records} records")),
        )
        .await;
    }

    /// Log an administrative reset of a table's local data.
    pub async fn log_reset(&self, key: &TableKey) {
        self.record(SyncLogEntry::new(key.clone(), SyncLogAction::Reset))
            .await;
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Entries of one table, oldest first
    pub fn entries(&self, key: &TableKey) -> Vec<SyncLogEntry> {
        self.buffers
            .get(key)
            .map(|buffer| buffer.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// The `limit` newest entries across all tables, newest first
    pub fn recent(&self, limit: usize) -> Vec<SyncLogEntry> {
        let mut all: Vec<SyncLogEntry> = self
            .buffers
            .iter()
            .flat_map(|buffer| buffer.value().iter().cloned().collect::<Vec<_>>())
            .collect();
        all.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        all.truncate(limit);
        all
    }

    /// Entries read back from the persistent sink, newest first
    ///
    /// Returns an empty list when no sink is configured or reading fails.
    pub async fn persisted(&self, key: Option<&TableKey>, limit: u32) -> Vec<SyncLogEntry> {
        let Some(sink) = &self.sink else {
            return Vec::new();
        };
        match sink.recent(key, limit).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read persisted diagnostics");
                Vec::new()
            }
        }
    }

    /// Forgets the in-memory entries of one user
    pub fn clear_user(&self, user: &UserId) {
        self.buffers.retain(|key, _| key.user() != user);
    }

    /// Forgets every in-memory entry
    pub fn clear(&self) {
        self.buffers.clear();
    }
}

impl Default for SyncLogger {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
