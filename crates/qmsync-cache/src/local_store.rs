//! Write-through local copy of every (table, user) pair
//!
//! [`LocalStore`] keeps the authoritative in-memory copy in a `DashMap` and
//! writes every change through to an [`IRecordStore`]. Reads never fail: an
//! unknown key, a backend error or corrupted persisted data all read as an
//! empty table.
//!
//! ## Revisions
//!
//! Revisions come from a single monotonically increasing counter. Every
//! stored copy remembers two of them: the revision of the last local
//! [`LocalStore::set`] and the ticket of the last server read applied.
//!
//! A network read reserves a [`Ticket`] right before its request goes out and
//! hands it back to [`LocalStore::apply_pulled`] when the response arrives.
//! The records are applied only if no local edit was made after the ticket
//! and no server read issued later has been applied already. Reads are
//! therefore ordered by when they were sent, not by when they complete.
//!
//! A sync cycle guards local edits from before its push but orders its pull
//! by the pull request itself; [`LocalStore::apply_confirmed`] takes the two
//! tickets separately.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;

use qmsync_core::domain::{
    newtypes::{TableKey, UserId},
    Record,
};
use qmsync_core::ports::{IRecordStore, StorageError};

/// Revision reserved before a network read
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Ticket(u64);

impl Ticket {
    /// The raw revision number
    pub fn revision(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone)]
struct Slot {
    records: Arc<Vec<Record>>,
    /// Revision of the last local edit
    edited: u64,
    /// Ticket of the last applied server read
    fetched: u64,
}

/// Per-(table, user) record cache with write-through persistence
pub struct LocalStore {
    backend: Arc<dyn IRecordStore>,
    slots: DashMap<TableKey, Slot>,
    revisions: AtomicU64,
    /// Serializes memory update + persistence so the backend sees writes in order
    write_lock: Mutex<()>,
}

impl LocalStore {
    /// Creates a store in front of the given persistent backend
    pub fn new(backend: Arc<dyn IRecordStore>) -> Self {
        Self {
            backend,
            slots: DashMap::new(),
            revisions: AtomicU64::new(0),
            write_lock: Mutex::new(()),
        }
    }

    /// Returns the current records for `key`, hydrating from the backend on first access
    pub async fn get(&self, key: &TableKey) -> Vec<Record> {
        if let Some(slot) = self.slots.get(key) {
            return slot.records.as_ref().clone();
        }
        self.hydrate(key).await.records.as_ref().clone()
    }

    /// Replaces the records for `key`
    ///
    /// The in-memory copy is updated first and stays authoritative even if
    /// persisting fails; the error is returned so the caller can warn the user.
    pub async fn set(&self, key: &TableKey, records: Vec<Record>) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        let revision = self.next_revision();
        let records = Arc::new(records);
        let fetched = self.slots.get(key).map(|slot| slot.fetched).unwrap_or(0);
        self.slots.insert(
            key.clone(),
            Slot {
                records: Arc::clone(&records),
                edited: revision,
                fetched,
            },
        );

        self.backend
            .save_records(key, &records)
            .await
            .map_err(|e| {
                tracing::warn!(key = %key, error = %e, "Failed to persist local copy; keeping it in memory");
                e
            })
    }

    /// Removes the records for `key`
    pub async fn clear(&self, key: &TableKey) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        self.slots.remove(key);
        self.backend.delete_records(key).await
    }

    /// Removes every table belonging to `user` from memory and the backend
    ///
    /// Returns the number of persisted tables removed.
    pub async fn reset_user(&self, user: &UserId) -> Result<u64, StorageError> {
        let _guard = self.write_lock.lock().await;
        self.slots.retain(|key, _| key.user() != user);
        self.backend.delete_user(user).await
    }

    /// Keys persisted for `user`, empty if the backend cannot be read
    pub async fn stored_keys(&self, user: &UserId) -> Vec<TableKey> {
        match self.backend.list_keys(user).await {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!(user = %user, error = %e, "Failed to list stored tables");
                Vec::new()
            }
        }
    }

    /// Reserves a revision for a network read that is about to start
    pub fn ticket(&self) -> Ticket {
        Ticket(self.next_revision())
    }

    /// Stores records read from the server with a request issued at `ticket`
    ///
    /// Returns `Ok(true)` if the records were applied, `Ok(false)` if they were
    /// discarded as stale.
    pub async fn apply_pulled(
        &self,
        key: &TableKey,
        records: Vec<Record>,
        ticket: Ticket,
    ) -> Result<bool, StorageError> {
        self.apply_confirmed(key, records, ticket, ticket).await
    }

    /// Stores server-confirmed records
    ///
    /// `edits_before` is the ticket taken before the local data was sent:
    /// local edits made after it win. `issued` is the ticket taken when the
    /// server read (or the acknowledgement) was requested: a read issued
    /// later that was already applied wins.
    pub async fn apply_confirmed(
        &self,
        key: &TableKey,
        records: Vec<Record>,
        edits_before: Ticket,
        issued: Ticket,
    ) -> Result<bool, StorageError> {
        if !self.slots.contains_key(key) {
            self.hydrate(key).await;
        }

        let _guard = self.write_lock.lock().await;
        let (edited, fetched) = self
            .slots
            .get(key)
            .map(|slot| (slot.edited, slot.fetched))
            .unwrap_or((0, 0));
        if edits_before.0 <= edited || issued.0 <= fetched {
            tracing::debug!(
                key = %key,
                edits_before = edits_before.0,
                issued = issued.0,
                edited,
                fetched,
                "Discarding stale server data"
            );
            return Ok(false);
        }

        let records = Arc::new(records);
        self.slots.insert(
            key.clone(),
            Slot {
                records: Arc::clone(&records),
                edited,
                fetched: issued.0,
            },
        );
        self.backend.save_records(key, &records).await?;
        Ok(true)
    }

    /// Persisted last-synced time for `key`, `None` if unknown or unreadable
    pub async fn last_synced(&self, key: &TableKey) -> Option<DateTime<Utc>> {
        match self.backend.load_last_synced(key).await {
            Ok(ts) => ts,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to read last-synced time");
                None
            }
        }
    }

    /// Persists the last-synced time for `key`; older values never replace newer ones
    pub async fn set_last_synced(
        &self,
        key: &TableKey,
        timestamp: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        self.backend.save_last_synced(key, timestamp).await
    }

    fn next_revision(&self) -> u64 {
        self.revisions.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Loads `key` from the backend unless a concurrent write got there first
    async fn hydrate(&self, key: &TableKey) -> Slot {
        let records = match self.backend.load_records(key).await {
            Ok(Some(records)) => records,
            Ok(None) => Vec::new(),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to load local copy; starting empty");
                Vec::new()
            }
        };

        self.slots
            .entry(key.clone())
            .or_insert_with(|| Slot {
                records: Arc::new(records),
                edited: 0,
                fetched: 0,
            })
            .clone()
    }
}
