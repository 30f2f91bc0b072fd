//! Shared per-table synchronization state
//!
//! [`SyncStateRegistry`] owns one [`SyncState`] per (table, user) and is
//! the only place those states change. It is an explicit object handed to
//! every consumer, so tests can create as many independent registries as
//! they need.
//!
//! Consumers that poll instead of reacting call [`SyncStateRegistry::version`]
//! (or await [`SyncStateRegistry::watch`]); the version increases on every
//! applied transition.

use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::watch;
use tracing::{debug, info};

use qmsync_core::domain::{
    newtypes::{TableKey, UserId},
    SyncEvent, SyncState, Transition,
};

/// Map from (table, user) to its synchronization state
pub struct SyncStateRegistry {
    states: DashMap<TableKey, SyncState>,
    version: watch::Sender<u64>,
}

impl SyncStateRegistry {
    pub fn new() -> Self {
        let (version, _) = watch::channel(0);
        Self {
            states: DashMap::new(),
            version,
        }
    }

    /// Current state of `key` (the idle default if never touched)
    pub fn state(&self, key: &TableKey) -> SyncState {
        self.states
            .get(key)
            .map(|state| state.clone())
            .unwrap_or_default()
    }

    /// Returns true while a cycle for `key` is in flight
    pub fn is_syncing(&self, key: &TableKey) -> bool {
        self.states
            .get(key)
            .map(|state| state.is_syncing())
            .unwrap_or(false)
    }

    /// Applies `event` to the state of `key`
    ///
    /// The check and the update happen under the map's entry lock, so two
    /// concurrent `Start` events for the same key can never both succeed.
    pub fn transition(&self, key: &TableKey, event: SyncEvent) -> Transition {
        let label = event.to_string();
        let transition = self
            .states
            .entry(key.clone())
            .or_default()
            .apply(event, Utc::now());

        debug!(key = %key, event = %label, ?transition, "Sync state transition");
        if transition.is_applied() {
            self.bump();
        }
        transition
    }

    /// Takes the in-progress guard of `key`
    ///
    /// Returns the start time identifying this cycle, or `None` if another
    /// cycle already holds the guard.
    pub fn begin(&self, key: &TableKey) -> Option<DateTime<Utc>> {
        let started = {
            let mut state = self.states.entry(key.clone()).or_default();
            match state.apply(SyncEvent::Start, Utc::now()) {
                Transition::Applied => state.syncing_since(),
                _ => None,
            }
        };
        debug!(key = %key, started = started.is_some(), "Sync guard requested");
        if started.is_some() {
            self.bump();
        }
        started
    }

    /// Applies the outcome of the cycle that began at `started`
    ///
    /// Ignored when that cycle no longer holds the guard (it was released as
    /// stale, and possibly taken by a newer cycle since).
    pub fn finish(&self, key: &TableKey, started: DateTime<Utc>, event: SyncEvent) -> Transition {
        let transition = match self.states.get_mut(key) {
            Some(mut state) if state.syncing_since() == Some(started) => {
                state.apply(event, Utc::now())
            }
            _ => Transition::Ignored,
        };
        if transition.is_applied() {
            self.bump();
        }
        transition
    }

    /// Raises the last-synced time of `key` from persisted storage
    pub fn hydrate_last_synced(&self, key: &TableKey, timestamp: DateTime<Utc>) {
        self.states
            .entry(key.clone())
            .or_default()
            .advance_last_synced(timestamp);
        self.bump();
    }

    /// Releases in-progress guards held for longer than `ceiling`
    ///
    /// A guard that old belongs to a cycle that will never finish (e.g. the
    /// connection dropped mid-request). No error is recorded. Returns the
    /// released keys.
    pub fn clear_stale_guards(&self, ceiling: Duration) -> Vec<TableKey> {
        let ceiling =
            chrono::Duration::from_std(ceiling).unwrap_or_else(|_| chrono::Duration::weeks(52));
        let cutoff = Utc::now() - ceiling;

        let mut released = Vec::new();
        for mut entry in self.states.iter_mut() {
            let stale = entry
                .syncing_since()
                .map(|since| since <= cutoff)
                .unwrap_or(false);
            if stale && entry.release_guard() {
                released.push(entry.key().clone());
            }
        }

        if !released.is_empty() {
            info!(count = released.len(), "Released stale sync guards");
            self.bump();
        }
        released
    }

    /// Forgets every state belonging to `user`
    pub fn reset_user(&self, user: &UserId) {
        self.states.retain(|key, _| key.user() != user);
        self.bump();
    }

    /// Every known state, sorted by key
    pub fn snapshot(&self) -> Vec<(TableKey, SyncState)> {
        let mut all: Vec<_> = self
            .states
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    /// Keys known for `user`
    pub fn keys_for(&self, user: &UserId) -> Vec<TableKey> {
        let mut keys: Vec<_> = self
            .states
            .iter()
            .filter(|entry| entry.key().user() == user)
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        keys
    }

    /// Number of applied changes so far
    pub fn version(&self) -> u64 {
        *self.version.borrow()
    }

    /// Receiver that is notified whenever the version changes
    pub fn watch(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    fn bump(&self) {
        self.version.send_modify(|v| *v += 1);
    }
}

impl Default for SyncStateRegistry {
    fn default() -> Self {
        Self::new()
    }
}
