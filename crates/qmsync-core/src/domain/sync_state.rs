//! Per-table synchronization state
//!
//! [`SyncState`] is the small status record kept for every (table, user)
//! pair. It only changes through [`SyncState::apply`], which implements the
//! sync state machine:
//!
//! ```text
//!   idle ──start──────────▶ syncing
//!   syncing ──success(ts)─▶ idle     lastSynced = max(lastSynced, ts), lastError cleared
//!   syncing ──failure(msg)▶ idle     lastError = msg, pendingChanges untouched
//!   idle ──localChange────▶ idle     pendingChanges = dataChanged = true
//!   syncing ──start───────▶ syncing  (AlreadySyncing, nothing changes)
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Events accepted by the sync state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// A push/pull cycle is about to begin
    Start,
    /// The cycle finished and the server confirmed the data at this time
    Success(DateTime<Utc>),
    /// The cycle failed with the given message
    Failure(String),
    /// The local copy was modified
    LocalChange,
}

impl std::fmt::Display for SyncEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncEvent::Start => write!(f, "start"),
            SyncEvent::Success(ts) => write!(f, "success({})", ts.to_rfc3339()),
            SyncEvent::Failure(msg) => write!(f, "failure({msg})"),
            SyncEvent::LocalChange => write!(f, "local_change"),
        }
    }
}

/// What happened when an event was applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The state changed according to the event
    Applied,
    /// `Start` was rejected because a cycle is already in flight
    AlreadySyncing,
    /// The event does not apply to the current state (e.g. `Success` while idle)
    Ignored,
}

impl Transition {
    /// Returns true if the event changed the state
    pub fn is_applied(&self) -> bool {
        matches!(self, Transition::Applied)
    }
}

/// Synchronization status of one table for one user
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    /// True exactly while a push/pull cycle is in flight
    is_syncing: bool,
    /// When the in-flight cycle started
    syncing_since: Option<DateTime<Utc>>,
    /// Time of the last confirmed successful round-trip
    last_synced: Option<DateTime<Utc>>,
    /// Message of the last failure, cleared by a success
    last_error: Option<String>,
    /// A local write happened after the last successful sync
    pending_changes: bool,
    /// Local data differs from the last confirmed copy
    data_changed: bool,
    /// A local write happened while the current cycle was in flight
    #[serde(skip)]
    changed_while_syncing: bool,
}

impl SyncState {
    /// Creates the default idle state (nothing synced, nothing pending)
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies an event and reports the resulting transition
    ///
    /// `now` is the time recorded as the start of a cycle.
    pub fn apply(&mut self, event: SyncEvent, now: DateTime<Utc>) -> Transition {
        match event {
            SyncEvent::Start => {
                if self.is_syncing {
                    return Transition::AlreadySyncing;
                }
                self.is_syncing = true;
                self.syncing_since = Some(now);
                self.changed_while_syncing = false;
                Transition::Applied
            }
            SyncEvent::Success(timestamp) => {
                if !self.is_syncing {
                    return Transition::Ignored;
                }
                self.is_syncing = false;
                self.syncing_since = None;
                self.advance_last_synced(timestamp);
                self.last_error = None;
                // Edits made during the cycle were not part of the pushed set
                self.pending_changes = self.changed_while_syncing;
                self.data_changed = self.changed_while_syncing;
                self.changed_while_syncing = false;
                Transition::Applied
            }
            SyncEvent::Failure(message) => {
                if !self.is_syncing {
                    return Transition::Ignored;
                }
                self.is_syncing = false;
                self.syncing_since = None;
                self.last_error = Some(message);
                self.changed_while_syncing = false;
                Transition::Applied
            }
            SyncEvent::LocalChange => {
                self.pending_changes = true;
                self.data_changed = true;
                if self.is_syncing {
                    self.changed_while_syncing = true;
                }
                Transition::Applied
            }
        }
    }

    /// Releases an in-progress guard without recording an error
    ///
    /// Returns true if a guard was actually held.
    pub fn release_guard(&mut self) -> bool {
        let held = self.is_syncing;
        self.is_syncing = false;
        self.syncing_since = None;
        if self.changed_while_syncing {
            self.pending_changes = true;
        }
        self.changed_while_syncing = false;
        held
    }

    /// Raises `last_synced` to `timestamp` if it is newer
    ///
    /// Used when hydrating from persisted storage; never moves backwards.
    pub fn advance_last_synced(&mut self, timestamp: DateTime<Utc>) {
        match self.last_synced {
            Some(current) if current >= timestamp => {}
            _ => self.last_synced = Some(timestamp),
        }
    }

    /// Returns true while a cycle is in flight
    pub fn is_syncing(&self) -> bool {
        self.is_syncing
    }

    /// When the in-flight cycle started, if any
    pub fn syncing_since(&self) -> Option<DateTime<Utc>> {
        self.syncing_since
    }

    /// Time of the last confirmed successful sync
    pub fn last_synced(&self) -> Option<DateTime<Utc>> {
        self.last_synced
    }

    /// Message of the last failure
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Returns true if local writes are waiting to be pushed
    pub fn pending_changes(&self) -> bool {
        self.pending_changes
    }

    /// Returns true if local data differs from the last confirmed copy
    pub fn data_changed(&self) -> bool {
        self.data_changed
    }
}
