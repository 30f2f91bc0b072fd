//! Cross-context change notices
//!
//! A [`ChangeNotice`] is the typed message published after a successful
//! sync so that other contexts sharing the same backend re-read the table.
//! Delivery is at-least-once; consumers must treat duplicates as harmless.
//!
//! A notice is identified by its `origin` and `sequence`. Timestamps are not
//! unique: two contexts may be acknowledged at the same server second, and a
//! local-clock fallback can run behind another device's clock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::{ContextId, TableKey};

/// "Table X of user Y changed at time T" notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeNotice {
    /// The table (and owning user) whose data changed
    pub key: TableKey,
    /// Server-confirmed time of the change
    pub timestamp: DateTime<Utc>,
    /// Context that published the notice
    pub origin: ContextId,
    /// Per-origin publish counter, increasing with every notice
    #[serde(default)]
    pub sequence: u64,
}

impl ChangeNotice {
    /// Creates a notice for `key` published by `origin`
    pub fn new(key: TableKey, timestamp: DateTime<Utc>, origin: ContextId) -> Self {
        Self {
            key,
            timestamp,
            origin,
            sequence: 0,
        }
    }

    /// Sets the per-origin publish counter
    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    /// Returns true if the notice was published by `context`
    pub fn is_from(&self, context: &ContextId) -> bool {
        self.origin == *context
    }
}
