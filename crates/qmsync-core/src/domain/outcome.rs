//! Caller-facing results of a synchronization request
//!
//! A sync call never raises: it resolves to `Ok(SyncOutcome)` or to one of
//! the [`SyncFailure`] classes. The classes are kept distinct so the UI can
//! tell "offline" from "server misconfigured" from "server said no".

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::ports::{RemoteError, StorageError};

/// Successful (or no-op) result of `sync_with_server`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The cycle completed and the server confirmed the data
    Synced {
        /// Server-confirmed sync time
        timestamp: DateTime<Utc>,
        /// Whether the canonical copy was pulled after the push
        pulled: bool,
        /// Number of records in the confirmed local copy
        records: usize,
    },
    /// Another cycle for the same table is in flight; nothing was sent
    AlreadySyncing,
}

impl SyncOutcome {
    /// Returns true if data was actually synchronized
    pub fn is_synced(&self) -> bool {
        matches!(self, SyncOutcome::Synced { .. })
    }
}

/// Failure classes of a synchronization request
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncFailure {
    /// The device is offline; no request was attempted
    #[error("Offline: synchronization postponed until connectivity returns")]
    Offline,

    /// The server could not be reached, answered with an error status,
    /// or timed out (after the configured retries)
    #[error("Network error: {0}")]
    Transport(String),

    /// The server answered with something that is not a valid API response
    /// (raw markup, script source, malformed JSON)
    #[error("Invalid server response: {0}")]
    Protocol(String),

    /// The server answered `success: false`
    #[error("Server rejected the request: {0}")]
    Application(String),

    /// The confirmed copy could not be persisted locally
    #[error("Local storage error: {0}")]
    Storage(String),

    /// The request was abandoned before it completed
    #[error("Synchronization cancelled")]
    Cancelled,
}

impl SyncFailure {
    /// Short machine-readable code for logs and diagnostics
    pub fn code(&self) -> &'static str {
        match self {
            SyncFailure::Offline => "OFFLINE",
            SyncFailure::Transport(_) => "TRANSPORT",
            SyncFailure::Protocol(_) => "PROTOCOL",
            SyncFailure::Application(_) => "APPLICATION",
            SyncFailure::Storage(_) => "STORAGE",
            SyncFailure::Cancelled => "CANCELLED",
        }
    }
}

impl From<RemoteError> for SyncFailure {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Transport(_) | RemoteError::Timeout | RemoteError::Status { .. } => {
                SyncFailure::Transport(err.to_string())
            }
            RemoteError::Format(_) => SyncFailure::Protocol(err.to_string()),
            RemoteError::Application(message) => SyncFailure::Application(message),
        }
    }
}

impl From<StorageError> for SyncFailure {
    fn from(err: StorageError) -> Self {
        SyncFailure::Storage(err.to_string())
    }
}
