//! Diagnostics log entries
//!
//! Entries describe what the sync engine did, for operator troubleshooting.
//! They are observational only; nothing in the engine reads them back to
//! make decisions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::TableKey;

/// Kinds of sync actions recorded in the diagnostics log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncLogAction {
    /// A push/pull cycle started
    SyncStart,
    /// A cycle completed successfully
    SyncSuccess,
    /// A cycle failed
    SyncFailure,
    /// The local copy changed (local edit or accepted pull)
    DataChanged,
    /// A request was refused because the device is offline
    Offline,
    /// A request was skipped (already syncing, stale pull discarded)
    Skipped,
    /// Local data was reset administratively
    Reset,
}

impl std::fmt::Display for SyncLogAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SyncLogAction::SyncStart => "sync_start",
            SyncLogAction::SyncSuccess => "sync_success",
            SyncLogAction::SyncFailure => "sync_failure",
            SyncLogAction::DataChanged => "data_changed",
            SyncLogAction::Offline => "offline",
            SyncLogAction::Skipped => "skipped",
            SyncLogAction::Reset => "reset",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for SyncLogAction {
    type Err = super::errors::DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sync_start" => Ok(SyncLogAction::SyncStart),
            "sync_success" => Ok(SyncLogAction::SyncSuccess),
            "sync_failure" => Ok(SyncLogAction::SyncFailure),
            "data_changed" => Ok(SyncLogAction::DataChanged),
            "offline" => Ok(SyncLogAction::Offline),
            "skipped" => Ok(SyncLogAction::Skipped),
            "reset" => Ok(SyncLogAction::Reset),
            other => Err(super::errors::DomainError::ValidationFailed(format!(
                "Unknown sync log action: {other}"
            ))),
        }
    }
}

/// One entry of the diagnostics log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncLogEntry {
    /// When the action happened
    pub timestamp: DateTime<Utc>,
    /// Table and user the action applies to
    pub key: TableKey,
    /// What happened
    pub action: SyncLogAction,
    /// Free-form detail (error message, record count, ...)
    pub detail: Option<String>,
}

impl SyncLogEntry {
    /// Creates an entry stamped with the current time
    pub fn new(key: TableKey, action: SyncLogAction) -> Self {
        Self {
            timestamp: Utc::now(),
            key,
            action,
            detail: None,
        }
    }

    /// Attaches a detail message
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}
