//! Diagnostics store port (driven/secondary port)
//!
//! Optional persistent sink for the diagnostics log. The in-memory ring
//! buffer in `qmsync-audit` is authoritative; this sink only lets entries
//! survive a restart.

use crate::domain::{newtypes::TableKey, SyncLogEntry};
use crate::ports::StorageError;

/// Port trait for persisting diagnostics entries
#[async_trait::async_trait]
pub trait IDiagnosticsStore: Send + Sync {
    /// Appends an entry, keeping at most `keep` entries for its table
    async fn append(&self, entry: &SyncLogEntry, keep: usize) -> Result<(), StorageError>;

    /// Returns the newest entries first, optionally restricted to one table
    async fn recent(
        &self,
        key: Option<&TableKey>,
        limit: u32,
    ) -> Result<Vec<SyncLogEntry>, StorageError>;

    /// Deletes the `count` oldest entries across all tables
    async fn drop_oldest(&self, count: u32) -> Result<u64, StorageError>;
}
