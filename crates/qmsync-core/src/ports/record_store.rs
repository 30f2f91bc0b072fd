//! Record store port (driven/secondary port)
//!
//! This module defines the interface for durably persisting the local copy
//! of each table, namespaced by user, together with the per-table
//! last-synced timestamp.
//!
//! ## Design Notes
//!
//! - Errors are classified into [`StorageError`] rather than `anyhow` because
//!   callers must tell a quota failure (recoverable, the user is told that
//!   local persistence is degraded) from other backend failures.
//! - Implementations never merge record sets: a save replaces the whole
//!   array stored under the key.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::{
    newtypes::{TableKey, UserId},
    Record,
};

/// Errors that can occur when persisting local data
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// The storage quota is exhausted; the write was rejected
    #[error("Storage quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Persisted data could not be decoded
    #[error("Corrupted local data: {0}")]
    Corrupted(String),

    /// Any other backend failure
    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    /// Returns true for quota failures
    pub fn is_quota(&self) -> bool {
        matches!(self, StorageError::QuotaExceeded(_))
    }
}

/// Port trait for durable per-(table, user) record storage
#[async_trait::async_trait]
pub trait IRecordStore: Send + Sync {
    /// Loads the persisted records for a key, `None` if never written
    async fn load_records(&self, key: &TableKey) -> Result<Option<Vec<Record>>, StorageError>;

    /// Replaces the persisted records for a key
    async fn save_records(&self, key: &TableKey, records: &[Record]) -> Result<(), StorageError>;

    /// Removes the persisted records (and last-synced time) for a key
    async fn delete_records(&self, key: &TableKey) -> Result<(), StorageError>;

    /// Removes every key belonging to `user`, returning how many tables were removed
    async fn delete_user(&self, user: &UserId) -> Result<u64, StorageError>;

    /// Lists the keys stored for `user`
    async fn list_keys(&self, user: &UserId) -> Result<Vec<TableKey>, StorageError>;

    /// Loads the persisted last-synced time for a key
    async fn load_last_synced(&self, key: &TableKey)
        -> Result<Option<DateTime<Utc>>, StorageError>;

    /// Persists the last-synced time for a key
    ///
    /// Implementations keep the newest value if an older one is written.
    async fn save_last_synced(
        &self,
        key: &TableKey,
        timestamp: DateTime<Utc>,
    ) -> Result<(), StorageError>;
}
