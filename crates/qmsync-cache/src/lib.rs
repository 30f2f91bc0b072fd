//! QMSync Cache - Local persistence
//!
//! SQLite-backed storage for:
//! - The last known good copy of every (table, user) pair
//! - Per-table last-synced timestamps
//! - Change markers shared with other contexts
//! - The persistent diagnostics log
//!
//! ## Architecture
//!
//! This crate implements the `IRecordStore`, `IDiagnosticsStore` and
//! `IChangeChannel` ports from `qmsync-core`. It is a driven (secondary)
//! adapter in the hexagonal architecture. [`LocalStore`] sits in front of
//! any `IRecordStore` and provides read-your-writes semantics.
//!
//! ## Key Components
//!
//! - [`DatabasePool`] - Connection pool with migration support and size quota
//! - [`SqliteRecordStore`] - `IRecordStore` + `IDiagnosticsStore` implementation
//! - [`LocalStore`] - Write-through in-memory cache with revision tickets
//! - [`SqliteMarkerChannel`] - Shared-database `IChangeChannel`
//! - [`CacheError`] - Error types for cache operations
//!
//! ## Usage
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use qmsync_cache::{DatabasePool, LocalStore, SqliteRecordStore};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let pool = DatabasePool::new(Path::new("/home/user/.local/share/qmsync/qmsync.db")).await?;
//! let backend = Arc::new(SqliteRecordStore::new(pool.pool().clone()));
//! let store = LocalStore::new(backend);
//! # Ok(())
//! # }
//! ```

pub mod local_store;
pub mod markers;
pub mod pool;
pub mod repository;

pub use local_store::{LocalStore, Ticket};
pub use markers::SqliteMarkerChannel;
pub use pool::DatabasePool;
pub use repository::SqliteRecordStore;

use qmsync_core::ports::StorageError;

/// SQLite primary result code for "database or disk is full"
const SQLITE_FULL: i32 = 13;

/// Errors that can occur during cache operations
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Failed to establish a database connection
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// A database query failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// The database reached its size limit
    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Schema migration failed
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Serialization or deserialization of stored values failed
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<sqlx::Error> for CacheError {
    fn from(e: sqlx::Error) -> Self {
        if is_disk_full(&e) {
            CacheError::QuotaExceeded(e.to_string())
        } else {
            CacheError::QueryFailed(e.to_string())
        }
    }
}

impl From<CacheError> for StorageError {
    fn from(e: CacheError) -> Self {
        match e {
            CacheError::QuotaExceeded(msg) => StorageError::QuotaExceeded(msg),
            CacheError::SerializationError(msg) => StorageError::Corrupted(msg),
            other => StorageError::Backend(other.to_string()),
        }
    }
}

fn is_disk_full(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db) => {
            // Extended result codes keep the primary code in the low byte
            let full_code = db
                .code()
                .and_then(|code| code.parse::<i32>().ok())
                .map(|code| code & 0xff == SQLITE_FULL)
                .unwrap_or(false);
            full_code || db.message().contains("database or disk is full")
        }
        _ => false,
    }
}
