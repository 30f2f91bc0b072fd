//! SQLite implementation of IRecordStore and IDiagnosticsStore
//!
//! ## Type Mapping
//!
//! | Domain Type     | SQL Type | Strategy                                        |
//! |-----------------|----------|-------------------------------------------------|
//! | TableName       | TEXT     | `.as_str()` / `TableName::new()`                |
//! | UserId          | TEXT     | `.as_str()` / `UserId::new()`                   |
//! | Vec<Record>     | TEXT     | serde_json array                                |
//! | DateTime<Utc>   | TEXT     | fixed-width RFC 3339 (microseconds, `Z`)        |
//! | SyncLogAction   | TEXT     | snake_case via `Display` / `FromStr`            |
//!
//! Timestamps are written with a fixed width so that SQL `MAX()` on the text
//! column orders them chronologically.

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use qmsync_core::domain::{
    newtypes::{TableKey, TableName, UserId},
    Record, SyncLogAction, SyncLogEntry,
};
use qmsync_core::ports::{IDiagnosticsStore, IRecordStore, StorageError};

use crate::CacheError;

/// SQLite-based implementation of the record and diagnostics ports
pub struct SqliteRecordStore {
    pool: SqlitePool,
}

impl SqliteRecordStore {
    /// Creates a new store with the given connection pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

// ============================================================================
// Helper functions for type conversion
// ============================================================================

pub(crate) fn timestamp_to_string(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn timestamp_from_string(s: &str) -> Result<DateTime<Utc>, CacheError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| CacheError::SerializationError(format!("Invalid timestamp '{}': {}", s, e)))
}

pub(crate) fn key_from_row(row: &SqliteRow) -> Result<TableKey, CacheError> {
    let table: String = row.try_get("table_name")?;
    let user: String = row.try_get("user_id")?;
    let table = TableName::new(table).map_err(|e| CacheError::SerializationError(e.to_string()))?;
    let user = UserId::new(user).map_err(|e| CacheError::SerializationError(e.to_string()))?;
    Ok(TableKey::new(table, user))
}

fn log_entry_from_row(row: &SqliteRow) -> Result<SyncLogEntry, CacheError> {
    let key = key_from_row(row)?;
    let timestamp: String = row.try_get("timestamp")?;
    let action: String = row.try_get("action")?;
    let detail: Option<String> = row.try_get("detail")?;

    let action: SyncLogAction = action
        .parse()
        .map_err(|e: qmsync_core::domain::DomainError| {
            CacheError::SerializationError(e.to_string())
        })?;

    Ok(SyncLogEntry {
        timestamp: timestamp_from_string(&timestamp)?,
        key,
        action,
        detail,
    })
}

// ============================================================================
// IRecordStore implementation
// ============================================================================

#[async_trait::async_trait]
impl IRecordStore for SqliteRecordStore {
    async fn load_records(&self, key: &TableKey) -> Result<Option<Vec<Record>>, StorageError> {
        let row = sqlx::query("SELECT records FROM table_records WHERE table_name = ? AND user_id = ?")
            .bind(key.table().as_str())
            .bind(key.user().as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(CacheError::from)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let json: String = row.try_get("records").map_err(CacheError::from)?;
        let records: Vec<Record> = serde_json::from_str(&json).map_err(|e| {
            CacheError::SerializationError(format!("Stored records for {} are not a JSON array: {}", key, e))
        })?;
        Ok(Some(records))
    }

    async fn save_records(&self, key: &TableKey, records: &[Record]) -> Result<(), StorageError> {
        let json = serde_json::to_string(records)
            .map_err(|e| CacheError::SerializationError(e.to_string()))?;

        sqlx::query(
            "INSERT INTO table_records (table_name, user_id, records, updated_at) \
             VALUES (?, ?, ?, ?) \
             ON CONFLICT(table_name, user_id) DO UPDATE SET \
             records = excluded.records, updated_at = excluded.updated_at",
        )
        .bind(key.table().as_str())
        .bind(key.user().as_str())
        .bind(&json)
        .bind(timestamp_to_string(&Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(CacheError::from)?;

        tracing::trace!(key = %key, count = records.len(), "Saved records");
        Ok(())
    }

    async fn delete_records(&self, key: &TableKey) -> Result<(), StorageError> {
        for sql in [
            "DELETE FROM table_records WHERE table_name = ? AND user_id = ?",
            "DELETE FROM sync_timestamps WHERE table_name = ? AND user_id = ?",
        ] {
            sqlx::query(sql)
                .bind(key.table().as_str())
                .bind(key.user().as_str())
                .execute(&self.pool)
                .await
                .map_err(CacheError::from)?;
        }

        tracing::debug!(key = %key, "Deleted local copy");
        Ok(())
    }

    async fn delete_user(&self, user: &UserId) -> Result<u64, StorageError> {
        let mut tx = self.pool.begin().await.map_err(CacheError::from)?;

        let removed = sqlx::query("DELETE FROM table_records WHERE user_id = ?")
            .bind(user.as_str())
            .execute(&mut *tx)
            .await
            .map_err(CacheError::from)?
            .rows_affected();

        sqlx::query("DELETE FROM sync_timestamps WHERE user_id = ?")
            .bind(user.as_str())
            .execute(&mut *tx)
            .await
            .map_err(CacheError::from)?;

        tx.commit().await.map_err(CacheError::from)?;

        tracing::info!(user = %user, tables = removed, "Deleted local data for user");
        Ok(removed)
    }

    async fn list_keys(&self, user: &UserId) -> Result<Vec<TableKey>, StorageError> {
        let rows = sqlx::query(
            "SELECT table_name, user_id FROM table_records WHERE user_id = ? ORDER BY table_name",
        )
        .bind(user.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(CacheError::from)?;

        rows.iter()
            .map(|row| key_from_row(row).map_err(StorageError::from))
            .collect()
    }

    async fn load_last_synced(
        &self,
        key: &TableKey,
    ) -> Result<Option<DateTime<Utc>>, StorageError> {
        let value: Option<String> = sqlx::query_scalar(
            "SELECT last_synced FROM sync_timestamps WHERE table_name = ? AND user_id = ?",
        )
        .bind(key.table().as_str())
        .bind(key.user().as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(CacheError::from)?;

        match value {
            Some(s) => Ok(Some(timestamp_from_string(&s)?)),
            None => Ok(None),
        }
    }

    async fn save_last_synced(
        &self,
        key: &TableKey,
        timestamp: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO sync_timestamps (table_name, user_id, last_synced) VALUES (?, ?, ?) \
             ON CONFLICT(table_name, user_id) DO UPDATE SET \
             last_synced = MAX(last_synced, excluded.last_synced)",
        )
        .bind(key.table().as_str())
        .bind(key.user().as_str())
        .bind(timestamp_to_string(&timestamp))
        .execute(&self.pool)
        .await
        .map_err(CacheError::from)?;

        Ok(())
    }
}

// ============================================================================
// IDiagnosticsStore implementation
// ============================================================================

#[async_trait::async_trait]
impl IDiagnosticsStore for SqliteRecordStore {
    async fn append(&self, entry: &SyncLogEntry, keep: usize) -> Result<(), StorageError> {
        let table = entry.key.table().as_str();
        let user = entry.key.user().as_str();

        sqlx::query(
            "INSERT INTO sync_log (table_name, user_id, timestamp, action, detail) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(table)
        .bind(user)
        .bind(timestamp_to_string(&entry.timestamp))
        .bind(entry.action.to_string())
        .bind(&entry.detail)
        .execute(&self.pool)
        .await
        .map_err(CacheError::from)?;

        sqlx::query(
            "DELETE FROM sync_log WHERE table_name = ? AND user_id = ? AND id NOT IN \
             (SELECT id FROM sync_log WHERE table_name = ? AND user_id = ? ORDER BY id DESC LIMIT ?)",
        )
        .bind(table)
        .bind(user)
        .bind(table)
        .bind(user)
        .bind(keep as i64)
        .execute(&self.pool)
        .await
        .map_err(CacheError::from)?;

        Ok(())
    }

    async fn recent(
        &self,
        key: Option<&TableKey>,
        limit: u32,
    ) -> Result<Vec<SyncLogEntry>, StorageError> {
        let rows = match key {
            Some(key) => {
                sqlx::query(
                    "SELECT * FROM sync_log WHERE table_name = ? AND user_id = ? \
                     ORDER BY id DESC LIMIT ?",
                )
                .bind(key.table().as_str())
                .bind(key.user().as_str())
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query("SELECT * FROM sync_log ORDER BY id DESC LIMIT ?")
                    .bind(limit as i64)
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(CacheError::from)?;

        rows.iter()
            .map(|row| log_entry_from_row(row).map_err(StorageError::from))
            .collect()
    }

    async fn drop_oldest(&self, count: u32) -> Result<u64, StorageError> {
        let result = sqlx::query(
            "DELETE FROM sync_log WHERE id IN (SELECT id FROM sync_log ORDER BY id ASC LIMIT ?)",
        )
        .bind(count as i64)
        .execute(&self.pool)
        .await
        .map_err(CacheError::from)?;

        Ok(result.rows_affected())
    }
}
