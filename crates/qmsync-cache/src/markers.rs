//! Shared-database change channel
//!
//! Every context that opens the same SQLite file sees the same
//! `change_markers` table. Publishing inserts a marker row; a poll loop reads
//! rows newer than the last one it has seen and forwards notices from other
//! origins to local subscribers. Markers written by this context are skipped.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use sqlx::{Row, SqlitePool};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use qmsync_core::domain::{ChangeNotice, ContextId};
use qmsync_core::ports::IChangeChannel;

use crate::repository::{key_from_row, timestamp_from_string, timestamp_to_string};
use crate::CacheError;

/// Capacity of the local fan-out channel
const CHANNEL_CAPACITY: usize = 256;

/// Markers kept in the table; older rows are pruned on publish
const MARKER_RETENTION: i64 = 1000;

/// [`IChangeChannel`] backed by marker rows in the shared database
pub struct SqliteMarkerChannel {
    pool: SqlitePool,
    origin: ContextId,
    poll_interval: Duration,
    cursor: AtomicI64,
    sender: broadcast::Sender<ChangeNotice>,
}

impl SqliteMarkerChannel {
    /// Creates a channel for the context `origin`
    ///
    /// Markers that already exist when the channel is created are not
    /// delivered; only changes made afterwards are.
    pub async fn new(
        pool: SqlitePool,
        origin: ContextId,
        poll_interval: Duration,
    ) -> Result<Self, CacheError> {
        let cursor: Option<i64> = sqlx::query_scalar("SELECT MAX(id) FROM change_markers")
            .fetch_one(&pool)
            .await?;
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);

        Ok(Self {
            pool,
            origin,
            poll_interval,
            cursor: AtomicI64::new(cursor.unwrap_or(0)),
            sender,
        })
    }

    /// Context this channel publishes as
    pub fn origin(&self) -> ContextId {
        self.origin
    }

    /// Reads new markers once and forwards the foreign ones
    ///
    /// Returns the number of notices delivered.
    pub async fn poll_once(&self) -> Result<usize, CacheError> {
        let rows = sqlx::query(
            "SELECT id, table_name, user_id, timestamp, origin, sequence FROM change_markers \
             WHERE id > ? ORDER BY id ASC",
        )
        .bind(self.cursor.load(Ordering::Acquire))
        .fetch_all(&self.pool)
        .await?;

        let mut delivered = 0;
        for row in &rows {
            let id: i64 = row.try_get("id")?;
            self.cursor.fetch_max(id, Ordering::AcqRel);

            let notice = match notice_from_row(row) {
                Ok(notice) => notice,
                Err(e) => {
                    tracing::warn!(marker_id = id, error = %e, "Skipping unreadable change marker");
                    continue;
                }
            };
            if notice.is_from(&self.origin) {
                continue;
            }

            // No receivers is not an error: nobody is listening yet
            let _ = self.sender.send(notice);
            delivered += 1;
        }

        Ok(delivered)
    }

    /// Polls for markers until `shutdown` is cancelled
    pub async fn run(&self, shutdown: CancellationToken) {
        tracing::info!(
            origin = %self.origin,
            interval_ms = self.poll_interval.as_millis() as u64,
            "Change marker poller starting"
        );
        let mut timer = tokio::time::interval(self.poll_interval);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = timer.tick() => {
                    if let Err(e) = self.poll_once().await {
                        tracing::warn!(error = %e, "Failed to poll change markers");
                    }
                }
            }
        }

        tracing::info!("Change marker poller stopped");
    }
}

fn notice_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<ChangeNotice, CacheError> {
    let key = key_from_row(row)?;
    let timestamp: String = row.try_get("timestamp")?;
    let origin: String = row.try_get("origin")?;
    let origin: ContextId = origin
        .parse()
        .map_err(|_| CacheError::SerializationError(format!("Invalid origin '{}'", origin)))?;

    let sequence: i64 = row.try_get("sequence")?;

    Ok(ChangeNotice::new(key, timestamp_from_string(&timestamp)?, origin)
        .with_sequence(sequence as u64))
}

#[async_trait::async_trait]
impl IChangeChannel for SqliteMarkerChannel {
    async fn publish(&self, notice: &ChangeNotice) -> anyhow::Result<()> {
        let id = sqlx::query(
            "INSERT INTO change_markers (table_name, user_id, timestamp, origin, sequence) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(notice.key.table().as_str())
        .bind(notice.key.user().as_str())
        .bind(timestamp_to_string(&notice.timestamp))
        .bind(notice.origin.to_string())
        .bind(notice.sequence as i64)
        .execute(&self.pool)
        .await
        .map_err(CacheError::from)?
        .last_insert_rowid();

        sqlx::query("DELETE FROM change_markers WHERE id <= ?")
            .bind(id - MARKER_RETENTION)
            .execute(&self.pool)
            .await
            .map_err(CacheError::from)?;

        tracing::debug!(key = %notice.key, marker_id = id, "Published change marker");
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeNotice> {
        self.sender.subscribe()
    }
}
