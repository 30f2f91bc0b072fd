//! Cross-context change notification
//!
//! After a successful sync the orchestrator publishes a [`ChangeNotice`]
//! twice:
//!
//! - on the **local** bus, a `tokio::sync::broadcast` channel observed by
//!   consumers in the same process ([`CrossContextBroadcaster::subscribe_local`]);
//! - on the **shared** channel, an [`IChangeChannel`] observed by other
//!   contexts using the same backend. [`InMemoryChangeChannel`] is the
//!   in-process transport; the SQLite marker channel lives in `qmsync-cache`.
//!
//! [`ChangeListener`] sits on the receiving end: it turns notices from other
//! contexts into re-reads of the affected table. Delivery is at-least-once,
//! so a notice that was already handled is ignored. Notices are told apart
//! by origin and per-origin sequence, never by timestamp.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use qmsync_core::domain::{newtypes::TableKey, ChangeNotice, ContextId};
use qmsync_core::ports::IChangeChannel;

use crate::orchestrator::{LoadOptions, SyncOrchestrator};

/// Capacity of the in-process channels
const BUS_CAPACITY: usize = 256;

// ============================================================================
// In-memory shared channel
// ============================================================================

/// [`IChangeChannel`] shared by clones within one process
///
/// Every clone publishes to and subscribes from the same bus, so handing one
/// clone to each simulated context connects them.
#[derive(Clone)]
pub struct InMemoryChangeChannel {
    sender: broadcast::Sender<ChangeNotice>,
}

impl InMemoryChangeChannel {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BUS_CAPACITY);
        Self { sender }
    }
}

impl Default for InMemoryChangeChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl IChangeChannel for InMemoryChangeChannel {
    async fn publish(&self, notice: &ChangeNotice) -> anyhow::Result<()> {
        // Nobody listening is fine
        let _ = self.sender.send(notice.clone());
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeNotice> {
        self.sender.subscribe()
    }
}

// ============================================================================
// Broadcaster
// ============================================================================

/// Publishes "table changed" notices on the local bus and the shared channel
pub struct CrossContextBroadcaster {
    origin: ContextId,
    sequence: AtomicU64,
    local: broadcast::Sender<ChangeNotice>,
    shared: Option<Arc<dyn IChangeChannel>>,
}

impl CrossContextBroadcaster {
    /// Creates a broadcaster for the context `origin`
    ///
    /// Without a shared channel only local subscribers are notified.
    pub fn new(origin: ContextId, shared: Option<Arc<dyn IChangeChannel>>) -> Self {
        let (local, _) = broadcast::channel(BUS_CAPACITY);
        Self {
            origin,
            sequence: AtomicU64::new(0),
            local,
            shared,
        }
    }

    /// Identity stamped on every published notice
    pub fn origin(&self) -> ContextId {
        self.origin
    }

    /// Announces that `key` changed at `timestamp`
    ///
    /// Best-effort: a failing shared channel is logged and otherwise ignored.
    pub async fn publish(&self, key: &TableKey, timestamp: DateTime<Utc>) -> ChangeNotice {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let notice = ChangeNotice::new(key.clone(), timestamp, self.origin).with_sequence(sequence);
        self.notify_local(notice.clone());

        if let Some(shared) = &self.shared {
            if let Err(e) = shared.publish(&notice).await {
                warn!(key = %key, error = %e, "Failed to publish change notice");
            }
        }
        debug!(key = %key, %timestamp, "Change notice published");
        notice
    }

    /// Delivers `notice` to local subscribers only
    pub fn notify_local(&self, notice: ChangeNotice) {
        let _ = self.local.send(notice);
    }

    /// Receiver of every notice delivered locally
    pub fn subscribe_local(&self) -> broadcast::Receiver<ChangeNotice> {
        self.local.subscribe()
    }

    /// Receiver of the shared channel, if one is configured
    pub fn subscribe_remote(&self) -> Option<broadcast::Receiver<ChangeNotice>> {
        self.shared.as_ref().map(|shared| shared.subscribe())
    }
}

// ============================================================================
// Listener
// ============================================================================

/// Refreshes tables changed by other contexts
pub struct ChangeListener {
    orchestrator: Arc<SyncOrchestrator>,
    /// Highest sequence handled per table and publishing context
    seen: DashMap<(TableKey, ContextId), u64>,
}

impl ChangeListener {
    pub fn new(orchestrator: Arc<SyncOrchestrator>) -> Self {
        Self {
            orchestrator,
            seen: DashMap::new(),
        }
    }

    /// Handles one notice; returns true if the table was refreshed
    ///
    /// Notices from this context, and notices from another context that are
    /// not newer than one already handled from it for the same table, are
    /// ignored.
    pub async fn handle(&self, notice: ChangeNotice) -> bool {
        let broadcaster = self.orchestrator.broadcaster();
        if notice.is_from(&broadcaster.origin()) {
            return false;
        }

        match self.seen.entry((notice.key.clone(), notice.origin)) {
            Entry::Occupied(mut seen) => {
                if notice.sequence <= *seen.get() {
                    debug!(
                        key = %notice.key,
                        origin = %notice.origin,
                        sequence = notice.sequence,
                        "Ignoring duplicate change notice"
                    );
                    return false;
                }
                seen.insert(notice.sequence);
            }
            Entry::Vacant(slot) => {
                slot.insert(notice.sequence);
            }
        }

        info!(key = %notice.key, origin = %notice.origin, "Table changed in another context, refreshing");
        let records = self
            .orchestrator
            .load_from_server(&notice.key, &LoadOptions::default())
            .await;
        debug!(key = %notice.key, records = records.len(), "Table refreshed");

        broadcaster.notify_local(notice);
        true
    }

    /// Consumes the shared channel until `shutdown` is cancelled
    pub async fn run(&self, shutdown: CancellationToken) {
        let Some(mut notices) = self.orchestrator.broadcaster().subscribe_remote() else {
            info!("No shared change channel configured, listener idle");
            return;
        };
        info!("Change listener starting");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                received = notices.recv() => match received {
                    Ok(notice) => {
                        self.handle(notice).await;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Change listener lagged, some notices were dropped");
                    }
                    Err(RecvError::Closed) => {
                        warn!("Shared change channel closed");
                        break;
                    }
                },
            }
        }

        info!("Change listener stopped");
    }
}
