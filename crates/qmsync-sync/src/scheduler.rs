//! Background retry of pending local changes
//!
//! [`AutoRetryScheduler`] periodically walks the registered tables and
//! re-runs [`SyncOrchestrator::sync_with_server`] for every table that
//!
//! - has `pending_changes`,
//! - is not already syncing,
//! - was last attempted longer than `min_retry_spacing` ago,
//!
//! while the device is online. A `Restored` connectivity event triggers an
//! immediate catch-up pass.
//!
//! ## Flow
//!
//! ```text
//! interval tick ─────────┐
//! request_sync() ────────┼──→ run_pass() ──→ sync_with_server(local records)
//! ConnectivityEvent::Restored ┘
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Notify;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use qmsync_core::config::SyncConfig;
use qmsync_core::domain::{newtypes::TableKey, SyncFailure};

use crate::connectivity::ConnectivityEvent;
use crate::orchestrator::{SyncOptions, SyncOrchestrator};

/// Re-syncs tables whose local changes have not reached the server yet
pub struct AutoRetryScheduler {
    orchestrator: Arc<SyncOrchestrator>,
    /// Registered tables and the time of their last attempt
    tables: DashMap<TableKey, Option<Instant>>,
    interval: Duration,
    min_spacing: Duration,
    /// Set by `request_sync`; the next pass ignores the spacing
    sync_requested: AtomicBool,
    wake: Notify,
}

impl AutoRetryScheduler {
    pub fn new(orchestrator: Arc<SyncOrchestrator>, config: &SyncConfig) -> Self {
        info!(
            interval_secs = config.auto_retry_interval_secs,
            spacing_secs = config.min_retry_spacing_secs,
            "Creating auto-retry scheduler"
        );
        Self {
            orchestrator,
            tables: DashMap::new(),
            interval: config.auto_retry_interval(),
            min_spacing: config.min_retry_spacing(),
            sync_requested: AtomicBool::new(false),
            wake: Notify::new(),
        }
    }

    /// Starts watching `key`
    pub fn register(&self, key: TableKey) {
        self.tables.entry(key).or_insert(None);
    }

    /// Stops watching `key`
    pub fn unregister(&self, key: &TableKey) {
        self.tables.remove(key);
    }

    /// Registered tables, sorted
    pub fn registered(&self) -> Vec<TableKey> {
        let mut keys: Vec<_> = self.tables.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    /// Requests an immediate pass that ignores the retry spacing
    pub fn request_sync(&self) {
        info!("Immediate sync requested");
        self.sync_requested.store(true, Ordering::Release);
        self.wake.notify_one();
    }

    /// Wakes the loop for a regular pass (spacing still applies)
    pub fn nudge(&self) {
        self.wake.notify_one();
    }

    /// Syncs every due table once; returns the number of successful syncs
    pub async fn run_pass(&self, force: bool) -> usize {
        let connectivity = self.orchestrator.connectivity();
        if !connectivity.is_online() {
            debug!("Offline, skipping retry pass");
            return 0;
        }

        let registry = self.orchestrator.registry();
        let now = Instant::now();
        let due: Vec<TableKey> = self
            .tables
            .iter()
            .filter(|entry| {
                let state = registry.state(entry.key());
                let spaced = match *entry.value() {
                    Some(last) => now.duration_since(last) >= self.min_spacing,
                    None => true,
                };
                state.pending_changes() && !state.is_syncing() && (force || spaced)
            })
            .map(|entry| entry.key().clone())
            .collect();

        if due.is_empty() {
            return 0;
        }
        debug!(count = due.len(), force, "Retrying pending tables");

        let mut synced = 0;
        for key in due {
            if let Some(mut last) = self.tables.get_mut(&key) {
                *last = Some(Instant::now());
            }

            let records = self.orchestrator.store().get(&key).await;
            match self
                .orchestrator
                .sync_with_server(&key, records, SyncOptions::default())
                .await
            {
                Ok(outcome) if outcome.is_synced() => synced += 1,
                Ok(_) => {}
                Err(SyncFailure::Offline) => {
                    debug!("Connection lost during retry pass");
                    break;
                }
                Err(e) => debug!(key = %key, error = %e, "Retry did not succeed"),
            }
        }
        synced
    }

    /// Runs passes until `shutdown` is cancelled
    pub async fn run(&self, shutdown: CancellationToken) {
        info!("Auto-retry scheduler starting");
        let mut timer = tokio::time::interval(self.interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut events = self.orchestrator.connectivity().subscribe();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,

                _ = timer.tick() => {
                    let force = self.sync_requested.swap(false, Ordering::AcqRel);
                    self.run_pass(force).await;
                }

                _ = self.wake.notified() => {
                    let force = self.sync_requested.swap(false, Ordering::AcqRel);
                    self.run_pass(force).await;
                }

                event = events.recv() => match event {
                    Ok(ConnectivityEvent::Restored) => {
                        info!("Connectivity restored, catching up");
                        self.run_pass(true).await;
                    }
                    Ok(ConnectivityEvent::Lost) => {}
                    Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => {
                        warn!("Connectivity events closed");
                        break;
                    }
                },
            }
        }

        info!("Auto-retry scheduler stopped");
    }
}
