//! Connectivity detection
//!
//! [`ConnectivityMonitor`] combines two signals:
//!
//! - the **native** online flag reported by the host
//!   ([`ConnectivityMonitor::report_network_change`]), which is the sole
//!   source of truth for "may we attempt network I/O now";
//! - periodic **probes** of a cheap server endpoint, which only refine the
//!   reported [`ConnectivityStatus`]. A failed probe never flips the monitor
//!   offline while the native flag says online, and a successful probe never
//!   overrides a native offline.
//!
//! Transitions are broadcast as [`ConnectivityEvent`]s and shown to the user
//! through the optional notification service. Coming back online also
//! releases sync guards that were abandoned when the connection dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use qmsync_core::config::Config;
use qmsync_core::ports::{INotificationService, IRemoteStore, Notification, RemoteError};

use crate::registry::SyncStateRegistry;

/// Capacity of the connectivity event channel
const EVENT_CAPACITY: usize = 16;

/// Connectivity transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
    /// Network I/O became possible again
    Restored,
    /// Network I/O is no longer possible
    Lost,
}

/// Result of the most recent probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerReachability {
    /// No probe has completed yet
    Unknown,
    Reachable,
    Unreachable,
}

/// Combined connectivity status for display
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityStatus {
    /// The native flag reports no network
    Offline,
    /// Online and the last probe succeeded
    Online,
    /// Online, no probe has completed yet
    OnlineUnverified,
    /// Online, but the last probe failed
    ServerUnreachable,
}

impl std::fmt::Display for ConnectivityStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectivityStatus::Offline => "offline",
            ConnectivityStatus::Online => "online",
            ConnectivityStatus::OnlineUnverified => "online (unverified)",
            ConnectivityStatus::ServerUnreachable => "server unreachable",
        };
        write!(f, "{}", s)
    }
}

/// Online/offline state from native events and periodic probes
pub struct ConnectivityMonitor {
    native_online: AtomicBool,
    reachability: RwLock<ServerReachability>,
    remote: Arc<dyn IRemoteStore>,
    registry: Arc<SyncStateRegistry>,
    notifier: Option<Arc<dyn INotificationService>>,
    events: broadcast::Sender<ConnectivityEvent>,
    probe_interval: Duration,
    probe_timeout: Duration,
    stale_guard: Duration,
}

impl ConnectivityMonitor {
    /// Creates a monitor whose native flag starts at `initial_online`
    pub fn new(
        initial_online: bool,
        remote: Arc<dyn IRemoteStore>,
        registry: Arc<SyncStateRegistry>,
        config: &Config,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            native_online: AtomicBool::new(initial_online),
            reachability: RwLock::new(ServerReachability::Unknown),
            remote,
            registry,
            notifier: None,
            events,
            probe_interval: config.connectivity.probe_interval(),
            probe_timeout: config.server.probe_timeout(),
            stale_guard: config.sync.stale_guard(),
        }
    }

    /// Sends user-facing notifications on transitions
    pub fn with_notifier(mut self, notifier: Arc<dyn INotificationService>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// True if network I/O may be attempted
    pub fn is_online(&self) -> bool {
        self.native_online.load(Ordering::Acquire)
    }

    pub fn reachability(&self) -> ServerReachability {
        self.reachability
            .read()
            .map(|r| *r)
            .unwrap_or(ServerReachability::Unknown)
    }

    pub fn status(&self) -> ConnectivityStatus {
        if !self.is_online() {
            return ConnectivityStatus::Offline;
        }
        match self.reachability() {
            ServerReachability::Unknown => ConnectivityStatus::OnlineUnverified,
            ServerReachability::Reachable => ConnectivityStatus::Online,
            ServerReachability::Unreachable => ConnectivityStatus::ServerUnreachable,
        }
    }

    /// Receiver of connectivity transitions
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectivityEvent> {
        self.events.subscribe()
    }

    /// Native online/offline transition reported by the host
    ///
    /// Takes effect immediately. Repeating the current value does nothing.
    pub async fn report_network_change(&self, online: bool) {
        let previous = self.native_online.swap(online, Ordering::AcqRel);
        if previous == online {
            return;
        }

        if online {
            info!("Network connection restored");
            self.on_restored().await;
        } else {
            info!("Network connection lost");
            let _ = self.events.send(ConnectivityEvent::Lost);
            self.notify(Notification::connectivity_lost()).await;
        }
    }

    /// Probes the server once and returns the current online flag
    ///
    /// Never fails: probe errors only update the reachability.
    pub async fn probe_now(&self) -> bool {
        let result = match tokio::time::timeout(self.probe_timeout, self.remote.probe()).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Timeout),
        };

        let reachability = match &result {
            Ok(()) => ServerReachability::Reachable,
            Err(e) => {
                debug!(error = %e, "Connectivity probe failed");
                ServerReachability::Unreachable
            }
        };

        let previous = match self.reachability.write() {
            Ok(mut current) => std::mem::replace(&mut *current, reachability),
            Err(_) => ServerReachability::Unknown,
        };

        if previous != reachability {
            info!(?previous, current = ?reachability, "Server reachability changed");
            if previous == ServerReachability::Unreachable
                && reachability == ServerReachability::Reachable
                && self.is_online()
            {
                self.on_restored().await;
            }
        }

        self.is_online()
    }

    /// Probes periodically until `shutdown` is cancelled
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.probe_interval.as_secs(),
            "Connectivity monitor starting"
        );
        let mut timer = tokio::time::interval(self.probe_interval);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = timer.tick() => {
                    if self.is_online() {
                        self.probe_now().await;
                    }
                }
            }
        }

        info!("Connectivity monitor stopped");
    }

    async fn on_restored(&self) {
        let released = self.registry.clear_stale_guards(self.stale_guard);
        if !released.is_empty() {
            warn!(count = released.len(), "Released sync guards abandoned while offline");
        }
        let _ = self.events.send(ConnectivityEvent::Restored);
        self.notify(Notification::connectivity_restored()).await;
    }

    async fn notify(&self, notification: Notification) {
        if let Some(notifier) = &self.notifier {
            if let Err(e) = notifier.notify(&notification).await {
                warn!(error = %e, "Failed to send notification");
            }
        }
    }
}
