//! QMSync Daemon - Background table synchronization
//!
//! Keeps the local copies of a user's tables in sync with the server:
//! - Hydrates the registered tables on start
//! - Probes the server periodically
//! - Retries pending local changes in the background
//! - Refreshes tables changed by other processes sharing the database
//! - Graceful shutdown on SIGTERM/SIGINT
//!
//! On Unix, `SIGUSR1` / `SIGUSR2` report the network as up / down, so a
//! network manager hook can feed the native connectivity signal.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use qmsync_cache::{DatabasePool, LocalStore, SqliteMarkerChannel, SqliteRecordStore};
use qmsync_core::config::{Config, LoggingConfig};
use qmsync_core::domain::{newtypes::TableKey, ContextId};
use qmsync_core::ports::{INotificationService, Notification, NotificationPriority};
use qmsync_http::HttpRemoteStore;
use qmsync_sync::{ConnectivityMonitor, SyncEngine, SyncStateRegistry};

#[derive(Debug, Parser)]
#[command(name = "qmsyncd", version, about = "Offline-first table synchronization daemon")]
struct Cli {
    /// Use alternate config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// User whose tables are synchronized
    #[arg(long)]
    user: String,

    /// Table to keep in sync (repeatable)
    #[arg(long = "table", required = true)]
    tables: Vec<String>,

    /// Start with the network reported as down
    #[arg(long)]
    offline: bool,
}

impl Cli {
    fn keys(&self) -> Result<Vec<TableKey>> {
        self.tables
            .iter()
            .map(|table| {
                TableKey::parse(table, &self.user)
                    .with_context(|| format!("Invalid table '{}' for user '{}'", table, self.user))
            })
            .collect()
    }

    fn load_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?,
            None => Config::load_or_default(&Config::default_path()),
        };
        if self.offline {
            config.connectivity.start_online = false;
        }

        let errors = config.validate();
        if !errors.is_empty() {
            let details: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            anyhow::bail!("Invalid configuration: {}", details.join("; "));
        }
        Ok(config)
    }
}

// ============================================================================
// Notifications
// ============================================================================

/// Writes user-facing notifications to the log
struct LogNotifier;

#[async_trait::async_trait]
impl INotificationService for LogNotifier {
    async fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
        match notification.priority {
            NotificationPriority::High => warn!(
                category = %notification.category,
                "{}: {}",
                notification.title,
                notification.body
            ),
            _ => info!(
                category = %notification.category,
                "{}: {}",
                notification.title,
                notification.body
            ),
        }
        Ok(())
    }
}

// ============================================================================
// Signals
// ============================================================================

/// Waits for SIGTERM or SIGINT and cancels `token`
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT (Ctrl+C)"),
        _ = terminate => info!("Received SIGTERM"),
    }

    token.cancel();
}

/// Maps SIGUSR1 / SIGUSR2 to network up / down
#[cfg(unix)]
async fn network_signals(connectivity: Arc<ConnectivityMonitor>, shutdown: CancellationToken) {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut up, mut down) = match (
        signal(SignalKind::user_defined1()),
        signal(SignalKind::user_defined2()),
    ) {
        (Ok(up), Ok(down)) => (up, down),
        (Err(e), _) | (_, Err(e)) => {
            warn!(error = %e, "Network signals unavailable");
            return;
        }
    };

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = up.recv() => connectivity.report_network_change(true).await,
            _ = down.recv() => connectivity.report_network_change(false).await,
        }
    }
}

#[cfg(not(unix))]
async fn network_signals(_connectivity: Arc<ConnectivityMonitor>, _shutdown: CancellationToken) {}

/// Logs the state of every table after each change
async fn report_states(registry: Arc<SyncStateRegistry>, shutdown: CancellationToken) {
    let mut versions = registry.watch();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            changed = versions.changed() => {
                if changed.is_err() {
                    break;
                }
                for (key, state) in registry.snapshot() {
                    debug!(
                        key = %key,
                        syncing = state.is_syncing(),
                        pending = state.pending_changes(),
                        last_synced = ?state.last_synced(),
                        last_error = state.last_error().unwrap_or(""),
                        "Table state"
                    );
                }
            }
        }
    }
}

// ============================================================================
// Entry point
// ============================================================================

fn init_tracing(logging: &LoggingConfig) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    if logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}

async fn run(cli: Cli, config: Config, shutdown: CancellationToken) -> Result<()> {
    let keys = cli.keys()?;

    let db_path = &config.storage.database_path;
    if let Some(parent) = db_path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let pool = DatabasePool::with_quota(db_path, config.storage.max_size_mb)
        .await
        .context("Failed to open database")?;
    info!(path = %db_path.display(), "Database opened");

    let backend = Arc::new(SqliteRecordStore::new(pool.pool().clone()));
    let store = Arc::new(LocalStore::new(backend.clone()));
    let remote = Arc::new(HttpRemoteStore::new(&config.server)?);

    let origin = ContextId::new();
    let markers = Arc::new(
        SqliteMarkerChannel::new(
            pool.pool().clone(),
            origin,
            config.storage.marker_poll_interval(),
        )
        .await
        .context("Failed to open change channel")?,
    );

    let engine = SyncEngine::builder(config, remote, store)
        .origin(origin)
        .change_channel(markers.clone())
        .diagnostics_store(backend)
        .notifier(Arc::new(LogNotifier))
        .build();

    let online = engine.connectivity().probe_now().await;
    info!(
        origin = %origin,
        online,
        status = %engine.connectivity().status(),
        tables = keys.len(),
        "Starting synchronization"
    );
    engine.hydrate(&keys).await;

    tokio::join!(
        engine.run(shutdown.clone()),
        markers.run(shutdown.clone()),
        network_signals(Arc::clone(engine.connectivity()), shutdown.clone()),
        report_states(Arc::clone(engine.registry()), shutdown.clone()),
    );

    for entry in engine.logger().recent(10) {
        debug!(key = %entry.key, action = %entry.action, detail = ?entry.detail, "Recent sync log");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.load_config()?;
    init_tracing(&config.logging);

    info!("QMSync daemon starting (qmsyncd)");

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal(signal_token).await;
    });

    let result = run(cli, config, shutdown).await;
    match &result {
        Ok(()) => info!("QMSync daemon shut down gracefully"),
        Err(e) => error!(error = %e, "QMSync daemon exiting with error"),
    }
    result
}
