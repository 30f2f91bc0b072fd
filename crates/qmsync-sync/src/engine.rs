//! Wiring of the sync components for one context
//!
//! [`SyncEngine`] owns one instance of every component and hands out shared
//! references to them. Hosts build it with [`SyncEngine::builder`], call
//! [`SyncEngine::hydrate`] for the tables they display and drive the
//! background loops with [`SyncEngine::run`].

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use qmsync_audit::SyncLogger;
use qmsync_cache::LocalStore;
use qmsync_core::config::Config;
use qmsync_core::domain::{
    newtypes::{TableKey, UserId},
    ContextId, Record, SyncFailure, SyncOutcome,
};
use qmsync_core::ports::{
    IChangeChannel, IDiagnosticsStore, INotificationService, IRemoteStore, StorageError,
};

use crate::broadcast::{ChangeListener, CrossContextBroadcaster};
use crate::connectivity::ConnectivityMonitor;
use crate::orchestrator::{LoadOptions, SyncOptions, SyncOrchestrator};
use crate::registry::SyncStateRegistry;
use crate::retry::RetryPolicy;
use crate::scheduler::AutoRetryScheduler;

/// Builder for [`SyncEngine`]
pub struct SyncEngineBuilder {
    config: Config,
    remote: Arc<dyn IRemoteStore>,
    store: Arc<LocalStore>,
    origin: ContextId,
    initial_online: Option<bool>,
    channel: Option<Arc<dyn IChangeChannel>>,
    diagnostics: Option<Arc<dyn IDiagnosticsStore>>,
    notifier: Option<Arc<dyn INotificationService>>,
    retry: Option<RetryPolicy>,
}

impl SyncEngineBuilder {
    /// Identity used for published change notices (random by default)
    pub fn origin(mut self, origin: ContextId) -> Self {
        self.origin = origin;
        self
    }

    /// Native online flag at start (`connectivity.start_online` by default)
    pub fn initial_online(mut self, online: bool) -> Self {
        self.initial_online = Some(online);
        self
    }

    /// Shared channel connecting this context to the others
    pub fn change_channel(mut self, channel: Arc<dyn IChangeChannel>) -> Self {
        self.channel = Some(channel);
        self
    }

    /// Persistent sink for the diagnostics log
    pub fn diagnostics_store(mut self, store: Arc<dyn IDiagnosticsStore>) -> Self {
        self.diagnostics = Some(store);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn INotificationService>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Overrides the retry policy derived from `sync`
    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn build(self) -> SyncEngine {
        let config = self.config;
        let registry = Arc::new(SyncStateRegistry::new());

        let mut connectivity = ConnectivityMonitor::new(
            self.initial_online
                .unwrap_or(config.connectivity.start_online),
            Arc::clone(&self.remote),
            Arc::clone(&registry),
            &config,
        );
        if let Some(notifier) = &self.notifier {
            connectivity = connectivity.with_notifier(Arc::clone(notifier));
        }
        let connectivity = Arc::new(connectivity);

        let broadcaster = Arc::new(CrossContextBroadcaster::new(self.origin, self.channel));

        let mut logger = SyncLogger::new(config.diagnostics.capacity);
        if config.diagnostics.persist {
            if let Some(sink) = self.diagnostics {
                logger = logger.with_sink(sink);
            }
        }
        let logger = Arc::new(logger);

        let mut orchestrator = SyncOrchestrator::new(
            self.remote,
            Arc::clone(&self.store),
            Arc::clone(&registry),
            Arc::clone(&connectivity),
            Arc::clone(&broadcaster),
            Arc::clone(&logger),
            &config.sync,
        );
        if let Some(notifier) = self.notifier {
            orchestrator = orchestrator.with_notifier(notifier);
        }
        if let Some(retry) = self.retry {
            orchestrator = orchestrator.with_retry_policy(retry);
        }
        let orchestrator = Arc::new(orchestrator);

        let scheduler = Arc::new(AutoRetryScheduler::new(
            Arc::clone(&orchestrator),
            &config.sync,
        ));
        let listener = Arc::new(ChangeListener::new(Arc::clone(&orchestrator)));

        info!(origin = %self.origin, "Sync engine ready");

        SyncEngine {
            origin: self.origin,
            orchestrator,
            scheduler,
            listener,
        }
    }
}

/// All sync components of one context
pub struct SyncEngine {
    origin: ContextId,
    orchestrator: Arc<SyncOrchestrator>,
    scheduler: Arc<AutoRetryScheduler>,
    listener: Arc<ChangeListener>,
}

impl SyncEngine {
    pub fn builder(
        config: Config,
        remote: Arc<dyn IRemoteStore>,
        store: Arc<LocalStore>,
    ) -> SyncEngineBuilder {
        SyncEngineBuilder {
            config,
            remote,
            store,
            origin: ContextId::new(),
            initial_online: None,
            channel: None,
            diagnostics: None,
            notifier: None,
            retry: None,
        }
    }

    pub fn origin(&self) -> ContextId {
        self.origin
    }

    pub fn orchestrator(&self) -> &Arc<SyncOrchestrator> {
        &self.orchestrator
    }

    pub fn scheduler(&self) -> &Arc<AutoRetryScheduler> {
        &self.scheduler
    }

    pub fn listener(&self) -> &Arc<ChangeListener> {
        &self.listener
    }

    pub fn registry(&self) -> &Arc<SyncStateRegistry> {
        self.orchestrator.registry()
    }

    pub fn store(&self) -> &Arc<LocalStore> {
        self.orchestrator.store()
    }

    pub fn connectivity(&self) -> &Arc<ConnectivityMonitor> {
        self.orchestrator.connectivity()
    }

    pub fn broadcaster(&self) -> &Arc<CrossContextBroadcaster> {
        self.orchestrator.broadcaster()
    }

    pub fn logger(&self) -> &Arc<SyncLogger> {
        self.orchestrator.logger()
    }

    /// Registers `keys` for background retry and loads them from the server
    pub async fn hydrate(&self, keys: &[TableKey]) {
        for key in keys {
            self.scheduler.register(key.clone());
            let records = self
                .orchestrator
                .load_from_server(key, &LoadOptions::default())
                .await;
            info!(key = %key, records = records.len(), "Table hydrated");
        }
    }

    /// Stores a local edit and schedules it for synchronization
    pub async fn edit(&self, key: &TableKey, records: Vec<Record>) -> Result<(), StorageError> {
        self.scheduler.register(key.clone());
        let result = self.orchestrator.record_local_change(key, records).await;
        self.scheduler.nudge();
        result
    }

    /// Forgets every table of `user`: local data, state, diagnostics and
    /// background retry
    pub async fn reset_user(&self, user: &UserId) -> Result<u64, StorageError> {
        for key in self.scheduler.registered() {
            if key.user() == user {
                self.scheduler.unregister(&key);
            }
        }
        self.orchestrator.reset_local_data(user).await
    }

    /// Synchronizes the current local copy of `key` now
    pub async fn sync_now(&self, key: &TableKey) -> Result<SyncOutcome, SyncFailure> {
        let records = self.store().get(key).await;
        self.orchestrator
            .sync_with_server(key, records, SyncOptions::default())
            .await
    }

    /// Runs the probe loop, the retry scheduler and the change listener
    /// until `shutdown` is cancelled
    pub async fn run(&self, shutdown: CancellationToken) {
        tokio::join!(
            self.connectivity().run(shutdown.clone()),
            self.scheduler.run(shutdown.clone()),
            self.listener.run(shutdown.clone()),
        );
        info!("Sync engine stopped");
    }
}
