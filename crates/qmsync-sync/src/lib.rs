//! QMSync Sync - Optimistic table synchronization engine
//!
//! Provides:
//! - Connectivity detection from native events and periodic probes
//! - A per-table state registry with an in-progress guard
//! - Push/pull cycles with bounded retry and stale-response protection
//! - Background retry of pending local changes
//! - Cross-context change notification
//!
//! ## Modules
//!
//! - [`connectivity`] - Online/offline state and probing
//! - [`registry`] - Shared per-table sync state
//! - [`orchestrator`] - Sync cycle, initial load, local mutations
//! - [`retry`] - Retry policy for remote calls
//! - [`scheduler`] - Timer-driven retry of pending changes
//! - [`broadcast`] - Change notices between contexts
//! - [`engine`] - Wiring of all of the above

pub mod broadcast;
pub mod connectivity;
pub mod engine;
pub mod orchestrator;
pub mod registry;
pub mod retry;
pub mod scheduler;

pub use broadcast::{ChangeListener, CrossContextBroadcaster, InMemoryChangeChannel};
pub use connectivity::{
    ConnectivityEvent, ConnectivityMonitor, ConnectivityStatus, ServerReachability,
};
pub use engine::{SyncEngine, SyncEngineBuilder};
pub use orchestrator::{LoadOptions, SyncOptions, SyncOrchestrator};
pub use registry::SyncStateRegistry;
pub use retry::{Backoff, RetryPolicy};
pub use scheduler::AutoRetryScheduler;
