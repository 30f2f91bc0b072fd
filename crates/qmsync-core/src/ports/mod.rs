//! Port definitions (hexagonal architecture interfaces)
//!
//! Ports are the interfaces the sync engine depends on; their
//! implementations live in adapter crates.
//!
//! ## Ports Overview
//!
//! - [`IRemoteStore`] - Push/pull/probe against the table endpoints
//! - [`IRecordStore`] - Durable per-(table, user) record persistence
//! - [`IChangeChannel`] - Transport for cross-context change notices
//! - [`IDiagnosticsStore`] - Persistent sink for the diagnostics log
//! - [`INotificationService`] - User-facing status notifications

pub mod change_channel;
pub mod diagnostics_store;
pub mod notification;
pub mod record_store;
pub mod remote_store;

pub use change_channel::IChangeChannel;
pub use diagnostics_store::IDiagnosticsStore;
pub use notification::{INotificationService, Notification, NotificationPriority};
pub use record_store::{IRecordStore, StorageError};
pub use remote_store::{FormatError, IRemoteStore, PullPayload, PushAck, RemoteError};
