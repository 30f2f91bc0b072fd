//! Domain entities and business logic
//!
//! This module contains the core domain types for QMSync:
//! - Newtypes for validated table names, user ids and their composite key
//! - Per-table synchronization state and its event-driven state machine
//! - Cross-context change notices
//! - Caller-facing sync outcomes and the failure taxonomy
//! - Diagnostics log entries

pub mod change;
pub mod diagnostics;
pub mod errors;
pub mod newtypes;
pub mod outcome;
pub mod sync_state;

/// A single opaque record of a table, as exchanged with the server
///
/// The engine never inspects records beyond serializing them; identity
/// (typically an `id` field) is owned by the callers.
pub type Record = serde_json::Value;

// Re-export commonly used types
pub use change::ChangeNotice;
pub use diagnostics::{SyncLogAction, SyncLogEntry};
pub use errors::DomainError;
pub use newtypes::{ContextId, TableKey, TableName, UserId};
pub use outcome::{SyncFailure, SyncOutcome};
pub use sync_state::{SyncEvent, SyncState, Transition};
