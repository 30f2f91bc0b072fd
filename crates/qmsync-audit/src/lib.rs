//! QMSync Audit - Diagnostics log
//!
//! Provides:
//! - `SyncLogger`: bounded per-table ring buffer of synchronization actions
//! - Optional mirroring into an `IDiagnosticsStore` so entries survive restarts
//!
//! The log is observational only. Nothing in it influences synchronization,
//! and failures to persist it are never propagated.

pub mod logger;

pub use logger::SyncLogger;
