//! QMSync Core - Domain types and port definitions
//!
//! This crate contains the hexagonal architecture core of the table
//! synchronization engine:
//! - **Domain types** - `TableName`, `UserId`, `TableKey`, `SyncState`, `ChangeNotice`
//! - **Port definitions** - Traits for adapters: `IRemoteStore`, `IRecordStore`,
//!   `IChangeChannel`, `IDiagnosticsStore`, `INotificationService`
//! - **Configuration** - YAML-backed `Config` with validation and a builder
//!
//! # Architecture
//!
//! The domain module is pure data and state logic with no I/O.
//! Ports define the trait interfaces that adapter crates (`qmsync-cache`,
//! `qmsync-http`) implement, and that `qmsync-sync` consumes.

pub mod config;
pub mod domain;
pub mod ports;
