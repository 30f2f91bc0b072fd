//! Integration tests for qmsync-sync
//!
//! Engines run against an in-memory SQLite store and either a scripted
//! remote (for timing and failure control) or a wiremock server behind the
//! real HTTP adapter.

mod common;

mod test_broadcast;
mod test_orchestrator;
mod test_scheduler;
mod test_storage;
