//! QMSync HTTP - Remote store adapter
//!
//! Implements the `IRemoteStore` port from `qmsync-core` against the
//! `<table>-sync` / `<table>-load` / `ping` endpoints.
//!
//! - [`HttpRemoteStore`] - `reqwest` client with per-request timeouts
//! - [`response`] - body validation (markup detection, JSON decoding) and
//!   push/pull response interpretation

pub mod client;
pub mod response;

pub use client::HttpRemoteStore;

/// Errors raised while constructing the HTTP adapter
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    /// `server.base_url` is not an absolute http(s) URL
    #[error("Invalid base URL: {0}")]
    InvalidBaseUrl(String),

    /// The underlying `reqwest` client could not be created
    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(String),
}
