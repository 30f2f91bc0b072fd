//! Remote store port (driven/secondary port)
//!
//! This module defines the interface to the server-side table endpoints:
//! a whole-table push, a whole-table pull, and a cheap connectivity probe.
//!
//! ## Design Notes
//!
//! - Unlike the storage ports, errors here are classified at the port
//!   boundary ([`RemoteError`]) because the orchestrator's retry and
//!   reporting policy depends on the class.
//! - Pull responses come in two shapes (a flat array, or an object keyed by
//!   the table name). [`PullPayload::normalize`] is the single place where
//!   that ambiguity is resolved.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::domain::{newtypes::TableKey, Record, TableName};

// ============================================================================
// Errors
// ============================================================================

/// The response body is not a usable API response
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    /// The body is markup or script source (e.g. an unexecuted PHP file or
    /// an HTML error page) instead of JSON
    #[error("server returned markup instead of JSON (starts with {0:?})")]
    Markup(String),

    /// The body is not valid JSON
    #[error("malformed JSON: {0}")]
    InvalidJson(String),

    /// The JSON is valid but does not have the expected shape
    #[error("unexpected response shape: {0}")]
    UnexpectedShape(String),
}

/// Errors returned by remote store adapters
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// The request could not be sent or the connection failed
    #[error("transport failure: {0}")]
    Transport(String),

    /// The request did not complete within its timeout
    #[error("request timed out")]
    Timeout,

    /// The server answered with a non-success HTTP status
    #[error("HTTP {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body (possibly truncated)
        body: String,
    },

    /// The response body failed validation
    #[error("{0}")]
    Format(#[from] FormatError),

    /// The server answered `success: false`
    #[error("{0}")]
    Application(String),
}

impl RemoteError {
    /// Returns true if repeating the identical request may succeed
    ///
    /// Connection failures, timeouts, 408, 429 and 5xx are retryable.
    /// Format and application failures are not: the server would answer
    /// the same thing again.
    pub fn is_retryable(&self) -> bool {
        match self {
            RemoteError::Transport(_) | RemoteError::Timeout => true,
            RemoteError::Status { status, .. } => {
                *status == 408 || *status == 429 || (500..=599).contains(status)
            }
            RemoteError::Format(_) | RemoteError::Application(_) => false,
        }
    }
}

// ============================================================================
// DTOs
// ============================================================================

/// Acknowledgement of a successful push
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushAck {
    /// Optional informational message from the server
    pub message: Option<String>,
    /// Server-side time at which the table was stored, when provided
    pub timestamp: Option<DateTime<Utc>>,
}

/// Normalized result of a pull
#[derive(Debug, Clone, PartialEq)]
pub enum PullPayload {
    /// The server returned a bare JSON array of records
    Flat(Vec<Record>),
    /// The server returned `{ "<table>": [...] }`, possibly with a timestamp
    Nested {
        /// Table key found in the response
        table: TableName,
        /// Records found under that key
        records: Vec<Record>,
        /// Server-side time of the data, when provided
        timestamp: Option<DateTime<Utc>>,
    },
}

impl PullPayload {
    /// Resolves a decoded pull response into one of the two accepted shapes
    ///
    /// - a JSON array → [`PullPayload::Flat`]
    /// - an object with an array under the table's name → [`PullPayload::Nested`]
    ///   (an optional `timestamp` / `lastSynced` RFC 3339 field is kept)
    /// - an object with `"success": false` → [`RemoteError::Application`]
    /// - anything else → [`FormatError::UnexpectedShape`]
    pub fn normalize(table: &TableName, value: Value) -> Result<Self, RemoteError> {
        match value {
            Value::Array(records) => Ok(PullPayload::Flat(records)),
            Value::Object(mut map) => {
                if map.get("success") == Some(&Value::Bool(false)) {
                    let message = map
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("server reported failure")
                        .to_string();
                    return Err(RemoteError::Application(message));
                }

                let timestamp = extract_timestamp(&map);
                match map.remove(table.as_str()) {
                    Some(Value::Array(records)) => Ok(PullPayload::Nested {
                        table: table.clone(),
                        records,
                        timestamp,
                    }),
                    Some(other) => Err(FormatError::UnexpectedShape(format!(
                        "'{}' is a {} instead of an array",
                        table,
                        json_type_name(&other)
                    ))
                    .into()),
                    None => Err(FormatError::UnexpectedShape(format!(
                        "object has no '{}' array",
                        table
                    ))
                    .into()),
                }
            }
            other => Err(FormatError::UnexpectedShape(format!(
                "expected array or object, got {}",
                json_type_name(&other)
            ))
            .into()),
        }
    }

    /// Borrows the records regardless of the shape
    pub fn records(&self) -> &[Record] {
        match self {
            PullPayload::Flat(records) => records,
            PullPayload::Nested { records, .. } => records,
        }
    }

    /// Consumes the payload and returns the records
    pub fn into_records(self) -> Vec<Record> {
        match self {
            PullPayload::Flat(records) => records,
            PullPayload::Nested { records, .. } => records,
        }
    }

    /// Server-side time of the data, when the response carried one
    pub fn server_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            PullPayload::Flat(_) => None,
            PullPayload::Nested { timestamp, .. } => *timestamp,
        }
    }
}

fn extract_timestamp(map: &Map<String, Value>) -> Option<DateTime<Utc>> {
    ["timestamp", "lastSynced"]
        .iter()
        .filter_map(|field| map.get(*field).and_then(Value::as_str))
        .find_map(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ============================================================================
// IRemoteStore trait
// ============================================================================

/// Port trait for the server-side table endpoints
///
/// ## Implementation Notes
///
/// - `push` sends the complete record set (whole-table replace), plus any
///   related collections, and resolves once the server acknowledged it.
/// - `pull` returns the server's canonical copy, already normalized.
/// - `probe` must be cheap; it is called periodically.
/// - Implementations apply their own timeouts and report them as
///   [`RemoteError::Timeout`]. Retrying is the caller's job.
#[async_trait::async_trait]
pub trait IRemoteStore: Send + Sync {
    /// Replaces the server copy of a table with `records`
    async fn push(
        &self,
        key: &TableKey,
        records: &[Record],
        related: &Map<String, Value>,
    ) -> Result<PushAck, RemoteError>;

    /// Fetches the server copy of a table
    async fn pull(&self, key: &TableKey) -> Result<PullPayload, RemoteError>;

    /// Checks that the server is reachable
    async fn probe(&self) -> Result<(), RemoteError>;
}
