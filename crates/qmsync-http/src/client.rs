//! HTTP adapter for the table endpoints
//!
//! Implements [`IRemoteStore`] on top of `reqwest`:
//!
//! | Operation | Request                                  | Timeout                |
//! |-----------|------------------------------------------|------------------------|
//! | push      | `POST {base}/{table}-sync`, JSON body     | `request_timeout_secs` |
//! | pull      | `GET {base}/{table}-load?userId=<user>`  | `request_timeout_secs` |
//! | probe     | `GET {base}/ping`                         | `probe_timeout_secs`   |
//!
//! ## Usage
//!
//! ```rust,no_run
//! use qmsync_core::config::ServerConfig;
//! use qmsync_http::HttpRemoteStore;
//!
//! # fn example() -> Result<(), qmsync_http::HttpError> {
//! let store = HttpRemoteStore::new(&ServerConfig::default())?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use reqwest::{header::CONTENT_TYPE, Client, RequestBuilder};
use serde_json::{Map, Value};
use tracing::{debug, warn};
use url::Url;

use qmsync_core::config::ServerConfig;
use qmsync_core::domain::{newtypes::TableKey, Record};
use qmsync_core::ports::{IRemoteStore, PullPayload, PushAck, RemoteError};

use crate::response::{classify_body, normalize_pull, parse_push_ack, snippet};
use crate::HttpError;

/// Placeholder replaced by the table name in endpoint templates
const TABLE_PLACEHOLDER: &str = "{table}";

/// Status body characters kept in [`RemoteError::Status`]
const STATUS_BODY_LEN: usize = 200;

/// `reqwest`-based implementation of the remote store port
#[derive(Debug, Clone)]
pub struct HttpRemoteStore {
    client: Client,
    base_url: String,
    push_path: String,
    pull_path: String,
    probe_path: String,
    request_timeout: Duration,
    probe_timeout: Duration,
}

impl HttpRemoteStore {
    /// Creates a store from the `server` configuration section
    pub fn new(config: &ServerConfig) -> Result<Self, HttpError> {
        let base = Url::parse(&config.base_url)
            .map_err(|e| HttpError::InvalidBaseUrl(format!("{}: {}", config.base_url, e)))?;
        if base.cannot_be_a_base() {
            return Err(HttpError::InvalidBaseUrl(config.base_url.clone()));
        }

        let client = Client::builder()
            .user_agent(concat!("qmsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| HttpError::ClientBuild(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            push_path: config.push_path.clone(),
            pull_path: config.pull_path.clone(),
            probe_path: config.probe_path.clone(),
            request_timeout: config.request_timeout(),
            probe_timeout: config.probe_timeout(),
        })
    }

    /// Creates a store with default endpoint templates against `base_url` (useful for testing)
    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, HttpError> {
        Self::new(&ServerConfig {
            base_url: base_url.into(),
            ..ServerConfig::default()
        })
    }

    /// Overrides the request and probe timeouts
    pub fn with_timeouts(mut self, request: Duration, probe: Duration) -> Self {
        self.request_timeout = request;
        self.probe_timeout = probe;
        self
    }

    /// Resolves an endpoint template for `table` into a full URL
    pub fn endpoint(&self, template: &str, table: &str) -> Result<Url, RemoteError> {
        let path = template.replace(TABLE_PLACEHOLDER, table);
        let raw = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        Url::parse(&raw).map_err(|e| RemoteError::Transport(format!("invalid URL {raw}: {e}")))
    }

    /// Sends a request and returns the validated JSON body
    async fn execute(&self, request: RequestBuilder, timeout: Duration) -> Result<Value, RemoteError> {
        let response = request
            .timeout(timeout)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await.map_err(map_reqwest_error)?;

        if !status.is_success() {
            warn!(status = status.as_u16(), body = %snippet(&body), "Server returned error status");
            return Err(RemoteError::Status {
                status: status.as_u16(),
                body: body.chars().take(STATUS_BODY_LEN).collect(),
            });
        }

        classify_body(content_type.as_deref(), &body).map_err(|e| {
            warn!(error = %e, "Server response failed validation");
            RemoteError::Format(e)
        })
    }
}

fn map_reqwest_error(e: reqwest::Error) -> RemoteError {
    if e.is_timeout() {
        RemoteError::Timeout
    } else {
        RemoteError::Transport(e.to_string())
    }
}

/// Builds the push body: `{userId, <table>: [...], ...related}`
///
/// `userId` and the table key always win over same-named related entries.
fn push_body(key: &TableKey, records: &[Record], related: &Map<String, Value>) -> Value {
    let mut body = related.clone();
    body.insert("userId".to_string(), Value::String(key.user().to_string()));
    body.insert(key.table().to_string(), Value::Array(records.to_vec()));
    Value::Object(body)
}

#[async_trait::async_trait]
impl IRemoteStore for HttpRemoteStore {
    async fn push(
        &self,
        key: &TableKey,
        records: &[Record],
        related: &Map<String, Value>,
    ) -> Result<PushAck, RemoteError> {
        let url = self.endpoint(&self.push_path, key.table().as_str())?;
        debug!(%url, count = records.len(), "Pushing table");

        let request = self.client.post(url).json(&push_body(key, records, related));
        let value = self.execute(request, self.request_timeout).await?;
        parse_push_ack(value)
    }

    async fn pull(&self, key: &TableKey) -> Result<PullPayload, RemoteError> {
        let mut url = self.endpoint(&self.pull_path, key.table().as_str())?;
        url.query_pairs_mut().append_pair("userId", key.user().as_str());
        debug!(%url, "Pulling table");

        let value = self
            .execute(self.client.get(url), self.request_timeout)
            .await?;
        normalize_pull(key.table(), value)
    }

    async fn probe(&self) -> Result<(), RemoteError> {
        let raw = format!("{}/{}", self.base_url, self.probe_path.trim_start_matches('/'));
        let response = self
            .client
            .get(&raw)
            .timeout(self.probe_timeout)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(RemoteError::Status {
                status: status.as_u16(),
                body: String::new(),
            })
        }
    }
}
