//! Configuration module for QMSync.
//!
//! Provides typed configuration structs that map to the YAML configuration file,
//! with loading, validation, defaults, and a builder pattern for programmatic use.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for QMSync.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub sync: SyncConfig,
    pub connectivity: ConnectivityConfig,
    pub storage: StorageConfig,
    pub diagnostics: DiagnosticsConfig,
    pub logging: LoggingConfig,
}

/// Server endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Base URL every endpoint path is appended to.
    pub base_url: String,
    /// Push endpoint path template; `{table}` is replaced by the table name.
    pub push_path: String,
    /// Pull endpoint path template; `{table}` is replaced by the table name.
    pub pull_path: String,
    /// Cheap endpoint used by the connectivity probe.
    pub probe_path: String,
    /// Timeout for push and pull requests, in seconds.
    pub request_timeout_secs: u64,
    /// Timeout for connectivity probes, in seconds.
    pub probe_timeout_secs: u64,
}

/// Retry strategy between push/pull attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    /// Same delay before every retry.
    #[default]
    Fixed,
    /// Delay grows by `retry_delay_ms` per attempt.
    Linear,
}

/// Synchronization behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Attempts per request, including the first one.
    pub max_attempts: u32,
    /// Base delay between attempts, in milliseconds.
    pub retry_delay_ms: u64,
    /// How the delay evolves between attempts.
    pub backoff: BackoffKind,
    /// Re-read the canonical server copy after every successful push.
    pub pull_after_push: bool,
    /// Seconds between background retry passes.
    pub auto_retry_interval_secs: u64,
    /// Minimum seconds between two automatic attempts for one table.
    pub min_retry_spacing_secs: u64,
    /// Sync guards older than this are considered abandoned, in seconds.
    pub stale_guard_secs: u64,
}

/// Connectivity detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
    /// Seconds between active probes.
    pub probe_interval_secs: u64,
    /// Initial value of the native online flag.
    pub start_online: bool,
}

/// Local persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database holding local copies, markers and diagnostics.
    pub database_path: PathBuf,
    /// Maximum database size in MiB; `0` means unlimited.
    pub max_size_mb: u64,
    /// How often other contexts' change markers are polled, in milliseconds.
    pub marker_poll_interval_ms: u64,
}

/// Diagnostics log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    /// Entries kept per table.
    pub capacity: usize,
    /// Also persist entries to the database.
    pub persist: bool,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

// ---------------------------------------------------------------------------
// Config::load()
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/qmsync/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("qmsync")
            .join("config.yaml")
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost/api".to_string(),
            push_path: "{table}-sync".to_string(),
            pull_path: "{table}-load".to_string(),
            probe_path: "ping".to_string(),
            request_timeout_secs: 30,
            probe_timeout_secs: 5,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay_ms: 1000,
            backoff: BackoffKind::Fixed,
            pull_after_push: true,
            auto_retry_interval_secs: 15,
            min_retry_spacing_secs: 5,
            stale_guard_secs: 120,
        }
    }
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            probe_interval_secs: 30,
            start_online: true,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("~/.local/share"))
                .join("qmsync")
                .join("qmsync.db"),
            max_size_mb: 0,
            marker_poll_interval_ms: 1000,
        }
    }
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            persist: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Duration accessors
// ---------------------------------------------------------------------------

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

impl SyncConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn auto_retry_interval(&self) -> Duration {
        Duration::from_secs(self.auto_retry_interval_secs)
    }

    pub fn min_retry_spacing(&self) -> Duration {
        Duration::from_secs(self.min_retry_spacing_secs)
    }

    pub fn stale_guard(&self) -> Duration {
        Duration::from_secs(self.stale_guard_secs)
    }
}

impl ConnectivityConfig {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }
}

impl StorageConfig {
    pub fn marker_poll_interval(&self) -> Duration {
        Duration::from_millis(self.marker_poll_interval_ms)
    }
}

// ---------------------------------------------------------------------------
// Config::validate()
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"sync.max_attempts"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Upper bound for `sync.max_attempts`; the orchestrator never loops indefinitely.
const MAX_ATTEMPTS_LIMIT: u32 = 5;

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let mut positive = |field: &str, value: u64| {
            if value == 0 {
                errors.push(ValidationError {
                    field: field.into(),
                    message: "must be greater than 0".into(),
                });
            }
        };

        positive("server.request_timeout_secs", self.server.request_timeout_secs);
        positive("server.probe_timeout_secs", self.server.probe_timeout_secs);
        positive(
            "sync.auto_retry_interval_secs",
            self.sync.auto_retry_interval_secs,
        );
        positive("sync.stale_guard_secs", self.sync.stale_guard_secs);
        positive(
            "connectivity.probe_interval_secs",
            self.connectivity.probe_interval_secs,
        );
        positive(
            "storage.marker_poll_interval_ms",
            self.storage.marker_poll_interval_ms,
        );
        positive("diagnostics.capacity", self.diagnostics.capacity as u64);

        // --- server ---
        match url::Url::parse(&self.server.base_url) {
            Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
            Ok(url) => errors.push(ValidationError {
                field: "server.base_url".into(),
                message: format!("unsupported scheme '{}'", url.scheme()),
            }),
            Err(e) => errors.push(ValidationError {
                field: "server.base_url".into(),
                message: format!("invalid URL: {e}"),
            }),
        }
        for (field, template) in [
            ("server.push_path", &self.server.push_path),
            ("server.pull_path", &self.server.pull_path),
        ] {
            if !template.contains("{table}") {
                errors.push(ValidationError {
                    field: field.into(),
                    message: "must contain the {table} placeholder".into(),
                });
            }
        }
        if self.server.probe_timeout_secs > self.server.request_timeout_secs {
            errors.push(ValidationError {
                field: "server.probe_timeout_secs".into(),
                message: format!(
                    "probe timeout ({}) must not exceed request timeout ({})",
                    self.server.probe_timeout_secs, self.server.request_timeout_secs
                ),
            });
        }

        // --- sync ---
        if self.sync.max_attempts == 0 || self.sync.max_attempts > MAX_ATTEMPTS_LIMIT {
            errors.push(ValidationError {
                field: "sync.max_attempts".into(),
                message: format!("must be in range 1..={MAX_ATTEMPTS_LIMIT}"),
            });
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "invalid level '{}'; valid options: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Builder for constructing a [`Config`] programmatically.
///
/// Starts from [`Config::default`] and allows selective overrides.
///
/// # Example
///
/// ```rust,no_run
/// use qmsync_core::config::ConfigBuilder;
///
/// let config = ConfigBuilder::new()
///     .server_base_url("https://qms.example.com/api")
///     .sync_max_attempts(2)
///     .logging_level("debug")
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder initialised with [`Config::default`] values.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    // --- server ---

    pub fn server_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.server.base_url = url.into();
        self
    }

    pub fn server_push_path(mut self, template: impl Into<String>) -> Self {
        self.config.server.push_path = template.into();
        self
    }

    pub fn server_pull_path(mut self, template: impl Into<String>) -> Self {
        self.config.server.pull_path = template.into();
        self
    }

    pub fn server_probe_path(mut self, path: impl Into<String>) -> Self {
        self.config.server.probe_path = path.into();
        self
    }

    pub fn server_request_timeout_secs(mut self, seconds: u64) -> Self {
        self.config.server.request_timeout_secs = seconds;
        self
    }

    pub fn server_probe_timeout_secs(mut self, seconds: u64) -> Self {
        self.config.server.probe_timeout_secs = seconds;
        self
    }

    // --- sync ---

    pub fn sync_max_attempts(mut self, n: u32) -> Self {
        self.config.sync.max_attempts = n;
        self
    }

    pub fn sync_retry_delay_ms(mut self, ms: u64) -> Self {
        self.config.sync.retry_delay_ms = ms;
        self
    }

    pub fn sync_backoff(mut self, backoff: BackoffKind) -> Self {
        self.config.sync.backoff = backoff;
        self
    }

    pub fn sync_pull_after_push(mut self, enabled: bool) -> Self {
        self.config.sync.pull_after_push = enabled;
        self
    }

    pub fn sync_auto_retry_interval_secs(mut self, seconds: u64) -> Self {
        self.config.sync.auto_retry_interval_secs = seconds;
        self
    }

    pub fn sync_min_retry_spacing_secs(mut self, seconds: u64) -> Self {
        self.config.sync.min_retry_spacing_secs = seconds;
        self
    }

    pub fn sync_stale_guard_secs(mut self, seconds: u64) -> Self {
        self.config.sync.stale_guard_secs = seconds;
        self
    }

    // --- connectivity ---

    pub fn connectivity_probe_interval_secs(mut self, seconds: u64) -> Self {
        self.config.connectivity.probe_interval_secs = seconds;
        self
    }

    pub fn connectivity_start_online(mut self, online: bool) -> Self {
        self.config.connectivity.start_online = online;
        self
    }

    // --- storage ---

    pub fn storage_database_path(mut self, path: PathBuf) -> Self {
        self.config.storage.database_path = path;
        self
    }

    pub fn storage_max_size_mb(mut self, mb: u64) -> Self {
        self.config.storage.max_size_mb = mb;
        self
    }

    pub fn storage_marker_poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.storage.marker_poll_interval_ms = ms;
        self
    }

    // --- diagnostics ---

    pub fn diagnostics_capacity(mut self, capacity: usize) -> Self {
        self.config.diagnostics.capacity = capacity;
        self
    }

    pub fn diagnostics_persist(mut self, persist: bool) -> Self {
        self.config.diagnostics.persist = persist;
        self
    }

    // --- logging ---

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn logging_json(mut self, json: bool) -> Self {
        self.config.logging.json = json;
        self
    }

    // --- build ---

    /// Consume the builder and return the finished [`Config`].
    pub fn build(self) -> Config {
        self.config
    }

    /// Build and validate in one step. Returns `Err` with the list of
    /// validation errors if the configuration is invalid.
    pub fn build_validated(self) -> Result<Config, Vec<ValidationError>> {
        let config = self.build();
        let errors = config.validate();
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(errors)
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
