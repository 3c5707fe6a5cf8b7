//! Configuration management for CLI, environment variables, and config files.

use crate::buffer::{BufferKind, FlushOrdering};
use crate::error::{TallyError, ValidationIssue};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use strum::{Display, EnumString};

/// Main configuration for tag-tally.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub buffer: BufferConfig,
    #[serde(default)]
    pub trigger: TriggerConfig,
    #[serde(default)]
    pub flush: FlushConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Which aggregation buffer to run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    pub kind: BufferKind,
    /// Only used by the swap buffer
    pub flush_ordering: FlushOrdering,
}

/// Flush trigger policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    /// Flush after every this many ingested events
    pub flush_threshold: u64,
}

/// Background flush execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlushConfig {
    /// Pending flush requests before triggers are dropped
    pub queue_capacity: usize,
    /// Flushes allowed to run at the same time
    pub max_concurrent: usize,
    /// Flush whatever is still buffered when shutting down
    pub final_flush: bool,
}

/// Local event generation and ingestion workers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub workers: usize,
    /// Posts to generate; each post is one trigger event
    pub events: u64,
    pub tag_len: usize,
    /// Upper bound of tags per generated post
    pub max_tags: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum StoreBackend {
    #[default]
    Memory,
    Http,
}

/// Counter store connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub url: String,
    /// Simulated per-call latency for the memory backend
    pub latency_ms: u64,
    /// Per-request timeout in seconds
    pub request_timeout: u64,
    pub failure_threshold: u32,
    /// Seconds the circuit stays open
    pub reset_timeout: u64,
}

/// Configuration for logging output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub metrics_enabled: bool,
    pub metrics_interval_secs: u64,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            flush_threshold: 500,
        }
    }
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 16,
            max_concurrent: 2,
            final_flush: true,
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            workers: 5,
            events: 10_000,
            tag_len: 2,
            max_tags: 5,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            url: "http://127.0.0.1:8080".to_string(),
            latency_ms: 0,
            request_timeout: 10,
            failure_threshold: 5,
            reset_timeout: 30,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            metrics_enabled: false,
            metrics_interval_secs: 10,
        }
    }
}

fn env_value<T: FromStr>(name: &str) -> Result<Option<T>, TallyError> {
    match std::env::var(name) {
        Ok(val) => val
            .parse()
            .map(Some)
            .map_err(|_| TallyError::InvalidConfig(format!("{} has invalid format", name))),
        Err(_) => Ok(None),
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_file(path: &PathBuf) -> Result<Self, TallyError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| TallyError::IoError(format!("{}: {}", path.display(), e)))?;

        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());
        match ext.as_deref() {
            Some("json") => Ok(serde_json::from_str(&content)?),
            _ => Ok(toml::from_str(&content)?),
        }
    }

    pub fn from_default_locations() -> Result<Self, TallyError> {
        let config_dirs = [
            dirs::config_dir().map(|d| d.join("tag-tally/config.toml")),
            Some(PathBuf::from("/etc/tag-tally/config.toml")),
            Some(PathBuf::from("./tag-tally.toml")),
        ];

        for path in config_dirs.iter().flatten() {
            if path.exists() {
                tracing::info!("Loading config from: {}", path.display());
                return Self::from_file(path);
            }
        }

        Ok(Self::default())
    }

    pub fn merge_from_env(mut self) -> Result<Self, TallyError> {
        if let Some(kind) = env_value("TAG_TALLY_BUFFER_KIND")? {
            self.buffer.kind = kind;
        }
        if let Some(ordering) = env_value("TAG_TALLY_FLUSH_ORDERING")? {
            self.buffer.flush_ordering = ordering;
        }
        if let Some(threshold) = env_value("TAG_TALLY_FLUSH_THRESHOLD")? {
            self.trigger.flush_threshold = threshold;
        }
        if let Some(workers) = env_value("TAG_TALLY_WORKERS")? {
            self.ingest.workers = workers;
        }
        if let Some(events) = env_value("TAG_TALLY_EVENTS")? {
            self.ingest.events = events;
        }
        if let Some(backend) = env_value("TAG_TALLY_STORE_BACKEND")? {
            self.store.backend = backend;
        }
        if let Ok(val) = std::env::var("TAG_TALLY_STORE_URL") {
            self.store.url = val;
        }
        if let Some(latency) = env_value("TAG_TALLY_STORE_LATENCY_MS")? {
            self.store.latency_ms = latency;
        }
        if let Ok(val) = std::env::var("TAG_TALLY_LOG_LEVEL") {
            self.logging.level = val;
        }

        Ok(self)
    }

    pub fn merge_from_cli(mut self, cli: &CliArgs) -> Self {
        if let Some(kind) = cli.buffer_kind {
            self.buffer.kind = kind;
        }
        if let Some(ordering) = cli.flush_ordering {
            self.buffer.flush_ordering = ordering;
        }
        if let Some(threshold) = cli.flush_threshold {
            self.trigger.flush_threshold = threshold;
        }
        if let Some(workers) = cli.workers {
            self.ingest.workers = workers;
        }
        if let Some(events) = cli.events {
            self.ingest.events = events;
        }
        if let Some(backend) = cli.store_backend {
            self.store.backend = backend;
        }
        if let Some(ref url) = cli.store_url {
            self.store.url = url.clone();
        }
        if let Some(latency) = cli.store_latency_ms {
            self.store.latency_ms = latency;
        }

        self
    }

    pub fn load() -> Result<Self, TallyError> {
        Self::from_default_locations()?.merge_from_env()
    }

    /// File (explicit or default location), then environment, then CLI.
    pub fn load_with_cli(cli: &CliArgs) -> Result<Self, TallyError> {
        let base = match cli.config_file {
            Some(ref path) => Self::from_file(path)?,
            None => Self::from_default_locations()?,
        };
        Ok(base.merge_from_env()?.merge_from_cli(cli))
    }

    pub fn validate(&self) -> Result<(), TallyError> {
        let mut issues = Vec::new();
        let mut issue = |field: &str, message: String| {
            issues.push(ValidationIssue {
                field: field.to_string(),
                message,
            })
        };

        if self.trigger.flush_threshold == 0 {
            issue(
                "trigger.flush_threshold",
                "Flush threshold must be at least 1".to_string(),
            );
        }

        if self.flush.queue_capacity == 0 {
            issue(
                "flush.queue_capacity",
                "Queue capacity must be at least 1".to_string(),
            );
        }
        if self.flush.max_concurrent == 0 {
            issue(
                "flush.max_concurrent",
                "At least one flush must be allowed to run".to_string(),
            );
        }

        if self.ingest.workers == 0 {
            issue("ingest.workers", "Need at least one worker".to_string());
        }
        if self.ingest.events == 0 {
            issue("ingest.events", "Need at least one event".to_string());
        }
        if !(1..=16).contains(&self.ingest.tag_len) {
            issue(
                "ingest.tag_len",
                format!("Tag length {} outside 1..=16", self.ingest.tag_len),
            );
        }
        if !(1..=64).contains(&self.ingest.max_tags) {
            issue(
                "ingest.max_tags",
                format!("Tags per post {} outside 1..=64", self.ingest.max_tags),
            );
        }

        if self.store.backend == StoreBackend::Http {
            if self.store.url.is_empty() {
                issue("store.url", "URL cannot be empty".to_string());
            } else if let Err(e) = reqwest::Url::parse(&self.store.url) {
                issue("store.url", format!("Invalid URL format: {}", e));
            }
        }
        if self.store.request_timeout == 0 || self.store.request_timeout > 300 {
            issue(
                "store.request_timeout",
                format!(
                    "Request timeout {}s outside 1..=300",
                    self.store.request_timeout
                ),
            );
        }
        if self.store.failure_threshold == 0 {
            issue(
                "store.failure_threshold",
                "Failure threshold must be at least 1".to_string(),
            );
        }

        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            issue(
                "logging.level",
                format!(
                    "Invalid log level '{}'. Valid levels: {}",
                    self.logging.level,
                    valid_levels.join(", ")
                ),
            );
        }
        if self.logging.metrics_enabled && self.logging.metrics_interval_secs == 0 {
            issue(
                "logging.metrics_interval_secs",
                "Interval must be at least 1 when metrics are enabled".to_string(),
            );
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(TallyError::ValidationError(issues))
        }
    }
}

/// Command-line arguments that override configuration values.
#[derive(Debug, Clone, Default)]
pub struct CliArgs {
    pub config_file: Option<PathBuf>,
    pub buffer_kind: Option<BufferKind>,
    pub flush_ordering: Option<FlushOrdering>,
    pub flush_threshold: Option<u64>,
    pub workers: Option<usize>,
    pub events: Option<u64>,
    pub store_backend: Option<StoreBackend>,
    pub store_url: Option<String>,
    pub store_latency_ms: Option<u64>,
}
