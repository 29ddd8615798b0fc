//! Configuration for the telemetry sink
//!
//! Settings come from an optional TOML file and are then overridden by
//! command-line flags. Every section has defaults, so an empty file (or no
//! file at all) yields a working configuration.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::TimeDelta;
use clap::Parser;
use serde::{Deserialize, Serialize};
use speedgauge_storage::{FileLogConfig, RetentionPolicy};

use crate::error::ConfigError;

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Address the HTTP server binds to
    pub listen_addr: SocketAddr,
    /// Path the telemetry endpoint is mounted on
    pub route: String,
    /// Log file settings
    pub storage: StorageConfig,
    /// Retention bounds
    pub retention: RetentionConfig,
    /// HTTP request handling
    pub http: HttpConfig,
    /// Diagnostic logging
    pub logging: LoggingConfig,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            route: "/telemetry".to_string(),
            storage: StorageConfig::default(),
            retention: RetentionConfig::default(),
            http: HttpConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl TelemetryConfig {
    /// Parse a configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Build the effective configuration from command-line arguments
    ///
    /// Loads `--config` if given, then applies the remaining flags on top.
    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        let mut config = match &cli.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };

        if let Some(listen) = cli.listen {
            config.listen_addr = listen;
        }
        if let Some(log_path) = &cli.log_path {
            config.storage.log_path = log_path.clone();
        }
        if let Some(level) = &cli.log_level {
            config.logging.level = level.clone();
        }
        if cli.log_json {
            config.logging.json = true;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check for values the server cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.route.starts_with('/') {
            return Err(ConfigError::invalid(format!(
                "route must start with '/', got {:?}",
                self.route
            )));
        }
        if self.route == "/health" {
            return Err(ConfigError::invalid("route conflicts with /health"));
        }
        // The route is a fixed path; captures, wildcards and legacy
        // `:param` segments are rejected by the router at startup.
        if self.route.contains(['{', '}'])
            || self
                .route
                .split('/')
                .any(|segment| segment.starts_with([':', '*']))
        {
            return Err(ConfigError::invalid(format!(
                "route must be a literal path, got {:?}",
                self.route
            )));
        }
        if self.retention.max_entries == 0 {
            return Err(ConfigError::invalid("retention.max_entries must be at least 1"));
        }
        if self.retention.max_age_days == 0 {
            return Err(ConfigError::invalid("retention.max_age_days must be at least 1"));
        }
        if self.http.max_body_bytes == 0 {
            return Err(ConfigError::invalid("http.max_body_bytes must be at least 1"));
        }
        Ok(())
    }
}

/// Log file settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path of the JSONL log file; its directory must already exist
    pub log_path: PathBuf,
    /// Whether to fsync after every rewrite
    pub sync_on_write: bool,
    /// How long a request waits for the log lock, in milliseconds (0 waits forever)
    pub lock_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            log_path: PathBuf::from("./data/telemetry-log.jsonl"),
            sync_on_write: true,
            lock_timeout_ms: 5_000,
        }
    }
}

impl StorageConfig {
    /// Lock acquisition timeout, `None` meaning unbounded
    pub fn lock_timeout(&self) -> Option<Duration> {
        (self.lock_timeout_ms > 0).then(|| Duration::from_millis(self.lock_timeout_ms))
    }

    /// Settings for the file-backed store
    pub fn file_log_config(&self) -> FileLogConfig {
        FileLogConfig {
            path: self.log_path.clone(),
            sync_on_write: self.sync_on_write,
            lock_timeout: self.lock_timeout(),
        }
    }
}

/// Retention bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Maximum entries kept after a write
    pub max_entries: usize,
    /// Maximum entry age in days
    pub max_age_days: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_entries: speedgauge_storage::retention::DEFAULT_MAX_ENTRIES,
            max_age_days: speedgauge_storage::retention::DEFAULT_MAX_AGE_DAYS as u32,
        }
    }
}

impl RetentionConfig {
    /// The policy these settings describe
    pub fn policy(&self) -> RetentionPolicy {
        RetentionPolicy::new(self.max_entries, TimeDelta::days(i64::from(self.max_age_days)))
    }
}

/// HTTP request handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Largest accepted request body
    pub max_body_bytes: usize,
    /// Take the caller address from `X-Forwarded-For` / `X-Real-IP`
    ///
    /// Only enable this behind a reverse proxy that sets those headers.
    pub trust_forwarded_headers: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: 64 * 1024,
            trust_forwarded_headers: false,
        }
    }
}

/// Diagnostic logging
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level filter (overridden by RUST_LOG)
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "speedgauge-telemetry",
    about = "Telemetry sink for the SpeedGauge speed test"
)]
pub struct Cli {
    /// Path to a TOML configuration file
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,
    /// Address to listen on (overrides the config file)
    #[arg(long)]
    pub listen: Option<SocketAddr>,
    /// Telemetry log file path (overrides the config file)
    #[arg(long)]
    pub log_path: Option<PathBuf>,
    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
    /// Emit diagnostic logs as JSON lines
    #[arg(long)]
    pub log_json: bool,
}
