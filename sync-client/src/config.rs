//! Configuration loading for the sync engine.
//!
//! Configuration is loaded from a TOML file (e.g. `sync.toml`). Every field
//! has a default, so an empty file (or `SyncConfig::default()`) is valid.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use sync_core::{QualityThresholds, RetryPolicy};

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SyncConfig {
    /// Connectivity monitor configuration.
    #[serde(default)]
    pub connectivity: ConnectivityConfig,
    /// Retry/backoff configuration.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Feed cache configuration.
    #[serde(default)]
    pub feed: FeedConfig,
    /// Storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Connectivity monitor configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectivityConfig {
    /// Interval between quality probes in seconds (default: 30).
    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,
    /// Probe timeout in milliseconds (default: 3000).
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    /// Upper latency bound for "excellent" in milliseconds (default: 150).
    #[serde(default = "default_excellent_ms")]
    pub excellent_ms: u64,
    /// Upper latency bound for "good" in milliseconds (default: 300).
    #[serde(default = "default_good_ms")]
    pub good_ms: u64,
    /// Upper latency bound for "fair" in milliseconds (default: 600).
    #[serde(default = "default_fair_ms")]
    pub fair_ms: u64,
}

/// Retry/backoff configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// First retry delay in milliseconds (default: 500).
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Delay cap in milliseconds (default: 30000).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Attempts before an operation is abandoned (default: 5).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

/// Feed cache configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    /// Cache TTL in seconds (default: 24 hours).
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// How long an expired cache stays on disk for offline cold starts,
    /// counted from its expiry (default: 7 days).
    #[serde(default = "default_stale_retention_secs")]
    pub stale_retention_secs: u64,
    /// Page size used when a caller passes 0 (default: 20).
    #[serde(default = "default_page_size")]
    pub default_page_size: usize,
    /// Also hide content from users who blocked the actor (default: true).
    #[serde(default = "default_hide_blocking_me")]
    pub hide_blocking_me: bool,
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// SQLite database path. `None` keeps state in memory.
    pub database: Option<PathBuf>,
    /// Remote collection holding block relations (default: "blocks").
    #[serde(default = "default_relation_collection")]
    pub relation_collection: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// `tracing` filter directive (default: "info"). `RUST_LOG` overrides it.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

// Default value functions
fn default_probe_interval_secs() -> u64 {
    30
}

fn default_probe_timeout_ms() -> u64 {
    3_000
}

fn default_excellent_ms() -> u64 {
    150
}

fn default_good_ms() -> u64 {
    300
}

fn default_fair_ms() -> u64 {
    600
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_max_attempts() -> u32 {
    5
}

fn default_cache_ttl_secs() -> u64 {
    24 * 60 * 60 // 24 hours
}

fn default_stale_retention_secs() -> u64 {
    7 * 24 * 60 * 60 // 7 days
}

fn default_page_size() -> usize {
    20
}

fn default_hide_blocking_me() -> bool {
    true
}

fn default_relation_collection() -> String {
    "blocks".to_string()
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            probe_interval_secs: default_probe_interval_secs(),
            probe_timeout_ms: default_probe_timeout_ms(),
            excellent_ms: default_excellent_ms(),
            good_ms: default_good_ms(),
            fair_ms: default_fair_ms(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_cache_ttl_secs(),
            stale_retention_secs: default_stale_retention_secs(),
            default_page_size: default_page_size(),
            hide_blocking_me: default_hide_blocking_me(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: None,
            relation_collection: default_relation_collection(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

impl ConnectivityConfig {
    /// Interval between periodic probes.
    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    /// Probe timeout.
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Latency thresholds for quality classification.
    pub fn thresholds(&self) -> QualityThresholds {
        QualityThresholds {
            excellent: Duration::from_millis(self.excellent_ms),
            good: Duration::from_millis(self.good_ms),
            fair: Duration::from_millis(self.fair_ms),
        }
    }
}

impl RetryConfig {
    /// Retry policy built from this section.
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
            self.max_attempts,
        )
    }
}

impl FeedConfig {
    /// Cache TTL in milliseconds.
    pub fn ttl_ms(&self) -> u64 {
        self.cache_ttl_secs.saturating_mul(1_000)
    }

    /// Stale retention window in milliseconds.
    pub fn stale_retention_ms(&self) -> u64 {
        self.stale_retention_secs.saturating_mul(1_000)
    }
}

impl SyncConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError {
            path: PathBuf::from("<inline>"),
            source: e,
        })
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = SyncConfig::default();
        assert_eq!(config.connectivity.probe_interval(), Duration::from_secs(30));
        assert_eq!(config.connectivity.probe_timeout(), Duration::from_secs(3));
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.feed.ttl_ms(), 24 * 60 * 60 * 1_000);
        assert!(config.feed.hide_blocking_me);
        assert_eq!(config.storage.relation_collection, "blocks");
        assert!(config.storage.database.is_none());
        assert_eq!(config.logging.filter, "info");
    }

    #[test]
    fn config_from_toml_string() {
        let toml = r#"
[connectivity]
probe_interval_secs = 10
fair_ms = 800

[retry]
base_delay_ms = 100
max_attempts = 3

[feed]
cache_ttl_secs = 60
hide_blocking_me = false

[storage]
database = "/data/sync.db"
relation_collection = "user_blocks"

[logging]
filter = "socialsync_client=debug"
"#;

        let config = SyncConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.connectivity.probe_interval_secs, 10);
        assert_eq!(config.connectivity.thresholds().fair, Duration::from_millis(800));
        assert_eq!(config.connectivity.thresholds().good, Duration::from_millis(300));
        assert_eq!(config.retry.policy().base_delay, Duration::from_millis(100));
        assert_eq!(config.retry.policy().max_attempts, 3);
        assert_eq!(config.feed.ttl_ms(), 60_000);
        assert!(!config.feed.hide_blocking_me);
        assert_eq!(config.storage.database, Some(PathBuf::from("/data/sync.db")));
        assert_eq!(config.storage.relation_collection, "user_blocks");
        assert_eq!(config.logging.filter, "socialsync_client=debug");
    }

    #[test]
    fn config_missing_sections_use_defaults() {
        let config = SyncConfig::from_toml_str("[retry]\nmax_attempts = 7\n").unwrap();
        assert_eq!(config.retry.max_attempts, 7);
        assert_eq!(config.retry.max_delay_ms, 30_000);
        assert_eq!(config.feed.default_page_size, 20);
        assert_eq!(config.feed.stale_retention_ms(), 7 * 24 * 60 * 60 * 1_000);
        assert_eq!(config.connectivity.excellent_ms, 150);
    }

    #[test]
    fn config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[feed]\ndefault_page_size = 50").unwrap();

        let config = SyncConfig::from_file(file.path()).unwrap();
        assert_eq!(config.feed.default_page_size, 50);
    }

    #[test]
    fn missing_file_is_read_error() {
        let err = SyncConfig::from_file(Path::new("/nonexistent/sync.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::ReadError { .. }));
    }

    #[test]
    fn invalid_toml_is_parse_error() {
        let err = SyncConfig::from_toml_str("[retry]\nmax_attempts = \"many\"").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }
}
