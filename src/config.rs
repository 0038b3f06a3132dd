//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.
//!
//! Durations are written as `<n><unit>` with unit `d`, `h` or `m`, e.g.
//! `partition_duration = "24h"`.

use crate::index::{IndexConfig, TimeBasedRetentionPolicy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub index: IndexSettings,

    #[serde(default)]
    pub retention: RetentionConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Index database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

fn default_db_path() -> String {
    dirs::data_local_dir()
        .map(|p| p.join("metaindex").join("index.db").to_string_lossy().to_string())
        .unwrap_or_else(|| "./metaindex_data/index.db".to_string())
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

/// Index tuning
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IndexSettings {
    #[serde(default = "default_partition_duration")]
    pub partition_duration: String,

    /// Defaults to the partition duration
    #[serde(default)]
    pub query_lookaround_period: Option<String>,

    #[serde(default = "default_partition_cache_size")]
    pub partition_cache_size: usize,
}

fn default_partition_duration() -> String {
    "24h".to_string()
}

fn default_partition_cache_size() -> usize {
    7
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            partition_duration: default_partition_duration(),
            query_lookaround_period: None,
            partition_cache_size: default_partition_cache_size(),
        }
    }
}

/// Retention settings for `truncate`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetentionConfig {
    /// Unset keeps data forever
    #[serde(default)]
    pub default_period: Option<String>,

    /// Per-tenant periods; `"0"` keeps the tenant's data forever
    #[serde(default)]
    pub overrides: BTreeMap<String, String>,

    #[serde(default = "default_grace_period")]
    pub grace_period: String,

    #[serde(default = "default_max_tombstones")]
    pub max_tombstones: usize,
}

fn default_grace_period() -> String {
    "1h".to_string()
}

fn default_max_tombstones() -> usize {
    128
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            default_period: None,
            overrides: BTreeMap::new(),
            grace_period: default_grace_period(),
            max_tombstones: default_max_tombstones(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Parse `<n>d`, `<n>h` or `<n>m`. A bare `0` is the zero duration.
pub fn parse_duration(s: &str) -> Result<Duration, ConfigError> {
    let s = s.trim();
    if s == "0" {
        return Ok(Duration::ZERO);
    }
    let invalid = || ConfigError::Invalid(format!("invalid duration {:?}", s));
    let unit = match s.chars().last() {
        Some('d') => 24 * 60 * 60,
        Some('h') => 60 * 60,
        Some('m') => 60,
        _ => return Err(invalid()),
    };
    let n: u64 = s[..s.len() - 1].parse().map_err(|_| invalid())?;
    n.checked_mul(unit)
        .map(Duration::from_secs)
        .ok_or_else(invalid)
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("metaindex").join("config.toml")),
            Some(PathBuf::from("/etc/metaindex/config.toml")),
            Some(PathBuf::from("./metaindex.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                match Self::load_with_env(path) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("METAINDEX_DB_PATH") {
            self.storage.db_path = path;
        }

        if let Ok(size) = std::env::var("METAINDEX_PARTITION_CACHE_SIZE") {
            match size.parse() {
                Ok(n) => self.index.partition_cache_size = n,
                Err(_) => tracing::warn!(value = %size, "Ignoring invalid METAINDEX_PARTITION_CACHE_SIZE"),
            }
        }

        if let Ok(level) = std::env::var("METAINDEX_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("METAINDEX_LOG_FORMAT") {
            self.logging.format = format;
        }
    }

    /// Check value ranges. Partition durations must be whole minutes.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.to_index_config()?;
        self.retention_policy(0)?;
        match self.logging.format.as_str() {
            "pretty" | "json" => Ok(()),
            other => Err(ConfigError::Invalid(format!("unknown log format {:?}", other))),
        }
    }

    /// Runtime index configuration
    pub fn to_index_config(&self) -> Result<IndexConfig, ConfigError> {
        let partition_duration = parse_duration(&self.index.partition_duration)?;
        if partition_duration.is_zero() {
            return Err(ConfigError::Invalid(
                "partition_duration must be positive".to_string(),
            ));
        }
        let query_lookaround_period = match &self.index.query_lookaround_period {
            Some(s) => parse_duration(s)?,
            None => partition_duration,
        };
        if self.index.partition_cache_size == 0 {
            return Err(ConfigError::Invalid(
                "partition_cache_size must be positive".to_string(),
            ));
        }
        Ok(IndexConfig {
            partition_duration,
            query_lookaround_period,
            partition_cache_size: self.index.partition_cache_size,
        })
    }

    /// Time based retention policy evaluated at `now_ms`
    pub fn retention_policy(&self, now_ms: i64) -> Result<TimeBasedRetentionPolicy, ConfigError> {
        let period = |s: &str| -> Result<Option<Duration>, ConfigError> {
            let d = parse_duration(s)?;
            Ok(if d.is_zero() { None } else { Some(d) })
        };
        let default_period = match &self.retention.default_period {
            Some(s) => period(s)?,
            None => None,
        };
        let mut policy = TimeBasedRetentionPolicy::new(
            default_period,
            parse_duration(&self.retention.grace_period)?,
            self.retention.max_tombstones,
            now_ms,
        );
        for (tenant, s) in &self.retention.overrides {
            policy = policy.with_override(tenant.clone(), period(s)?);
        }
        Ok(policy)
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Metaindex Configuration
#
# Environment variables override these settings:
# - METAINDEX_DB_PATH
# - METAINDEX_PARTITION_CACHE_SIZE
# - METAINDEX_LOG_LEVEL
# - METAINDEX_LOG_FORMAT
#
# Durations: <n>d, <n>h or <n>m

[storage]
# SQLite database holding the index
db_path = "~/.local/share/metaindex/index.db"

[index]
# Size of a time partition
partition_duration = "24h"

# Partitions this far outside a query range are still visited
# (defaults to partition_duration)
# query_lookaround_period = "24h"

# Cached partitions per tenant
partition_cache_size = 7

[retention]
# Retention period for tenants without an override; unset keeps data forever
# default_period = "30d"

# Extra time before a partition past its retention period is deleted
grace_period = "1h"

# Upper bound of tenant shards deleted per truncation
max_tombstones = 128

[retention.overrides]
# Per-tenant retention; "0" keeps the tenant's data forever
# tenant-a = "7d"

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}
