//! Client configuration loading from file and environment variables.

use beastnet_store::StoreConfig;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Top-level network client configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Message bus settings.
    #[serde(default)]
    pub bus: BusConfig,

    /// Storage settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Message bus configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BusConfig {
    /// Broadcast buffer capacity per subscriber.
    #[serde(default = "default_bus_capacity")]
    pub capacity: usize,
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Connection string for the networked primary backend. Unset means
    /// the embedded fallback is used directly.
    #[serde(default)]
    pub database_url: Option<String>,

    /// Path to the fallback SQLite database file.
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: String,

    /// Maximum number of pooled connections.
    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,

    /// Busy timeout for SQLite connections, in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Upper bound on the primary connectivity probe, in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "beastnet_store=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_bus_capacity() -> usize {
    beastnet_bus::DEFAULT_CAPACITY
}

fn default_sqlite_path() -> String {
    "beastnet.db".to_string()
}

fn default_pool_max_size() -> u32 {
    8
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_connect_timeout_secs() -> u64 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            capacity: default_bus_capacity(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            sqlite_path: default_sqlite_path(),
            pool_max_size: default_pool_max_size(),
            busy_timeout_ms: default_busy_timeout_ms(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl StorageConfig {
    /// Converts into the storage crate's configuration shape.
    pub fn to_store_config(&self) -> StoreConfig {
        StoreConfig {
            database_url: self.database_url.clone(),
            sqlite_path: self.sqlite_path.clone(),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            pool_max_size: self.pool_max_size,
            busy_timeout_ms: self.busy_timeout_ms,
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// When no path is passed, `BEASTNET_CONFIG_PATH` names the file instead.
///
/// Environment variable overrides:
/// - `BEASTNET_DATABASE_URL` overrides `storage.database_url`
/// - `BEASTNET_DB_PATH` overrides `storage.sqlite_path`
/// - `BEASTNET_BUS_CAPACITY` overrides `bus.capacity`
/// - `BEASTNET_LOG_LEVEL` overrides `logging.level`
/// - `BEASTNET_LOG_JSON` overrides `logging.json` (set to "true" to enable)
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let env_path = match path {
        Some(_) => None,
        None => std::env::var("BEASTNET_CONFIG_PATH")
            .ok()
            .filter(|p| !p.trim().is_empty()),
    };
    let path = path.or(env_path.as_deref());

    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    // Environment variable overrides
    if let Ok(url) = std::env::var("BEASTNET_DATABASE_URL") {
        if !url.trim().is_empty() {
            config.storage.database_url = Some(url);
        }
    }
    if let Ok(db_path) = std::env::var("BEASTNET_DB_PATH") {
        config.storage.sqlite_path = db_path;
    }
    if let Ok(capacity) = std::env::var("BEASTNET_BUS_CAPACITY") {
        if let Ok(parsed) = capacity.parse() {
            config.bus.capacity = parsed;
        }
    }
    if let Ok(level) = std::env::var("BEASTNET_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Ok(json) = std::env::var("BEASTNET_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }

    Ok(config)
}
