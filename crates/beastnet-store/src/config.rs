//! Storage configuration.

use std::time::Duration;

/// Settings for building the storage router and its backends.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Connection string for the networked primary backend. `None` means
    /// the primary is unconfigured and the embedded fallback is used
    /// directly.
    pub database_url: Option<String>,

    /// Path to the embedded SQLite database file used as the fallback.
    pub sqlite_path: String,

    /// Upper bound on the primary connectivity probe at startup.
    pub connect_timeout: Duration,

    /// Maximum number of pooled connections (applies to either engine).
    pub pool_max_size: u32,

    /// Busy timeout for SQLite connections, in milliseconds.
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            sqlite_path: "beastnet.db".to_string(),
            connect_timeout: Duration::from_secs(5),
            pool_max_size: 8,
            busy_timeout_ms: 5_000,
        }
    }
}
