//! Configuration for the ledger

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// RocksDB configuration
    pub rocksdb: RocksDBConfig,

    /// Ledger policy
    pub ledger: LedgerPolicyConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/wastebin-ledger"),
            service_name: "wastebin-ledger".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            rocksdb: RocksDBConfig::default(),
            ledger: LedgerPolicyConfig::default(),
        }
    }
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RocksDBConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max write buffers
    pub max_write_buffer_number: i32,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// Sync the WAL on every batch commit
    pub sync_writes: bool,

    /// Enable statistics
    pub enable_statistics: bool,
}

impl Default for RocksDBConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 64,
            max_write_buffer_number: 2,
            max_background_jobs: 2,
            sync_writes: true,
            enable_statistics: false,
        }
    }
}

/// Ledger policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerPolicyConfig {
    /// Reject deposits that would push a bin past its capacity
    pub enforce_capacity: bool,

    /// Maximum wait for an entity lock (milliseconds)
    pub lock_timeout_ms: u64,
}

impl Default for LedgerPolicyConfig {
    fn default() -> Self {
        Self {
            enforce_capacity: true,
            lock_timeout_ms: 5_000,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::Error::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(data_dir) = std::env::var("LEDGER_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(value) = std::env::var("LEDGER_ENFORCE_CAPACITY") {
            config.ledger.enforce_capacity = value.parse().map_err(|_| {
                crate::Error::Config(format!("LEDGER_ENFORCE_CAPACITY must be a bool, got {}", value))
            })?;
        }

        if let Ok(value) = std::env::var("LEDGER_LOCK_TIMEOUT_MS") {
            config.ledger.lock_timeout_ms = value.parse().map_err(|_| {
                crate::Error::Config(format!("LEDGER_LOCK_TIMEOUT_MS must be an integer, got {}", value))
            })?;
        }

        Ok(config)
    }
}
