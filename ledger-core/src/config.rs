//! Configuration for the ledger

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// RocksDB configuration
    pub rocksdb: RocksDBConfig,

    /// Row lock configuration
    pub locks: LockConfig,

    /// Transaction engine configuration
    pub engine: EngineConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/ledger"),
            service_name: "ledger-core".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            rocksdb: RocksDBConfig::default(),
            locks: LockConfig::default(),
            engine: EngineConfig::default(),
        }
    }
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RocksDBConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max write buffers
    pub max_write_buffer_number: i32,

    /// Target file size (MB)
    pub target_file_size_mb: u64,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// Enable statistics
    pub enable_statistics: bool,
}

impl Default for RocksDBConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 64,
            max_write_buffer_number: 3,
            target_file_size_mb: 64,
            max_background_jobs: 2,
            enable_statistics: false,
        }
    }
}

/// Row lock configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Number of lock stripes keys are hashed onto
    pub stripes: usize,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self { stripes: 1024 }
    }
}

/// Transaction engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Commit attempts before surfacing `ConcurrentModification`
    pub max_retries: u32,

    /// Backoff step between attempts (milliseconds, multiplied by attempt)
    pub retry_backoff_ms: u64,

    /// Capacity of the balance event channel
    pub event_channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: 8,
            retry_backoff_ms: 2,
            event_channel_capacity: 1024,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Override fields from environment variables
    pub fn apply_env(&mut self) -> crate::Result<()> {
        if let Ok(data_dir) = std::env::var("LEDGER_DATA_DIR") {
            self.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(retries) = std::env::var("LEDGER_MAX_RETRIES") {
            self.engine.max_retries = retries
                .parse()
                .map_err(|e| crate::Error::Config(format!("LEDGER_MAX_RETRIES: {}", e)))?;
        }

        self.validate()
    }

    /// Check invariants the engine relies on
    pub fn validate(&self) -> crate::Result<()> {
        if self.locks.stripes == 0 {
            return Err(crate::Error::Config("locks.stripes must be > 0".to_string()));
        }
        if self.engine.max_retries == 0 {
            return Err(crate::Error::Config(
                "engine.max_retries must be > 0".to_string(),
            ));
        }
        if self.engine.event_channel_capacity == 0 {
            return Err(crate::Error::Config(
                "engine.event_channel_capacity must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}
