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

    /// Conflict-retry configuration
    pub retry: RetryConfig,

    /// Idempotency deduplication configuration
    pub idempotency: IdempotencyConfig,

    /// Business-rule policy flags
    pub policy: PolicyConfig,

    /// RocksDB configuration
    pub rocksdb: RocksDbConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/chip-ledger"),
            service_name: "chip-ledger".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            retry: RetryConfig::default(),
            idempotency: IdempotencyConfig::default(),
            policy: PolicyConfig::default(),
            rocksdb: RocksDbConfig::default(),
        }
    }
}

/// Conflict-retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum CAS attempts per operation
    pub max_attempts: u32,

    /// Base backoff per attempt (milliseconds); jittered up to attempt * base
    pub backoff_base_ms: u64,

    /// Upper bound on a single backoff sleep (milliseconds)
    pub backoff_cap_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_base_ms: 5,
            backoff_cap_ms: 50,
        }
    }
}

/// Idempotency deduplication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyConfig {
    /// How long a record deduplicates retries (seconds)
    pub ttl_secs: u64,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 86_400, // 24h window bounds storage growth
        }
    }
}

/// Business-rule policy flags
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Whether a manual adjustment may drive a balance below zero
    pub allow_negative_adjust: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            allow_negative_adjust: false,
        }
    }
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RocksDbConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max write buffers
    pub max_write_buffer_number: i32,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// Enable statistics
    pub enable_statistics: bool,
}

impl Default for RocksDbConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 64,
            max_write_buffer_number: 4,
            max_background_jobs: 2,
            enable_statistics: false,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(data_dir) = std::env::var("CHIP_LEDGER_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(attempts) = std::env::var("CHIP_LEDGER_MAX_ATTEMPTS") {
            config.retry.max_attempts = attempts
                .parse()
                .map_err(|e| crate::Error::Config(format!("CHIP_LEDGER_MAX_ATTEMPTS: {}", e)))?;
        }

        if let Ok(flag) = std::env::var("CHIP_LEDGER_ALLOW_NEGATIVE_ADJUST") {
            config.policy.allow_negative_adjust = flag == "1" || flag.eq_ignore_ascii_case("true");
        }

        Ok(config)
    }
}
