//! Batch log configuration via `batchlog.toml`
//!
//! Every field has a default, so an empty file is a valid configuration.
//! The manager takes a `BatchlogConfig` by value and never reads files
//! itself; loading is left to the embedding process.

use batchlog_durability::{StoreOptions, SyncMode};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file name placed next to the batch log.
pub const CONFIG_FILE_NAME: &str = "batchlog.toml";

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read or written
    #[error("Config file '{path}': {source}")]
    Io {
        /// File that failed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML for this struct
    #[error("Failed to parse config file '{path}': {detail}")]
    Parse {
        /// File that failed
        path: PathBuf,
        /// Parser message
        detail: String,
    },

    /// Config could not be serialized
    #[error("Failed to serialize config: {0}")]
    Serialize(String),

    /// A value is out of range
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Batch log configuration loaded from `batchlog.toml`.
///
/// # Example
///
/// ```toml
/// # Entries younger than this are left for the coordinator to delete
/// replay_timeout_ms = 4000
/// replay_interval_ms = 60000
/// sync = "batched"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BatchlogConfig {
    /// Minimum age before an entry is replayed.
    pub replay_timeout_ms: u64,
    /// Delay between scheduled replay passes.
    pub replay_interval_ms: u64,
    /// Deadline for applying all mutations of one entry in one pass.
    pub apply_timeout_ms: u64,
    /// Replayed payload budget in KiB per second. 0 disables throttling.
    pub replay_throttle_kib: u64,
    /// Threads applying replayed mutations.
    pub apply_workers: usize,
    /// Queued mutation applications before the pool pushes back.
    pub apply_queue_depth: usize,
    /// File store sync mode: `"batched"` or `"always"`.
    pub sync: String,
    /// Longest time a batched write stays unsynced. 0 leaves syncing to `flush`.
    pub sync_interval_ms: u64,
    /// Dead records before the file store considers compacting.
    pub compaction_min_garbage: u64,
    /// Fraction of dead records that triggers compaction.
    pub compaction_garbage_ratio: f64,
}

impl Default for BatchlogConfig {
    fn default() -> Self {
        Self {
            // Twice the 2s write request timeout
            replay_timeout_ms: 4000,
            replay_interval_ms: 60_000,
            apply_timeout_ms: 2000,
            replay_throttle_kib: 1024,
            apply_workers: 4,
            apply_queue_depth: 4096,
            sync: SyncMode::Batched.as_str().to_string(),
            sync_interval_ms: 100,
            compaction_min_garbage: 1024,
            compaction_garbage_ratio: 0.5,
        }
    }
}

impl BatchlogConfig {
    /// Replay eligibility window
    pub fn replay_timeout(&self) -> Duration {
        Duration::from_millis(self.replay_timeout_ms)
    }

    /// Scheduler cadence
    pub fn replay_interval(&self) -> Duration {
        Duration::from_millis(self.replay_interval_ms)
    }

    /// Per-entry apply deadline
    pub fn apply_timeout(&self) -> Duration {
        Duration::from_millis(self.apply_timeout_ms)
    }

    /// Throttle in bytes per second, `None` when disabled
    pub fn throttle_bytes_per_sec(&self) -> Option<u64> {
        match self.replay_throttle_kib {
            0 => None,
            kib => Some(kib.saturating_mul(1024)),
        }
    }

    /// Parse the sync string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not `"batched"` or `"always"`.
    pub fn sync_mode(&self) -> Result<SyncMode, ConfigError> {
        self.sync.parse().map_err(ConfigError::Invalid)
    }

    /// Options for a file-backed store
    pub fn store_options(&self) -> Result<StoreOptions, ConfigError> {
        Ok(StoreOptions {
            sync: self.sync_mode()?,
            sync_interval: Duration::from_millis(self.sync_interval_ms),
            compaction_min_garbage: self.compaction_min_garbage,
            compaction_garbage_ratio: self.compaction_garbage_ratio,
        })
    }

    /// Check every value is in range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.replay_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "replay_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.apply_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "apply_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.apply_workers == 0 {
            return Err(ConfigError::Invalid(
                "apply_workers must be at least 1".to_string(),
            ));
        }
        if self.apply_queue_depth == 0 {
            return Err(ConfigError::Invalid(
                "apply_queue_depth must be at least 1".to_string(),
            ));
        }
        if !(self.compaction_garbage_ratio > 0.0 && self.compaction_garbage_ratio <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "compaction_garbage_ratio must be in (0, 1], got {}",
                self.compaction_garbage_ratio
            )));
        }
        self.sync_mode()?;
        Ok(())
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Batch log configuration
#
# Minimum age of a batch before replay picks it up (milliseconds).
# Younger batches are still in their direct-delivery window.
replay_timeout_ms = 4000

# Delay between scheduled replay passes (milliseconds)
replay_interval_ms = 60000

# Deadline for applying one batch's mutations during replay (milliseconds).
# A batch that misses it stays in the log for the next pass.
apply_timeout_ms = 2000

# Replayed payload budget in KiB per second (0 = unthrottled)
replay_throttle_kib = 1024

# Worker threads applying replayed mutations, and their queue bound
apply_workers = 4
apply_queue_depth = 4096

# Sync mode: "batched" (default) or "always"
#   "batched" = fsync every sync_interval_ms, a machine crash may lose
#               the last interval (a process crash loses nothing)
#   "always"  = fsync every append
sync = "batched"
sync_interval_ms = 100

# Compaction of the log file: at least this many dead records,
# making up at least this fraction of the file
compaction_min_garbage = 1024
compaction_garbage_ratio = 0.5
"#
    }

    /// Read, parse and validate config from a file path.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: BatchlogConfig =
            toml::from_str(&content).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                detail: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    ///
    /// Returns `Ok(())` whether the file was created or already existed.
    pub fn write_default_if_missing(path: &Path) -> Result<(), ConfigError> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?;
        std::fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}
