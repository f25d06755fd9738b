use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// How a logical operation is mapped onto engine transactions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// One transaction spans all three regions per logical operation.
    #[default]
    Atomic,
    /// One transaction per region per step. A failure between steps leaves
    /// the indexes inconsistent until [`Bucket::reconcile`] runs.
    ///
    /// [`Bucket::reconcile`]: crate::Bucket::reconcile
    Independent,
}

/// Durability of engine commits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Flush data and metadata on every commit.
    #[default]
    Full,
    /// Skip the metadata flush; the last commit may be lost on crash.
    NoMetaSync,
    /// Leave flushing to the OS and the maintenance task.
    NoSync,
}

/// Tuning knobs passed through to the embedded engine unmodified.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Maximum size of the memory map (and so of the database) in bytes.
    pub map_size: usize,
    /// Maximum number of concurrent read transactions.
    pub max_readers: u32,
    pub sync: SyncMode,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            map_size: 1024 * 1024 * 1024, // 1 GiB
            max_readers: 126,
            sync: SyncMode::default(),
        }
    }
}

/// Background maintenance task settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MaintenanceConfig {
    pub enabled: bool,
    /// Seconds between two maintenance passes.
    pub interval_secs: u64,
    /// Run the reconciliation pass on every tick.
    pub repair: bool,
}

impl MaintenanceConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 300,
            repair: false,
        }
    }
}

/// Configuration for a [`Bucket`](crate::Bucket).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BucketConfig {
    /// Directory under which each bucket gets its own unique subdirectory.
    pub base_dir: PathBuf,
    pub write_mode: WriteMode,
    /// Reject objects without a `contentType`.
    pub require_content_type: bool,
    /// Emit a debug event for every create, lookup and delete.
    pub log_operations: bool,
    pub engine: EngineConfig,
    pub maintenance: MaintenanceConfig,
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("/var/lib/quiver"),
            write_mode: WriteMode::default(),
            require_content_type: false,
            log_operations: true,
            engine: EngineConfig::default(),
            maintenance: MaintenanceConfig::default(),
        }
    }
}

impl BucketConfig {
    /// Default configuration rooted at `base_dir`.
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            ..Default::default()
        }
    }

    pub fn from_toml_str(s: &str) -> StoreResult<Self> {
        toml::from_str(s).map_err(|e| StoreError::Config(e.to_string()))
    }

    pub fn from_toml_file(path: &Path) -> StoreResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}
