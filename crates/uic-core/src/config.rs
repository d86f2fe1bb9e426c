//! Cache configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use uic_error::{Result, UicError};
use uic_freq::RearmPolicy;
use uic_types::{DEFAULT_MAX_ENTRIES, DEFAULT_MONITOR_CAPACITY};

/// Tunables for one [`crate::Coordinator`].
///
/// Every field has a default, so a JSON file only needs the fields it
/// changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Content store budget in pages.
    pub max_entries: usize,
    /// Content store index shards (0 = one per available core, up to 16).
    pub shard_count: usize,
    /// Table capacity for scopes armed without an explicit capacity.
    pub default_capacity: u16,
    /// What re-arming a monitored scope does to its history.
    pub rearm_policy: RearmPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            shard_count: 0,
            default_capacity: DEFAULT_MONITOR_CAPACITY,
            rearm_policy: RearmPolicy::Decay,
        }
    }
}

impl CacheConfig {
    /// Shard count with `0` resolved against the machine.
    #[must_use]
    pub fn resolved_shards(&self) -> usize {
        if self.shard_count == 0 {
            std::thread::available_parallelism().map_or(4, |n| n.get().min(16))
        } else {
            self.shard_count
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_entries == 0 {
            return Err(UicError::Config("max_entries must be > 0".to_owned()));
        }
        if self.default_capacity == 0 {
            return Err(UicError::Config("default_capacity must be > 0".to_owned()));
        }
        Ok(())
    }

    /// Parse and validate a JSON document.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(text).map_err(|err| UicError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }
}
