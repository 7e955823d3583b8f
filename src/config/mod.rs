//! Storage settings and connection profiles

pub mod profile;
pub mod storage;

use serde::{Deserialize, Serialize};

pub use profile::Profile;
pub use storage::{config_dir, ConfigStorage, StorageError};

use crate::listing::ListFilter;
use crate::transfer::{BatchOptions, ChunkingConfig, RetryPolicy};

/// Current settings file version
pub const CONFIG_VERSION: u32 = 1;

fn default_version() -> u32 {
    CONFIG_VERSION
}

/// Tunables for the storage layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    /// Default listing filter for the file browser
    #[serde(default)]
    pub list: ListFilter,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            retry: RetryPolicy::default(),
            chunking: ChunkingConfig::default(),
            list: ListFilter::default(),
        }
    }
}

impl StorageConfig {
    /// Batch options carrying the configured chunking
    pub fn batch_options(&self) -> BatchOptions {
        BatchOptions::new().with_chunking(self.chunking)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: StorageConfig =
            serde_json::from_str(r#"{"retry": {"max_attempts": 5}}"#).unwrap();
        assert_eq!(config.version, CONFIG_VERSION);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay_ms, 200);
        assert_eq!(config.chunking, ChunkingConfig::default());
        assert_eq!(config.batch_options().chunking, ChunkingConfig::default());
    }
}
