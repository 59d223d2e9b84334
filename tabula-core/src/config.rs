//! Engine configuration, stored as TOML.
//!
//! Every tunable lives here and is handed to the engine when a
//! [`ValueStore`](crate::ValueStore) is built; nothing is process-global.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::Result;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub chunking: ChunkConfig,
    pub edits: EditConfig,
    pub diff: DiffConfig,
    pub store: StoreConfig,
    pub user: UserConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Content-defined chunk boundary parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkConfig {
    /// Bytes in the rolling hash window.
    pub window_size: usize,
    /// A boundary fires when the low `pattern_bits` bits of the window hash are all set.
    pub pattern_bits: u32,
    /// No hash-triggered boundary before a chunk holds this many items.
    pub min_chunk_items: usize,
    /// A boundary is forced once a chunk reaches this many bytes.
    pub max_chunk_bytes: usize,
    pub seed: u64,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        ChunkConfig {
            window_size: 64,
            pattern_bits: 12,
            min_chunk_items: 2,
            max_chunk_bytes: 64 * 1024,
            seed: 42,
        }
    }
}

/// Edit accumulator sharding.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditConfig {
    pub shard_count: usize,
    pub min_shard_size: usize,
}

impl Default for EditConfig {
    fn default() -> Self {
        EditConfig {
            shard_count: 4,
            min_shard_size: 16 * 1024,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiffConfig {
    /// Capacity of the channel between the diff worker and its consumer.
    pub buffer_size: usize,
    pub wait_timeout_ms: u64,
}

impl DiffConfig {
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }
}

impl Default for DiffConfig {
    fn default() -> Self {
        DiffConfig {
            buffer_size: 1024,
            wait_timeout_ms: 1000,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Decoded nodes kept in the LRU cache.
    pub cache_size: usize,
    pub default_branch: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            cache_size: 1024,
            default_branch: "master".to_string(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}
