//! Client configuration
//!
//! Handles loading pipeline and bucket-set configuration.
//!
//! Config file format (TOML):
//! ```toml
//! [coding]
//! shard_count = 5
//! shards_required = 3
//! word_width = 8
//!
//! # Hex-encoded 32-byte AEAD key; generated when absent
//! key = "0000000000000000000000000000000000000000000000000000000000000000"
//!
//! [[buckets]]
//! url = "https://bucket-a.example/shardkeep"
//! access_token = "..."
//!
//! [[buckets]]
//! url = "https://bucket-b.example/shardkeep"
//! ```

use serde::{Deserialize, Serialize};
use shardkeep_core::crypto::{EncryptionKey, KEY_SIZE};
use shardkeep_core::erasure::{ErasureCoder, WordWidth};
use shardkeep_core::error::{Result, ShardKeepError};
use shardkeep_core::{DEFAULT_SHARDS_REQUIRED, DEFAULT_SHARD_COUNT};
use std::fs;
use std::path::Path;

/// Erasure dispersal parameters
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CodingConfig {
    /// Number of buckets, one shard per bucket (N)
    #[serde(default = "default_shard_count")]
    pub shard_count: usize,

    /// Shards needed to reconstruct a chunk (K)
    #[serde(default = "default_shards_required")]
    pub shards_required: usize,

    /// Coding word width in bytes (1, 4 or 8)
    #[serde(default)]
    pub word_width: WordWidth,
}

impl Default for CodingConfig {
    fn default() -> Self {
        Self {
            shard_count: default_shard_count(),
            shards_required: default_shards_required(),
            word_width: WordWidth::default(),
        }
    }
}

fn default_shard_count() -> usize {
    std::env::var("SHARDKEEP_SHARD_COUNT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_SHARD_COUNT)
}

fn default_shards_required() -> usize {
    std::env::var("SHARDKEEP_SHARDS_REQUIRED")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_SHARDS_REQUIRED)
}

fn default_queue_capacity() -> usize {
    16
}

/// One bucket of the set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketConfig {
    /// Base URL; objects live at `{url}/{hex(chunk_name)}`
    pub url: String,

    /// Bearer token attached to every request against this bucket
    #[serde(default)]
    pub access_token: Option<String>,
}

impl BucketConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            access_token: None,
        }
    }
}

/// Full client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Dispersal parameters
    #[serde(default)]
    pub coding: CodingConfig,

    /// Hex-encoded 32-byte AEAD key; a fresh key is generated when absent
    #[serde(default)]
    pub key: Option<String>,

    /// The bucket set, one entry per shard index
    #[serde(default)]
    pub buckets: Vec<BucketConfig>,

    /// Initial allocation of the pipeline job queues
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            coding: CodingConfig::default(),
            key: None,
            buckets: Vec::new(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl ClientConfig {
    /// Load from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&text)
            .map_err(|e| ShardKeepError::Configuration(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Configuration for a known bucket list (tests and programmatic use)
    pub fn for_buckets(
        buckets: Vec<BucketConfig>,
        shard_count: usize,
        shards_required: usize,
    ) -> Self {
        Self {
            coding: CodingConfig {
                shard_count,
                shards_required,
                word_width: WordWidth::default(),
            },
            key: None,
            buckets,
            queue_capacity: default_queue_capacity(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.coding.shards_required == 0
            || self.coding.shards_required > self.coding.shard_count
        {
            return Err(ShardKeepError::Configuration(format!(
                "{} of {} shards required",
                self.coding.shards_required, self.coding.shard_count
            )));
        }
        if !self.buckets.is_empty() && self.buckets.len() != self.coding.shard_count {
            return Err(ShardKeepError::Configuration(format!(
                "{} buckets configured for {} shards",
                self.buckets.len(),
                self.coding.shard_count
            )));
        }
        if let Some(key) = &self.key {
            self.parse_key(key)?;
        }
        Ok(())
    }

    /// The configured AEAD key, or a freshly generated one
    pub fn encryption_key(&self) -> Result<EncryptionKey> {
        match &self.key {
            Some(key) => self.parse_key(key),
            None => Ok(EncryptionKey::generate()),
        }
    }

    /// Erasure coder matching the configured dispersal parameters
    pub fn coder(&self) -> Result<ErasureCoder> {
        ErasureCoder::new(
            self.coding.shard_count,
            self.coding.shards_required,
            self.coding.word_width,
        )
    }

    fn parse_key(&self, key: &str) -> Result<EncryptionKey> {
        let bytes = hex::decode(key)
            .map_err(|e| ShardKeepError::Configuration(format!("invalid key hex: {}", e)))?;
        if bytes.len() != KEY_SIZE {
            return Err(ShardKeepError::InvalidKeyLength {
                expected: KEY_SIZE,
                actual: bytes.len(),
            });
        }
        EncryptionKey::from_slice(&bytes)
    }
}
