//! Error types for ShardKeep
//!
//! Provides a unified error type for all ShardKeep operations.

use thiserror::Error;

/// Result type alias for ShardKeep operations
pub type Result<T> = std::result::Result<T, ShardKeepError>;

/// Unified error type for ShardKeep
#[derive(Error, Debug)]
pub enum ShardKeepError {
    // ===== Erasure Coding Errors =====
    #[error("Invalid coding parameters: {0}")]
    InvalidCoding(String),

    #[error("Singular matrix")]
    Singular,

    #[error("Excluded set size mismatch: expected {expected}, got {actual}")]
    ExcludedSetMismatch { expected: usize, actual: usize },

    #[error("Shard count mismatch: expected {expected}, got {actual}")]
    ShardCountMismatch { expected: usize, actual: usize },

    #[error("Corrupt shard stream: {0}")]
    CorruptStream(String),

    // ===== Cryptography Errors =====
    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Decryption error: {0}")]
    Decryption(String),

    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    // ===== Chunk & Pipeline Errors =====
    #[error("Header truncated: expected {expected} bytes, got {actual}")]
    HeaderTruncated { expected: usize, actual: usize },

    #[error("Chunk count mismatch: expected {expected}, read {actual}")]
    ChunkCountMismatch { expected: u64, actual: u64 },

    #[error("Source size mismatch: stated {stated}, measured {measured}")]
    SizeMismatch { stated: u64, measured: u64 },

    #[error("Chunk chain broken: {0}")]
    ChainBroken(String),

    #[error("Pipeline already started")]
    AlreadyStarted,

    // ===== Network Errors =====
    #[error("Network error: {0}")]
    Network(String),

    // ===== I/O Errors =====
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // ===== Configuration Errors =====
    #[error("Configuration error: {0}")]
    Configuration(String),
}
