//! ShardKeep Core Library
//!
//! Core primitives for the ShardKeep dispersed-storage client.
//! This crate provides:
//! - Cauchy-matrix erasure coding over GF(2^m) with binary projection
//! - The fixed chunk format and its reverse-linked header chain
//! - Cryptographic primitives (SHA-256 naming, AES-256-GCM with detached tags)
//! - Common types and error handling

pub mod chunk;
pub mod crypto;
pub mod erasure;
pub mod error;
pub mod gf;

pub use chunk::{AeadMaterial, ChunkHeader, ChunkName, NextChunk, StoredFile, CHUNK_SIZE, HEADER_SIZE};
pub use crypto::{EncryptionKey, NonceGenerator};
pub use erasure::{ErasureCoder, WordWidth};
pub use error::{Result, ShardKeepError};

/// Default dispersal configuration
/// - 5 buckets, one shard per bucket
/// - any 3 shards reconstruct a chunk
/// - up to 2 bucket failures tolerated per chunk
pub const DEFAULT_SHARD_COUNT: usize = 5;
pub const DEFAULT_SHARDS_REQUIRED: usize = 3;
