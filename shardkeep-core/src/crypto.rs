//! Cryptographic primitives for ShardKeep
//!
//! Provides:
//! - SHA-256 hashing (chunk digests, full-file digests, chunk naming)
//! - AES-256-GCM with detached tags (the chunk-blob format stores tag,
//!   nonce and key in the linked header, so ciphertext length equals
//!   plaintext length)
//! - Nonce generation for the upload worker

use crate::error::{Result, ShardKeepError};
use aes_gcm::{
    aead::{AeadInPlace, KeyInit, OsRng},
    Aes256Gcm, Nonce, Tag,
};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fmt;

/// AES-256-GCM key size (32 bytes)
pub const KEY_SIZE: usize = 32;

/// AES-GCM nonce size (12 bytes / 96 bits)
pub const NONCE_SIZE: usize = 12;

/// AES-GCM authentication tag size (16 bytes)
pub const TAG_SIZE: usize = 16;

/// SHA-256 digest size (32 bytes)
pub const DIGEST_SIZE: usize = 32;

/// SHA-256 of a byte slice
pub fn sha256(data: &[u8]) -> [u8; DIGEST_SIZE] {
    Sha256::digest(data).into()
}

/// AES-256-GCM encryption key
#[derive(Clone)]
pub struct EncryptionKey([u8; KEY_SIZE]);

impl EncryptionKey {
    /// Generate a new random encryption key
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        Self(key)
    }

    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Create from a slice (validates length)
    pub fn from_slice(slice: &[u8]) -> Result<Self> {
        if slice.len() != KEY_SIZE {
            return Err(ShardKeepError::InvalidKeyLength {
                expected: KEY_SIZE,
                actual: slice.len(),
            });
        }
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(slice);
        Ok(Self(key))
    }

    /// Get the raw key bytes
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncryptionKey([REDACTED])")
    }
}

impl Drop for EncryptionKey {
    fn drop(&mut self) {
        // Zeroize key on drop for security
        self.0.iter_mut().for_each(|b| *b = 0);
    }
}

/// Encrypt `buf` in place with empty associated data, returning the
/// detached authentication tag
pub fn seal_in_place(
    key: &[u8; KEY_SIZE],
    nonce: &[u8; NONCE_SIZE],
    buf: &mut [u8],
) -> Result<[u8; TAG_SIZE]> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| ShardKeepError::Encryption(e.to_string()))?;
    let tag = cipher
        .encrypt_in_place_detached(Nonce::from_slice(nonce), b"", buf)
        .map_err(|e| ShardKeepError::Encryption(e.to_string()))?;
    let mut out = [0u8; TAG_SIZE];
    out.copy_from_slice(&tag);
    Ok(out)
}

/// Decrypt `buf` in place, verifying the detached tag
pub fn open_in_place(
    key: &[u8; KEY_SIZE],
    nonce: &[u8; NONCE_SIZE],
    tag: &[u8; TAG_SIZE],
    buf: &mut [u8],
) -> Result<()> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| ShardKeepError::Decryption(e.to_string()))?;
    cipher
        .decrypt_in_place_detached(Nonce::from_slice(nonce), b"", buf, Tag::from_slice(tag))
        .map_err(|_| ShardKeepError::Decryption("authentication failed".to_string()))
}

/// Nonce source for the upload worker.
///
/// A wrapping 64-bit counter fills the first 8 bytes and 4 random bytes fill
/// the rest. The counter keeps nonces distinct within one worker lifetime;
/// the random suffix keeps collisions negligible across counter wrap-around.
pub struct NonceGenerator {
    counter: u64,
}

impl NonceGenerator {
    pub fn new() -> Self {
        Self { counter: 0 }
    }

    pub fn next_nonce(&mut self) -> [u8; NONCE_SIZE] {
        let mut nonce = [0u8; NONCE_SIZE];
        nonce[..8].copy_from_slice(&self.counter.to_be_bytes());
        self.counter = self.counter.wrapping_add(1);
        OsRng.fill_bytes(&mut nonce[8..]);
        nonce
    }
}

impl Default for NonceGenerator {
    fn default() -> Self {
        Self::new()
    }
}
