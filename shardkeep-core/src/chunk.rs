//! Chunk format and the reverse-linked header chain
//!
//! A file is stored as fixed-size chunks. Each chunk is prefixed with a
//! fixed-layout header, the pair is AES-256-GCM encrypted as one blob, and
//! the blob's SHA-256 becomes the chunk name (and object key, hex-encoded).
//!
//! The header of chunk i names the encrypted blob of chunk i+1 together with
//! the material needed to open it. Because a chunk's name depends on its own
//! header, and that header embeds the next chunk's name, headers can only be
//! finalized walking the chunks in reverse order: the upload pipeline
//! encrypts chunk N-1 first and chunk 0 last.

use crate::crypto::{DIGEST_SIZE, KEY_SIZE, NONCE_SIZE, TAG_SIZE};
use crate::error::{Result, ShardKeepError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Plaintext bytes per chunk; the last chunk of a file may be shorter
pub const CHUNK_SIZE: usize = 4096;

/// Serialized header length: three digests, then the tag, nonce and key for
/// the next chunk, in that order with no padding
pub const HEADER_SIZE: usize = 3 * DIGEST_SIZE + TAG_SIZE + NONCE_SIZE + KEY_SIZE;

/// SHA-256 of a chunk's encrypted blob; doubles as the object key
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ChunkName([u8; DIGEST_SIZE]);

impl ChunkName {
    pub fn from_bytes(bytes: [u8; DIGEST_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_SIZE] {
        &self.0
    }

    /// Hex form used as the object key under each bucket
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s)
            .map_err(|e| ShardKeepError::Configuration(format!("invalid chunk name: {}", e)))?;
        if bytes.len() != DIGEST_SIZE {
            return Err(ShardKeepError::Configuration(format!(
                "invalid chunk name length: expected {}, got {}",
                DIGEST_SIZE,
                bytes.len()
            )));
        }
        let mut arr = [0u8; DIGEST_SIZE];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    /// Terminal chunks carry an all-zero next name
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }
}

impl fmt::Debug for ChunkName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkName({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for ChunkName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// AEAD material for opening one encrypted chunk blob
#[derive(Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AeadMaterial {
    pub tag: [u8; TAG_SIZE],
    pub nonce: [u8; NONCE_SIZE],
    pub key: [u8; KEY_SIZE],
}

impl fmt::Debug for AeadMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AeadMaterial")
            .field("tag", &hex::encode(self.tag))
            .field("nonce", &hex::encode(self.nonce))
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// Link to the next chunk in the chain; all zero for the terminal chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NextChunk {
    /// SHA-256 of the next chunk's encrypted blob
    pub blob_digest: ChunkName,
    /// Material that opens the next chunk's blob
    pub encryption: AeadMaterial,
}

/// Fixed-size record placed in front of each chunk's payload before
/// encryption
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChunkHeader {
    /// SHA-256 of this chunk's plaintext payload
    pub chunk_digest: [u8; DIGEST_SIZE],
    /// SHA-256 over the whole file's plaintext; nonzero only in chunk 0
    pub file_digest: [u8; DIGEST_SIZE],
    /// Link to the next chunk
    pub next: NextChunk,
}

impl ChunkHeader {
    /// Serialize into the leading `HEADER_SIZE` bytes of `out`
    pub fn write_to(&self, out: &mut [u8]) {
        let mut at = 0;
        for part in [
            &self.chunk_digest[..],
            &self.file_digest[..],
            &self.next.blob_digest.0[..],
            &self.next.encryption.tag[..],
            &self.next.encryption.nonce[..],
            &self.next.encryption.key[..],
        ] {
            out[at..at + part.len()].copy_from_slice(part);
            at += part.len();
        }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        self.write_to(&mut out);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(ShardKeepError::HeaderTruncated {
                expected: HEADER_SIZE,
                actual: bytes.len(),
            });
        }
        let mut header = Self::default();
        let (digests, material) = bytes[..HEADER_SIZE].split_at(3 * DIGEST_SIZE);
        header.chunk_digest.copy_from_slice(&digests[..DIGEST_SIZE]);
        header
            .file_digest
            .copy_from_slice(&digests[DIGEST_SIZE..2 * DIGEST_SIZE]);
        header
            .next
            .blob_digest
            .0
            .copy_from_slice(&digests[2 * DIGEST_SIZE..]);
        let (tag, rest) = material.split_at(TAG_SIZE);
        let (nonce, key) = rest.split_at(NONCE_SIZE);
        header.next.encryption.tag.copy_from_slice(tag);
        header.next.encryption.nonce.copy_from_slice(nonce);
        header.next.encryption.key.copy_from_slice(key);
        Ok(header)
    }
}

/// Per-file manifest emitted by the upload pipeline; everything the download
/// pipeline needs to walk the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredFile {
    /// Name of chunk 0's encrypted blob
    pub first_name: ChunkName,
    /// Material that opens chunk 0
    pub encryption: AeadMaterial,
    /// Number of chunks in the chain
    pub chunk_count: u64,
}

/// Chunks needed for a file of `size` bytes, at least one
pub fn chunk_count_for_size(size: u64) -> u64 {
    size.div_ceil(CHUNK_SIZE as u64).max(1)
}

/// Byte offset of chunk `index` within the file
pub fn chunk_offset(index: u64) -> u64 {
    index * CHUNK_SIZE as u64
}

/// Payload length of chunk `index` in a file of `size` bytes
pub fn chunk_len(size: u64, index: u64) -> usize {
    let offset = chunk_offset(index);
    if offset >= size {
        0
    } else {
        (size - offset).min(CHUNK_SIZE as u64) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_size() {
        assert_eq!(HEADER_SIZE, 156);
    }

    #[test]
    fn test_header_roundtrip() {
        let header = ChunkHeader {
            chunk_digest: [0x11; DIGEST_SIZE],
            file_digest: [0x22; DIGEST_SIZE],
            next: NextChunk {
                blob_digest: ChunkName::from_bytes([0x33; DIGEST_SIZE]),
                encryption: AeadMaterial {
                    tag: [0x44; TAG_SIZE],
                    nonce: [0x55; NONCE_SIZE],
                    key: [0x66; KEY_SIZE],
                },
            },
        };
        let bytes = header.to_bytes();
        assert_eq!(ChunkHeader::from_bytes(&bytes).unwrap(), header);
    }

    #[test]
    fn test_header_field_order() {
        let mut header = ChunkHeader::default();
        header.chunk_digest[0] = 0xAA;
        header.file_digest[0] = 0xBB;
        header.next.blob_digest.0[0] = 0xCC;
        header.next.encryption.tag[0] = 0xDD;
        header.next.encryption.nonce[0] = 0xEE;
        header.next.encryption.key[0] = 0xFF;
        let bytes = header.to_bytes();
        assert_eq!(bytes[0], 0xAA);
        assert_eq!(bytes[32], 0xBB);
        assert_eq!(bytes[64], 0xCC);
        assert_eq!(bytes[96], 0xDD);
        assert_eq!(bytes[112], 0xEE);
        assert_eq!(bytes[124], 0xFF);
    }

    #[test]
    fn test_header_truncated() {
        let bytes = [0u8; HEADER_SIZE - 1];
        assert!(matches!(
            ChunkHeader::from_bytes(&bytes),
            Err(ShardKeepError::HeaderTruncated { .. })
        ));
    }

    #[test]
    fn test_chunk_counts() {
        let size = CHUNK_SIZE as u64;
        assert_eq!(chunk_count_for_size(0), 1);
        assert_eq!(chunk_count_for_size(1), 1);
        assert_eq!(chunk_count_for_size(size), 1);
        assert_eq!(chunk_count_for_size(size + 1), 2);
        assert_eq!(chunk_count_for_size(10 * size + 17), 11);
    }

    #[test]
    fn test_chunk_lens() {
        let size = CHUNK_SIZE as u64 + 1;
        assert_eq!(chunk_len(size, 0), CHUNK_SIZE);
        assert_eq!(chunk_len(size, 1), 1);
        assert_eq!(chunk_len(0, 0), 0);
        assert_eq!(chunk_offset(3), 3 * CHUNK_SIZE as u64);
    }

    #[test]
    fn test_chunk_name_hex_roundtrip() {
        let name = ChunkName::from_bytes([0xA5; DIGEST_SIZE]);
        let hex = name.to_hex();
        assert_eq!(hex.len(), 64);
        assert_eq!(ChunkName::from_hex(&hex).unwrap(), name);
        assert!(ChunkName::from_hex("a5a5").is_err());
        assert!(ChunkName::from_hex("not hex").is_err());
    }

    #[test]
    fn test_zero_name() {
        assert!(ChunkName::default().is_zero());
        assert!(!ChunkName::from_bytes([1; DIGEST_SIZE]).is_zero());
    }

    #[test]
    fn test_material_debug_redacts_key() {
        let material = AeadMaterial {
            tag: [1; TAG_SIZE],
            nonce: [2; NONCE_SIZE],
            key: [3; KEY_SIZE],
        };
        let rendered = format!("{:?}", material);
        assert!(rendered.contains("REDACTED"));
        assert!(!rendered.contains("030303"));
    }
}
