//! Cauchy erasure coding
//!
//! Streams one input into N shard writers and K surviving shard readers back
//! into one output. A chunk is processed in data blocks of `w*m*K` bytes
//! (`w` = word width, `m` = field bits, `K` = shards required); each block
//! expands to `w*m` bytes per shard. Any K of the N shards reconstruct the
//! input, so up to N-K bucket losses are tolerated per chunk.
//!
//! The generator is a Cauchy matrix projected to GF(2), which turns the
//! per-block matrix multiplication into XOR of word lanes.

use crate::error::{Result, ShardKeepError};
use crate::gf::{BitMatrix, GfField, Matrix};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// Largest data block the end-of-stream sentinel can describe.
///
/// The final block's payload length is recorded in its last byte, so the
/// block must not exceed 256 bytes.
const MAX_DATA_BLOCK: usize = 256;

/// Width of one coding word in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum WordWidth {
    W1,
    W4,
    W8,
}

impl WordWidth {
    pub fn bytes(self) -> usize {
        match self {
            WordWidth::W1 => 1,
            WordWidth::W4 => 4,
            WordWidth::W8 => 8,
        }
    }
}

impl Default for WordWidth {
    fn default() -> Self {
        WordWidth::W8
    }
}

impl TryFrom<u8> for WordWidth {
    type Error = ShardKeepError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(WordWidth::W1),
            4 => Ok(WordWidth::W4),
            8 => Ok(WordWidth::W8),
            other => Err(ShardKeepError::InvalidCoding(format!(
                "word width {} not one of 1, 4, 8",
                other
            ))),
        }
    }
}

impl From<WordWidth> for u8 {
    fn from(value: WordWidth) -> Self {
        value.bytes() as u8
    }
}

/// Streaming (N, K) erasure encoder/decoder
pub struct ErasureCoder {
    shard_count: usize,
    shards_required: usize,
    word: WordWidth,
    field: GfField,
    generator: Matrix,
    encode_matrix: BitMatrix,
}

impl ErasureCoder {
    /// Create a coder dispersing over `shard_count` shards, any
    /// `shards_required` of which reconstruct the input.
    pub fn new(shard_count: usize, shards_required: usize, word: WordWidth) -> Result<Self> {
        if shards_required == 0 || shards_required > shard_count {
            return Err(ShardKeepError::InvalidCoding(format!(
                "{} of {} shards required",
                shards_required, shard_count
            )));
        }
        let field = GfField::for_elements(shard_count + shards_required)?;
        let data_block = word.bytes() * field.bits() * shards_required;
        if data_block > MAX_DATA_BLOCK {
            return Err(ShardKeepError::InvalidCoding(format!(
                "data block of {} bytes exceeds the {}-byte sentinel range",
                data_block, MAX_DATA_BLOCK
            )));
        }
        let generator = Matrix::cauchy(field, shard_count, shards_required)?;
        let encode_matrix = generator.to_binary();
        Ok(Self {
            shard_count,
            shards_required,
            word,
            field,
            generator,
            encode_matrix,
        })
    }

    pub fn shard_count(&self) -> usize {
        self.shard_count
    }

    pub fn shards_required(&self) -> usize {
        self.shards_required
    }

    pub fn word_width(&self) -> WordWidth {
        self.word
    }

    /// Bits per field element
    pub fn element_bits(&self) -> usize {
        self.field.bits()
    }

    /// Bytes each shard receives per data block
    pub fn shard_block_len(&self) -> usize {
        self.word.bytes() * self.field.bits()
    }

    /// Input bytes consumed per coding round
    pub fn data_block_len(&self) -> usize {
        self.shard_block_len() * self.shards_required
    }

    /// Output bytes produced per coding round, across all shards
    pub fn code_block_len(&self) -> usize {
        self.shard_block_len() * self.shard_count
    }

    /// Total bytes written across all shards for a `plain_len`-byte input.
    ///
    /// Progress denominator. The trailing sentinel block emitted when the
    /// input length is an exact multiple of the data block is not counted;
    /// progress consumers clamp at 100.
    pub fn total_encoded_size(&self, plain_len: u64) -> u64 {
        plain_len.div_ceil(self.data_block_len() as u64) * self.code_block_len() as u64
    }

    /// Encode `input` into `shards`, one writer per shard.
    ///
    /// The final (short or empty) block is zero-padded and its payload byte
    /// count is stored in the block's last byte, so every encoded stream ends
    /// with a short block. Returns the number of input bytes consumed.
    pub fn encode<R, W>(&self, input: &mut R, shards: &mut [W]) -> Result<u64>
    where
        R: Read + ?Sized,
        W: Write,
    {
        if shards.len() != self.shard_count {
            return Err(ShardKeepError::ShardCountMismatch {
                expected: self.shard_count,
                actual: shards.len(),
            });
        }

        let w = self.word.bytes();
        let m = self.field.bits();
        let data_block = self.data_block_len();
        let mut block = vec![0u8; data_block];
        let mut data = vec![0u64; m * self.shards_required];
        let mut code = vec![0u64; m * self.shard_count];
        let mut consumed = 0u64;

        loop {
            let got = read_full(input, &mut block)?;
            consumed += got as u64;
            let last = got < data_block;
            if last {
                block[got..].fill(0);
                block[data_block - 1] = got as u8;
            }

            for (lane, word) in data.iter_mut().enumerate() {
                *word = unpack_word(&block[lane * w..(lane + 1) * w]);
            }
            xor_reduce(&self.encode_matrix, &data, &mut code);
            let mut out = [0u8; 8];
            for (lane, &word) in code.iter().enumerate() {
                pack_word(word, &mut out[..w]);
                shards[lane / m].write_all(&out[..w])?;
            }

            if last {
                return Ok(consumed);
            }
        }
    }

    /// Decode K surviving shard readers into `output`.
    ///
    /// `excluded` names the N-K missing shard indices; `shards` holds the
    /// survivors in ascending shard order. Returns the number of plaintext
    /// bytes produced.
    pub fn decode<R, W>(&self, shards: &mut [R], excluded: &[usize], output: &mut W) -> Result<u64>
    where
        R: Read,
        W: Write + ?Sized,
    {
        let survivors = self.surviving_shards(excluded)?;
        if shards.len() != self.shards_required {
            return Err(ShardKeepError::ShardCountMismatch {
                expected: self.shards_required,
                actual: shards.len(),
            });
        }

        let all_cols: Vec<usize> = (0..self.shards_required).collect();
        let decode_matrix = self
            .generator
            .submatrix(&survivors, &all_cols)
            .inverted()?
            .to_binary();

        let w = self.word.bytes();
        let m = self.field.bits();
        let data_block = self.data_block_len();
        let mut lanes = vec![0u64; m * self.shards_required];
        let mut data = vec![0u64; m * self.shards_required];
        let mut current = vec![0u8; data_block];
        let mut held = vec![0u8; data_block];
        let mut have_held = false;
        let mut produced = 0u64;

        loop {
            if !read_code_block(shards, &mut lanes, w, m)? {
                break;
            }
            xor_reduce(&decode_matrix, &lanes, &mut data);
            for (lane, &word) in data.iter().enumerate() {
                pack_word(word, &mut current[lane * w..(lane + 1) * w]);
            }
            if have_held {
                output.write_all(&held)?;
                produced += data_block as u64;
            }
            std::mem::swap(&mut current, &mut held);
            have_held = true;
        }

        if have_held {
            // The held block is the terminal one; its last byte names the
            // payload length.
            let len = held[data_block - 1] as usize;
            if len >= data_block {
                return Err(ShardKeepError::CorruptStream(format!(
                    "terminal block claims {} payload bytes in a {}-byte block",
                    len, data_block
                )));
            }
            output.write_all(&held[..len])?;
            produced += len as u64;
        }

        Ok(produced)
    }

    /// Surviving shard indices in ascending order, validating `excluded`
    fn surviving_shards(&self, excluded: &[usize]) -> Result<Vec<usize>> {
        let expected = self.shard_count - self.shards_required;
        if excluded.len() != expected {
            return Err(ShardKeepError::ExcludedSetMismatch {
                expected,
                actual: excluded.len(),
            });
        }
        let mut missing = vec![false; self.shard_count];
        for &index in excluded {
            if index >= self.shard_count {
                return Err(ShardKeepError::InvalidCoding(format!(
                    "excluded shard {} out of range 0..{}",
                    index, self.shard_count
                )));
            }
            if missing[index] {
                return Err(ShardKeepError::InvalidCoding(format!(
                    "excluded shard {} listed twice",
                    index
                )));
            }
            missing[index] = true;
        }
        Ok((0..self.shard_count).filter(|&i| !missing[i]).collect())
    }
}

/// XOR together the input lanes selected by each bit row
fn xor_reduce(matrix: &BitMatrix, input: &[u64], output: &mut [u64]) {
    for (row, out) in output.iter_mut().enumerate() {
        let mut acc = 0u64;
        for (index, &mask) in matrix.row_words(row).iter().enumerate() {
            let mut bits = mask;
            while bits != 0 {
                acc ^= input[index * 64 + bits.trailing_zeros() as usize];
                bits &= bits - 1;
            }
        }
        *out = acc;
    }
}

/// Big-endian decode of a w-byte group
fn unpack_word(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, &b| acc << 8 | b as u64)
}

/// Big-endian encode into a w-byte group
fn pack_word(word: u64, out: &mut [u8]) {
    for (shift, slot) in out.iter_mut().rev().enumerate() {
        *slot = (word >> (8 * shift)) as u8;
    }
}

/// Read until `buf` is full or the reader is exhausted
fn read_full<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Read one code block, one word per lane from `shards[lane / m]`.
///
/// Returns `Ok(false)` on a clean end of stream at a block boundary.
fn read_code_block<R: Read>(
    shards: &mut [R],
    lanes: &mut [u64],
    w: usize,
    m: usize,
) -> Result<bool> {
    let mut buf = [0u8; 8];
    let got = read_full(&mut shards[0], &mut buf[..w])?;
    if got == 0 {
        return Ok(false);
    }
    if got < w {
        return Err(ShardKeepError::CorruptStream(
            "shard ends mid-word".to_string(),
        ));
    }
    lanes[0] = unpack_word(&buf[..w]);
    for lane in 1..lanes.len() {
        let got = read_full(&mut shards[lane / m], &mut buf[..w])?;
        if got < w {
            return Err(ShardKeepError::CorruptStream(format!(
                "shard {} ends mid-block",
                lane / m
            )));
        }
        lanes[lane] = unpack_word(&buf[..w]);
    }
    Ok(true)
}
