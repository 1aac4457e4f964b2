//! Fixed-size block integer codec.
//!
//! Wraps the `bitpacking` crate's 128-lane packer with the conventions the
//! segment pool relies on: sorted groups are delta-coded against a carried
//! base value, unsorted groups are packed as-is, and short groups (only the
//! trailing block of a chain may be short) are padded to a full 128 lanes
//! before packing. The caller records the live count; padding lanes repeat
//! the final value for sorted input and hold zero for unsorted input, so the
//! bit width never grows because of padding.
//!
//! Payload sizes are always `num_bits * 16` bytes, a multiple of four, so a
//! compressed block maps onto whole `u32` arena words.

use bitpacking::{BitPacker, BitPacker4x};

use crate::error::{FreesiaError, Result};

/// Number of integers in one compressed block.
pub const BLOCK_LEN: usize = BitPacker4x::BLOCK_LEN;

const MAX_COMPRESSED_BYTES: usize = BLOCK_LEN * 4;

/// Number of `u32` payload words for a block packed at the given bit width.
pub fn words_per_block(num_bits: u8) -> usize {
    num_bits as usize * BLOCK_LEN / 32
}

/// Compresses groups of up to [`BLOCK_LEN`] integers into arena words.
pub struct BlockEncoder {
    bitpacker: BitPacker4x,
    lanes: [u32; BLOCK_LEN],
    bytes: [u8; MAX_COMPRESSED_BYTES],
    words: [u32; BLOCK_LEN],
}

impl Default for BlockEncoder {
    fn default() -> Self {
        BlockEncoder::new()
    }
}

impl BlockEncoder {
    pub fn new() -> Self {
        BlockEncoder {
            bitpacker: BitPacker4x::new(),
            lanes: [0u32; BLOCK_LEN],
            bytes: [0u8; MAX_COMPRESSED_BYTES],
            words: [0u32; BLOCK_LEN],
        }
    }

    /// Compress a non-decreasing group, delta-coded against `base`.
    ///
    /// `base` must not exceed the first value. Returns the bit width and the
    /// packed payload words.
    pub fn compress_sorted(&mut self, base: u32, values: &[u32]) -> Result<(u8, &[u32])> {
        if values.is_empty() || values.len() > BLOCK_LEN {
            return Err(FreesiaError::index(format!(
                "sorted group of {} values does not fit a {BLOCK_LEN}-lane block",
                values.len()
            )));
        }
        if base > values[0] {
            return Err(FreesiaError::index(format!(
                "delta base {base} exceeds first value {}",
                values[0]
            )));
        }
        self.lanes[..values.len()].copy_from_slice(values);
        let last = values[values.len() - 1];
        for lane in self.lanes[values.len()..].iter_mut() {
            *lane = last;
        }
        let num_bits = self.bitpacker.num_bits_sorted(base, &self.lanes);
        let written = self
            .bitpacker
            .compress_sorted(base, &self.lanes, &mut self.bytes, num_bits);
        Ok((num_bits, self.pack_words(written)))
    }

    /// Compress an arbitrary group of values (term frequencies, position
    /// deltas). Padding lanes hold zero.
    pub fn compress_unsorted(&mut self, values: &[u32]) -> Result<(u8, &[u32])> {
        if values.is_empty() || values.len() > BLOCK_LEN {
            return Err(FreesiaError::index(format!(
                "unsorted group of {} values does not fit a {BLOCK_LEN}-lane block",
                values.len()
            )));
        }
        self.lanes[..values.len()].copy_from_slice(values);
        for lane in self.lanes[values.len()..].iter_mut() {
            *lane = 0;
        }
        let num_bits = self.bitpacker.num_bits(&self.lanes);
        let written = self
            .bitpacker
            .compress(&self.lanes, &mut self.bytes, num_bits);
        Ok((num_bits, self.pack_words(written)))
    }

    fn pack_words(&mut self, byte_len: usize) -> &[u32] {
        let word_len = byte_len / 4;
        for (i, word) in self.words[..word_len].iter_mut().enumerate() {
            *word = u32::from_le_bytes([
                self.bytes[i * 4],
                self.bytes[i * 4 + 1],
                self.bytes[i * 4 + 2],
                self.bytes[i * 4 + 3],
            ]);
        }
        &self.words[..word_len]
    }
}

/// Decompresses packed payload words back into a full 128-lane group.
pub struct BlockDecoder {
    bitpacker: BitPacker4x,
    bytes: [u8; MAX_COMPRESSED_BYTES],
    output: [u32; BLOCK_LEN],
}

impl Default for BlockDecoder {
    fn default() -> Self {
        BlockDecoder::new()
    }
}

impl BlockDecoder {
    pub fn new() -> Self {
        BlockDecoder {
            bitpacker: BitPacker4x::new(),
            bytes: [0u8; MAX_COMPRESSED_BYTES],
            output: [0u32; BLOCK_LEN],
        }
    }

    /// Decode a sorted group, reconstructing absolute values from `base`.
    pub fn decompress_sorted(
        &mut self,
        base: u32,
        words: &[u32],
        num_bits: u8,
    ) -> Result<&[u32; BLOCK_LEN]> {
        let byte_len = self.unpack_words(words, num_bits)?;
        self.bitpacker
            .decompress_sorted(base, &self.bytes[..byte_len], &mut self.output, num_bits);
        Ok(&self.output)
    }

    /// Decode an unsorted group.
    pub fn decompress_unsorted(
        &mut self,
        words: &[u32],
        num_bits: u8,
    ) -> Result<&[u32; BLOCK_LEN]> {
        let byte_len = self.unpack_words(words, num_bits)?;
        self.bitpacker
            .decompress(&self.bytes[..byte_len], &mut self.output, num_bits);
        Ok(&self.output)
    }

    fn unpack_words(&mut self, words: &[u32], num_bits: u8) -> Result<usize> {
        let expected = words_per_block(num_bits);
        if words.len() != expected {
            return Err(FreesiaError::corrupted(format!(
                "block payload holds {} words, bit width {num_bits} requires {expected}",
                words.len()
            )));
        }
        for (i, word) in words.iter().enumerate() {
            self.bytes[i * 4..i * 4 + 4].copy_from_slice(&word.to_le_bytes());
        }
        Ok(expected * 4)
    }
}
