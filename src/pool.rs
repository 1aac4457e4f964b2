//! The segment pool: an arena of fixed-size word slabs holding compressed
//! posting blocks linked into per-term chains.
//!
//! Blocks never move and are never individually destroyed; the pool is
//! discarded or reloaded as a unit. "Next" links are [`BlockPointer`]
//! handles — (segment index, word offset) pairs packed into a `u64` — so the
//! whole pool serializes as flat words and reloads at any address safely.
//!
//! Block layout, all `u32` words:
//!
//! ```text
//! w0  total words of this block (header + payloads)
//! w1  next pointer, high half
//! w2  next pointer, low half
//! w3  doc count (1..=128)
//! w4  base docid (delta base: last docid of the previous block)
//! w5  max docid in block (pruning bound)
//! w6  docid bit width
//! [docid payload]
//! [bloom filter words, iff bloom is enabled]
//! [tf bit width + tf payload, iff TfOnly or Positional]
//! [position count, then per 128-chunk: bit width + payload, iff Positional]
//! ```
//!
//! The bloom section sits directly after the docid payload so membership
//! probes can locate it without caring which mode the pool runs in.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::bloom;
use crate::codec::{BLOCK_LEN, BlockDecoder, BlockEncoder, words_per_block};
use crate::error::{FreesiaError, Result};

/// Default number of `u32` words per segment slab (512 KiB).
pub const DEFAULT_SEGMENT_WORDS: usize = 1 << 17;

const HEADER_WORDS: usize = 7;

const POOL_MAGIC: u32 = 0x4652_5350; // "FRSP"

/// Which payload sections a block carries. Chosen once at construction;
/// every operation that touches a mode-specific section validates against
/// it instead of reading garbage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexMode {
    /// Docids only.
    NonPositional,
    /// Docids and term frequencies.
    TfOnly,
    /// Docids, term frequencies, and within-document positions.
    Positional,
}

impl IndexMode {
    fn as_u8(self) -> u8 {
        match self {
            IndexMode::NonPositional => 0,
            IndexMode::TfOnly => 1,
            IndexMode::Positional => 2,
        }
    }

    fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(IndexMode::NonPositional),
            1 => Ok(IndexMode::TfOnly),
            2 => Ok(IndexMode::Positional),
            other => Err(FreesiaError::corrupted(format!(
                "unknown index mode tag {other}"
            ))),
        }
    }
}

/// Per-block Bloom filter settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BloomConfig {
    /// Filter bits allocated per docid in a block.
    pub bits_per_element: u32,
    /// Number of hash probes per key.
    pub num_hashes: u32,
}

impl Default for BloomConfig {
    fn default() -> Self {
        BloomConfig {
            bits_per_element: 8,
            num_hashes: 3,
        }
    }
}

/// Opaque handle to a block: segment index in the high half, word offset in
/// the low half. A plain value with no ownership semantics — freely
/// copyable, and dangling only once the owning pool is dropped or replaced
/// by a reload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockPointer(u64);

impl BlockPointer {
    /// The universal "no block" sentinel.
    pub const UNDEFINED: BlockPointer = BlockPointer(u64::MAX);

    fn new(segment: usize, offset: usize) -> Self {
        BlockPointer(((segment as u64) << 32) | offset as u64)
    }

    fn join(high: u32, low: u32) -> Self {
        BlockPointer(((high as u64) << 32) | low as u64)
    }

    pub fn is_undefined(self) -> bool {
        self.0 == u64::MAX
    }

    fn segment(self) -> usize {
        (self.0 >> 32) as usize
    }

    fn offset(self) -> usize {
        (self.0 & 0xFFFF_FFFF) as usize
    }

    fn high(self) -> u32 {
        (self.0 >> 32) as u32
    }

    fn low(self) -> u32 {
        (self.0 & 0xFFFF_FFFF) as u32
    }

    /// The raw `u64` form used in persisted statistics tables.
    pub fn to_raw(self) -> u64 {
        self.0
    }

    /// Rebuild a pointer from its raw persisted form.
    pub fn from_raw(raw: u64) -> Self {
        BlockPointer(raw)
    }
}

/// Arena-managed storage for compressed posting blocks.
pub struct SegmentPool {
    segments: Vec<Vec<u32>>,
    /// Write offset within the last segment.
    offset: usize,
    segment_words: usize,
    mode: IndexMode,
    reverse: bool,
    bloom: Option<BloomConfig>,
}

impl std::fmt::Debug for SegmentPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentPool")
            .field("segments", &self.segments.len())
            .field("offset", &self.offset)
            .field("segment_words", &self.segment_words)
            .field("mode", &self.mode)
            .field("reverse", &self.reverse)
            .field("bloom", &self.bloom)
            .finish()
    }
}

impl SegmentPool {
    /// Create an empty pool with one zero-filled segment.
    pub fn new(
        mode: IndexMode,
        reverse: bool,
        bloom: Option<BloomConfig>,
        segment_words: usize,
    ) -> Self {
        SegmentPool {
            segments: vec![vec![0u32; segment_words]],
            offset: 0,
            segment_words,
            mode,
            reverse,
            bloom,
        }
    }

    pub fn mode(&self) -> IndexMode {
        self.mode
    }

    /// Number of allocated segments.
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Total words written across all segments.
    pub fn live_words(&self) -> usize {
        let full: usize = self.segments[..self.segments.len() - 1]
            .iter()
            .map(|segment| segment.len())
            .sum();
        full + self.offset
    }

    /// Compress and append a docids-only block.
    pub fn add_non_positional(
        &mut self,
        docids: &[u32],
        base: u32,
        tail: BlockPointer,
    ) -> Result<BlockPointer> {
        if self.mode != IndexMode::NonPositional {
            return Err(FreesiaError::config(
                "pool mode carries term frequencies; use the matching add operation",
            ));
        }
        let words = self.encode_docids(docids, base)?;
        self.commit(words, tail)
    }

    /// Compress and append a block with docids and term frequencies.
    pub fn add_tf_only(
        &mut self,
        docids: &[u32],
        tfs: &[u32],
        base: u32,
        tail: BlockPointer,
    ) -> Result<BlockPointer> {
        if self.mode != IndexMode::TfOnly {
            return Err(FreesiaError::config(
                "pool mode does not match a tf-only block",
            ));
        }
        let mut words = self.encode_docids(docids, base)?;
        Self::append_tfs(&mut words, docids.len(), tfs)?;
        self.commit(words, tail)
    }

    /// Compress and append a block with docids, term frequencies, and
    /// delta-coded position runs.
    pub fn add_positional(
        &mut self,
        docids: &[u32],
        tfs: &[u32],
        positions: &[u32],
        base: u32,
        tail: BlockPointer,
    ) -> Result<BlockPointer> {
        if self.mode != IndexMode::Positional {
            return Err(FreesiaError::config(
                "pool mode does not match a positional block",
            ));
        }
        let expected: usize = tfs.iter().map(|&tf| tf as usize).sum();
        if positions.len() != expected {
            return Err(FreesiaError::index(format!(
                "position run of {} entries does not match tf sum {expected}",
                positions.len()
            )));
        }
        let mut words = self.encode_docids(docids, base)?;
        Self::append_tfs(&mut words, docids.len(), tfs)?;
        Self::append_positions(&mut words, positions)?;
        self.commit(words, tail)
    }

    /// One hop along a chain. Returns [`BlockPointer::UNDEFINED`] at the end.
    pub fn next_pointer(&self, pointer: BlockPointer) -> Result<BlockPointer> {
        let words = self.block_words(pointer)?;
        Ok(BlockPointer::join(words[1], words[2]))
    }

    /// The maximum docid stored in the block — the pruning bound.
    pub fn block_max(&self, pointer: BlockPointer) -> Result<u32> {
        Ok(self.block_words(pointer)?[5])
    }

    /// Decode the block's docids into `out` (capacity at least
    /// [`BLOCK_LEN`]), reconstructing absolute values from the stored base.
    /// Returns the number of live docids.
    pub fn decompress_docid_block(&self, out: &mut [u32], pointer: BlockPointer) -> Result<usize> {
        if out.len() < BLOCK_LEN {
            return Err(FreesiaError::index(
                "docid output buffer is smaller than a block",
            ));
        }
        let words = self.block_words(pointer)?;
        let count = words[3] as usize;
        let payload = Self::section(words, HEADER_WORDS, words_per_block(words[6] as u8))?;
        let mut decoder = BlockDecoder::new();
        let decoded = decoder.decompress_sorted(words[4], payload, words[6] as u8)?;
        out[..count].copy_from_slice(&decoded[..count]);
        Ok(count)
    }

    /// Decode the block's term frequencies into `out` (capacity at least
    /// [`BLOCK_LEN`]). Returns the number of live entries.
    pub fn decompress_tf_block(&self, out: &mut [u32], pointer: BlockPointer) -> Result<usize> {
        if self.mode == IndexMode::NonPositional {
            return Err(FreesiaError::config(
                "term frequencies are not stored in a non-positional pool",
            ));
        }
        if out.len() < BLOCK_LEN {
            return Err(FreesiaError::index(
                "tf output buffer is smaller than a block",
            ));
        }
        let words = self.block_words(pointer)?;
        let count = words[3] as usize;
        let start = self.tf_section_start(words);
        let num_bits = Self::word(words, start)? as u8;
        let payload = Self::section(words, start + 1, words_per_block(num_bits))?;
        let mut decoder = BlockDecoder::new();
        let decoded = decoder.decompress_unsorted(payload, num_bits)?;
        out[..count].copy_from_slice(&decoded[..count]);
        Ok(count)
    }

    /// Decode the block's flat delta-coded position run into `out`.
    /// Returns the number of position entries.
    pub fn decompress_position_block(
        &self,
        out: &mut Vec<u32>,
        pointer: BlockPointer,
    ) -> Result<usize> {
        if self.mode != IndexMode::Positional {
            return Err(FreesiaError::config(
                "positions are not stored in this pool mode",
            ));
        }
        let words = self.block_words(pointer)?;
        let tf_start = self.tf_section_start(words);
        let tf_bits = Self::word(words, tf_start)? as u8;
        let mut cursor = tf_start + 1 + words_per_block(tf_bits);

        let total = Self::word(words, cursor)? as usize;
        cursor += 1;
        out.clear();
        out.reserve(total);
        let mut decoder = BlockDecoder::new();
        let mut remaining = total;
        while remaining > 0 {
            let num_bits = Self::word(words, cursor)? as u8;
            cursor += 1;
            let payload = Self::section(words, cursor, words_per_block(num_bits))?;
            cursor += words_per_block(num_bits);
            let decoded = decoder.decompress_unsorted(payload, num_bits)?;
            let take = remaining.min(BLOCK_LEN);
            out.extend_from_slice(&decoded[..take]);
            remaining -= take;
        }
        Ok(total)
    }

    /// Probe a chain for `docid`, advancing `pointer` past every block whose
    /// maximum docid is below the target (O(#blocks), not O(#postings)).
    /// The Bloom filter, when present, is consulted before any exact decode.
    ///
    /// `pointer` is left on the first block whose bound reaches the target,
    /// so repeated calls with increasing docids amortize the chain walk.
    /// Meaningful on forward chains; reverse chains are a storage layout
    /// option only.
    pub fn contains_docid(&self, docid: u32, pointer: &mut BlockPointer) -> Result<bool> {
        while !pointer.is_undefined() {
            let words = self.block_words(*pointer)?;
            if words[5] < docid {
                *pointer = BlockPointer::join(words[1], words[2]);
                continue;
            }
            if let Some(config) = &self.bloom {
                let count = words[3] as usize;
                let start = HEADER_WORDS + words_per_block(words[6] as u8);
                let len = bloom::filter_words(count, config.bits_per_element as usize);
                let filter = Self::section(words, start, len)?;
                if !bloom::contains(filter, config.num_hashes, docid) {
                    return Ok(false);
                }
            }
            let count = words[3] as usize;
            let payload = Self::section(words, HEADER_WORDS, words_per_block(words[6] as u8))?;
            let mut decoder = BlockDecoder::new();
            let decoded = decoder.decompress_sorted(words[4], payload, words[6] as u8)?;
            return Ok(decoded[..count].binary_search(&docid).is_ok());
        }
        Ok(false)
    }

    /// Write the pool image: scalar header, then each segment's live words
    /// (the current segment truncated to its write offset).
    pub fn save<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u32::<LittleEndian>(POOL_MAGIC)?;
        writer.write_u8(self.mode.as_u8())?;
        writer.write_u32::<LittleEndian>(self.segments.len() as u32)?;
        writer.write_u64::<LittleEndian>(self.offset as u64)?;
        writer.write_u8(self.reverse as u8)?;
        writer.write_u8(self.bloom.is_some() as u8)?;
        let bloom = self.bloom.unwrap_or(BloomConfig {
            bits_per_element: 0,
            num_hashes: 0,
        });
        writer.write_u32::<LittleEndian>(bloom.num_hashes)?;
        writer.write_u32::<LittleEndian>(bloom.bits_per_element)?;
        writer.write_u64::<LittleEndian>(self.segment_words as u64)?;

        let last = self.segments.len() - 1;
        for (i, segment) in self.segments.iter().enumerate() {
            let live = if i == last { self.offset } else { segment.len() };
            writer.write_u64::<LittleEndian>(live as u64)?;
            for &word in &segment[..live] {
                writer.write_u32::<LittleEndian>(word)?;
            }
        }
        debug!(
            "saved segment pool: {} segments, {} live words",
            self.segments.len(),
            self.live_words()
        );
        Ok(())
    }

    /// Read a pool image previously written by [`save`](Self::save).
    pub fn load<R: Read>(reader: &mut R) -> Result<Self> {
        let magic = reader.read_u32::<LittleEndian>()?;
        if magic != POOL_MAGIC {
            return Err(FreesiaError::corrupted(format!(
                "bad segment pool magic {magic:#010x}"
            )));
        }
        let mode = IndexMode::from_u8(reader.read_u8()?)?;
        let segment_count = reader.read_u32::<LittleEndian>()? as usize;
        if segment_count == 0 || segment_count > 1 << 20 {
            return Err(FreesiaError::corrupted(format!(
                "implausible segment count {segment_count}"
            )));
        }
        let offset = reader.read_u64::<LittleEndian>()? as usize;
        let reverse = reader.read_u8()? != 0;
        let bloom_enabled = reader.read_u8()? != 0;
        let num_hashes = reader.read_u32::<LittleEndian>()?;
        let bits_per_element = reader.read_u32::<LittleEndian>()?;
        let segment_words = reader.read_u64::<LittleEndian>()? as usize;
        if segment_words == 0 || segment_words > 1 << 28 {
            return Err(FreesiaError::corrupted(format!(
                "implausible segment size {segment_words}"
            )));
        }
        let bloom = if bloom_enabled {
            Some(BloomConfig {
                bits_per_element,
                num_hashes,
            })
        } else {
            None
        };

        let mut segments = Vec::with_capacity(segment_count);
        for i in 0..segment_count {
            let live = reader.read_u64::<LittleEndian>()? as usize;
            if live > 1 << 28 {
                return Err(FreesiaError::corrupted(format!(
                    "implausible segment length {live}"
                )));
            }
            // The current segment is stored truncated; restore its slab.
            let allocated = if i == segment_count - 1 {
                segment_words.max(live)
            } else {
                live
            };
            let mut segment = vec![0u32; allocated];
            for word in segment[..live].iter_mut() {
                *word = reader.read_u32::<LittleEndian>()?;
            }
            segments.push(segment);
        }
        if offset > segments[segment_count - 1].len() {
            return Err(FreesiaError::corrupted(
                "segment pool write offset lies outside the current segment",
            ));
        }
        debug!("loaded segment pool: {segment_count} segments, mode {mode:?}");
        Ok(SegmentPool {
            segments,
            offset,
            segment_words,
            mode,
            reverse,
            bloom,
        })
    }

    /// Header + docid payload + optional bloom filter for a block.
    fn encode_docids(&self, docids: &[u32], base: u32) -> Result<Vec<u32>> {
        for pair in docids.windows(2) {
            if pair[0] >= pair[1] {
                return Err(FreesiaError::index(
                    "docids within a block must be strictly ascending",
                ));
            }
        }
        let mut encoder = BlockEncoder::new();
        let (num_bits, payload) = encoder.compress_sorted(base, docids)?;

        let mut words = vec![0u32; HEADER_WORDS];
        words[3] = docids.len() as u32;
        words[4] = base;
        words[5] = docids[docids.len() - 1];
        words[6] = num_bits as u32;
        words.extend_from_slice(payload);

        if let Some(config) = &self.bloom {
            let start = words.len();
            let len = bloom::filter_words(docids.len(), config.bits_per_element as usize);
            words.resize(start + len, 0);
            for &docid in docids {
                bloom::insert(&mut words[start..], config.num_hashes, docid);
            }
        }
        Ok(words)
    }

    fn append_tfs(words: &mut Vec<u32>, doc_count: usize, tfs: &[u32]) -> Result<()> {
        if tfs.len() != doc_count {
            return Err(FreesiaError::index(format!(
                "tf array of {} entries does not match {doc_count} docids",
                tfs.len()
            )));
        }
        let mut encoder = BlockEncoder::new();
        let (num_bits, payload) = encoder.compress_unsorted(tfs)?;
        words.push(num_bits as u32);
        words.extend_from_slice(payload);
        Ok(())
    }

    fn append_positions(words: &mut Vec<u32>, positions: &[u32]) -> Result<()> {
        words.push(positions.len() as u32);
        let mut encoder = BlockEncoder::new();
        for chunk in positions.chunks(BLOCK_LEN) {
            let (num_bits, payload) = encoder.compress_unsorted(chunk)?;
            words.push(num_bits as u32);
            words.extend_from_slice(payload);
        }
        Ok(())
    }

    /// Place a finished block into the arena and link it into its chain.
    fn commit(&mut self, mut words: Vec<u32>, tail: BlockPointer) -> Result<BlockPointer> {
        words[0] = words.len() as u32;
        if self.reverse {
            // Reverse chains prepend: the new block points at the old head.
            words[1] = tail.high();
            words[2] = tail.low();
        } else {
            words[1] = BlockPointer::UNDEFINED.high();
            words[2] = BlockPointer::UNDEFINED.low();
        }

        let needed = words.len();
        let current = self.segments.len() - 1;
        if self.offset + needed > self.segments[current].len() {
            let allocated = needed.max(self.segment_words);
            debug!(
                "segment {} exhausted at offset {}; allocating {allocated} words",
                current, self.offset
            );
            self.segments.push(vec![0u32; allocated]);
            self.offset = 0;
        }

        let segment = self.segments.len() - 1;
        let offset = self.offset;
        self.segments[segment][offset..offset + needed].copy_from_slice(&words);
        self.offset += needed;
        let pointer = BlockPointer::new(segment, offset);

        if !self.reverse && !tail.is_undefined() {
            // Forward chains append: patch the old tail's next link.
            self.block_words(tail)?;
            let tail_segment = tail.segment();
            let tail_offset = tail.offset();
            self.segments[tail_segment][tail_offset + 1] = pointer.high();
            self.segments[tail_segment][tail_offset + 2] = pointer.low();
        }
        Ok(pointer)
    }

    /// Resolve a pointer to its block's full word slice, validating bounds.
    fn block_words(&self, pointer: BlockPointer) -> Result<&[u32]> {
        if pointer.is_undefined() {
            return Err(FreesiaError::index(
                "dereference of the undefined block pointer",
            ));
        }
        let segment = self.segments.get(pointer.segment()).ok_or_else(|| {
            FreesiaError::index(format!(
                "block pointer names missing segment {}",
                pointer.segment()
            ))
        })?;
        let offset = pointer.offset();
        if offset + HEADER_WORDS > segment.len() {
            return Err(FreesiaError::index(
                "block pointer offset lies outside its segment",
            ));
        }
        let total = segment[offset] as usize;
        if total < HEADER_WORDS || offset + total > segment.len() {
            return Err(FreesiaError::index(format!(
                "block at segment {} offset {offset} has implausible size {total}",
                pointer.segment()
            )));
        }
        Ok(&segment[offset..offset + total])
    }

    fn tf_section_start(&self, words: &[u32]) -> usize {
        let mut start = HEADER_WORDS + words_per_block(words[6] as u8);
        if let Some(config) = &self.bloom {
            start += bloom::filter_words(words[3] as usize, config.bits_per_element as usize);
        }
        start
    }

    fn word(words: &[u32], index: usize) -> Result<u32> {
        words.get(index).copied().ok_or_else(|| {
            FreesiaError::corrupted("block section extends past the block's recorded size")
        })
    }

    fn section(words: &[u32], start: usize, len: usize) -> Result<&[u32]> {
        words.get(start..start + len).ok_or_else(|| {
            FreesiaError::corrupted("block section extends past the block's recorded size")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ascending(start: u32, len: usize, step: u32) -> Vec<u32> {
        (0..len as u32).map(|i| start + i * step).collect()
    }

    #[test]
    fn test_single_block_roundtrip() {
        let mut pool = SegmentPool::new(IndexMode::NonPositional, false, None, 1 << 12);
        let docids = ascending(5, BLOCK_LEN, 3);
        let pointer = pool
            .add_non_positional(&docids, 0, BlockPointer::UNDEFINED)
            .unwrap();

        let mut out = [0u32; BLOCK_LEN];
        let count = pool.decompress_docid_block(&mut out, pointer).unwrap();
        assert_eq!(count, BLOCK_LEN);
        assert_eq!(&out[..], &docids[..]);
        assert!(pool.next_pointer(pointer).unwrap().is_undefined());
        assert_eq!(pool.block_max(pointer).unwrap(), docids[BLOCK_LEN - 1]);
    }

    #[test]
    fn test_forward_chain_links_in_insertion_order() {
        let mut pool = SegmentPool::new(IndexMode::NonPositional, false, None, 1 << 12);
        let first_docids = ascending(0, BLOCK_LEN, 1);
        let second_docids = ascending(BLOCK_LEN as u32, 40, 1);

        let head = pool
            .add_non_positional(&first_docids, 0, BlockPointer::UNDEFINED)
            .unwrap();
        let tail = pool
            .add_non_positional(&second_docids, first_docids[BLOCK_LEN - 1], head)
            .unwrap();

        assert_eq!(pool.next_pointer(head).unwrap(), tail);
        assert!(pool.next_pointer(tail).unwrap().is_undefined());

        let mut out = [0u32; BLOCK_LEN];
        let count = pool.decompress_docid_block(&mut out, tail).unwrap();
        assert_eq!(&out[..count], &second_docids[..]);
    }

    #[test]
    fn test_reverse_chain_prepends() {
        let mut pool = SegmentPool::new(IndexMode::NonPositional, true, None, 1 << 12);
        let first = pool
            .add_non_positional(&ascending(0, 10, 1), 0, BlockPointer::UNDEFINED)
            .unwrap();
        let second = pool.add_non_positional(&ascending(10, 10, 1), 9, first).unwrap();

        // The newest block heads the chain and points back at the older one.
        assert_eq!(pool.next_pointer(second).unwrap(), first);
        assert!(pool.next_pointer(first).unwrap().is_undefined());
    }

    #[test]
    fn test_segment_rollover_allocates_before_partial_write() {
        // A segment too small for two blocks forces an allocation.
        let mut pool = SegmentPool::new(IndexMode::NonPositional, false, None, 64);
        let head = pool
            .add_non_positional(&ascending(0, BLOCK_LEN, 1), 0, BlockPointer::UNDEFINED)
            .unwrap();
        assert_eq!(pool.segment_count(), 1);
        let tail = pool
            .add_non_positional(&ascending(1000, BLOCK_LEN, 1), 999, head)
            .unwrap();
        assert_eq!(pool.segment_count(), 2);

        let mut out = [0u32; BLOCK_LEN];
        let count = pool.decompress_docid_block(&mut out, tail).unwrap();
        assert_eq!(&out[..count], &ascending(1000, BLOCK_LEN, 1)[..]);
    }

    #[test]
    fn test_tf_block_roundtrip() {
        let mut pool = SegmentPool::new(IndexMode::TfOnly, false, None, 1 << 12);
        let docids = ascending(1, 50, 2);
        let tfs: Vec<u32> = (0..50u32).map(|i| i % 7 + 1).collect();
        let pointer = pool
            .add_tf_only(&docids, &tfs, 0, BlockPointer::UNDEFINED)
            .unwrap();

        let mut out = [0u32; BLOCK_LEN];
        let count = pool.decompress_tf_block(&mut out, pointer).unwrap();
        assert_eq!(&out[..count], &tfs[..]);
    }

    #[test]
    fn test_positional_block_roundtrip() {
        let mut pool = SegmentPool::new(IndexMode::Positional, false, None, 1 << 12);
        let docids = vec![4u32, 9, 12];
        let tfs = vec![2u32, 1, 3];
        // Flat delta-coded runs: (0, 5), (3), (1, 1, 1).
        let positions = vec![0u32, 5, 3, 1, 1, 1];
        let pointer = pool
            .add_positional(&docids, &tfs, &positions, 0, BlockPointer::UNDEFINED)
            .unwrap();

        let mut out = Vec::new();
        let count = pool.decompress_position_block(&mut out, pointer).unwrap();
        assert_eq!(count, positions.len());
        assert_eq!(out, positions);
    }

    #[test]
    fn test_long_position_run_spans_chunks() {
        let mut pool = SegmentPool::new(IndexMode::Positional, false, None, 1 << 14);
        let docids = vec![1u32, 2];
        let tfs = vec![200u32, 100];
        let positions: Vec<u32> = (0..300u32).map(|i| i % 5).collect();
        let pointer = pool
            .add_positional(&docids, &tfs, &positions, 0, BlockPointer::UNDEFINED)
            .unwrap();

        let mut out = Vec::new();
        pool.decompress_position_block(&mut out, pointer).unwrap();
        assert_eq!(out, positions);
    }

    #[test]
    fn test_mode_misuse_is_rejected() {
        let mut pool = SegmentPool::new(IndexMode::NonPositional, false, None, 1 << 12);
        let pointer = pool
            .add_non_positional(&[1, 2, 3], 0, BlockPointer::UNDEFINED)
            .unwrap();

        let mut out = [0u32; BLOCK_LEN];
        assert!(matches!(
            pool.decompress_tf_block(&mut out, pointer),
            Err(FreesiaError::Config(_))
        ));
        let mut positions = Vec::new();
        assert!(matches!(
            pool.decompress_position_block(&mut positions, pointer),
            Err(FreesiaError::Config(_))
        ));
        assert!(matches!(
            pool.add_tf_only(&[1, 2], &[1, 1], 0, BlockPointer::UNDEFINED),
            Err(FreesiaError::Config(_))
        ));
    }

    #[test]
    fn test_contains_docid_skips_and_advances_pointer() {
        let mut pool = SegmentPool::new(
            IndexMode::NonPositional,
            false,
            Some(BloomConfig::default()),
            1 << 14,
        );
        // Three-block chain of even docids 0, 2, .., 766.
        let all: Vec<u32> = (0..384u32).map(|i| i * 2).collect();
        let mut tail = BlockPointer::UNDEFINED;
        let mut head = BlockPointer::UNDEFINED;
        let mut base = 0u32;
        for chunk in all.chunks(BLOCK_LEN) {
            tail = pool.add_non_positional(chunk, base, tail).unwrap();
            if head.is_undefined() {
                head = tail;
            }
            base = chunk[chunk.len() - 1];
        }

        let mut pointer = head;
        assert!(pool.contains_docid(0, &mut pointer).unwrap());
        assert!(!pool.contains_docid(3, &mut pointer).unwrap());
        // Probe deep into the chain: the pointer must move off the head.
        assert!(pool.contains_docid(700, &mut pointer).unwrap());
        assert_ne!(pointer, head);
        // Past the end of the chain.
        assert!(!pool.contains_docid(9999, &mut pointer).unwrap());
        assert!(pointer.is_undefined());
    }

    #[test]
    fn test_contains_docid_monotone_probes() {
        let mut pool = SegmentPool::new(IndexMode::NonPositional, false, None, 1 << 14);
        let all: Vec<u32> = (0..512u32).map(|i| i * 3).collect();
        let mut tail = BlockPointer::UNDEFINED;
        let mut head = BlockPointer::UNDEFINED;
        let mut base = 0u32;
        for chunk in all.chunks(BLOCK_LEN) {
            tail = pool.add_non_positional(chunk, base, tail).unwrap();
            if head.is_undefined() {
                head = tail;
            }
            base = chunk[chunk.len() - 1];
        }

        let mut pointer = head;
        for probe in 0..1536u32 {
            let expected = probe % 3 == 0;
            assert_eq!(
                pool.contains_docid(probe, &mut pointer).unwrap(),
                expected,
                "probe {probe}"
            );
        }
    }

    #[test]
    fn test_save_load_preserves_chains() {
        let mut pool = SegmentPool::new(
            IndexMode::TfOnly,
            false,
            Some(BloomConfig::default()),
            1 << 10,
        );
        let docids = ascending(10, BLOCK_LEN, 5);
        let tfs = vec![2u32; BLOCK_LEN];
        let head = pool
            .add_tf_only(&docids, &tfs, 0, BlockPointer::UNDEFINED)
            .unwrap();
        let tail_docids = ascending(docids[BLOCK_LEN - 1] + 1, 17, 1);
        let tail = pool
            .add_tf_only(&tail_docids, &vec![1u32; 17], docids[BLOCK_LEN - 1], head)
            .unwrap();

        let mut image = Vec::new();
        pool.save(&mut image).unwrap();
        let mut cursor = std::io::Cursor::new(image);
        let loaded = SegmentPool::load(&mut cursor).unwrap();

        assert_eq!(loaded.mode(), IndexMode::TfOnly);
        assert_eq!(loaded.segment_count(), pool.segment_count());
        let mut out = [0u32; BLOCK_LEN];
        let count = loaded.decompress_docid_block(&mut out, head).unwrap();
        assert_eq!(&out[..count], &docids[..]);
        assert_eq!(loaded.next_pointer(head).unwrap(), tail);
        let count = loaded.decompress_docid_block(&mut out, tail).unwrap();
        assert_eq!(&out[..count], &tail_docids[..]);
    }

    #[test]
    fn test_load_rejects_bad_magic() {
        let mut image = Vec::new();
        image.extend_from_slice(&0xDEAD_BEEFu32.to_le_bytes());
        let mut cursor = std::io::Cursor::new(image);
        assert!(matches!(
            SegmentPool::load(&mut cursor),
            Err(FreesiaError::Corrupted(_))
        ));
    }

    #[test]
    fn test_undefined_pointer_is_guarded() {
        let pool = SegmentPool::new(IndexMode::NonPositional, false, None, 1 << 10);
        let mut out = [0u32; BLOCK_LEN];
        assert!(
            pool.decompress_docid_block(&mut out, BlockPointer::UNDEFINED)
                .is_err()
        );
        assert!(pool.next_pointer(BlockPointer::UNDEFINED).is_err());
    }
}
