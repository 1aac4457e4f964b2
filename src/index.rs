//! The inverted index build path: document insertion, per-term staging,
//! promotion of full groups into compressed blocks, and whole-index
//! persistence.

use std::io::{Read, Write};

use ahash::AHashMap;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::buffer::PostingBuffer;
use crate::codec::BLOCK_LEN;
use crate::dictionary::{TermDictionary, TermId};
use crate::error::{FreesiaError, Result};
use crate::pool::{BlockPointer, BloomConfig, IndexMode, SegmentPool};
use crate::score;

const INDEX_MAGIC: u32 = 0x4652_5349; // "FRSI"
const FORMAT_VERSION: u32 = 1;

/// Build-time settings. Fixed for the lifetime of an index; persisted with
/// it and restored on load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Which payload sections posting blocks carry.
    pub mode: IndexMode,
    /// Document frequency a term must reach before its postings are
    /// promoted out of the staging buffer into compressed blocks.
    pub df_cutoff: u32,
    /// Link new blocks at the head of their chain instead of the tail.
    /// A storage layout option; ordered traversal needs forward chains.
    pub reverse: bool,
    /// Per-block Bloom filter settings, or `None` to disable the filters.
    pub bloom: Option<BloomConfig>,
    /// Words per segment slab.
    pub segment_words: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        IndexConfig {
            mode: IndexMode::TfOnly,
            df_cutoff: 128,
            reverse: false,
            bloom: Some(BloomConfig::default()),
            segment_words: crate::pool::DEFAULT_SEGMENT_WORDS,
        }
    }
}

/// Per-term bookkeeping: frequencies, the block chain ends, the delta base
/// for the next block, and the argmax (tf, doc length) pair backing the
/// term's static score upper bound.
#[derive(Debug, Clone)]
pub(crate) struct TermStats {
    pub df: u32,
    pub cf: u64,
    pub head: BlockPointer,
    pub tail: BlockPointer,
    pub base: u32,
    pub bound_tf: u32,
    pub bound_doc_len: u32,
}

impl TermStats {
    fn new() -> Self {
        TermStats {
            df: 0,
            cf: 0,
            head: BlockPointer::UNDEFINED,
            tail: BlockPointer::UNDEFINED,
            base: 0,
            bound_tf: 0,
            bound_doc_len: 1,
        }
    }
}

/// One decoded posting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Posting {
    pub docid: u32,
    pub tf: u32,
    /// Absolute 0-based token positions; empty unless the index is
    /// positional.
    pub positions: Vec<u32>,
}

/// An append-only compressed inverted index.
///
/// Documents are inserted in strictly ascending docid order. Each term's
/// postings are staged in a growable buffer; once the term's document
/// frequency reaches the configured cutoff, full groups of [`BLOCK_LEN`]
/// postings are promoted into immutable compressed blocks in the segment
/// pool. Under-full groups are written only by [`flush`](Self::flush).
pub struct InvertedIndex {
    config: IndexConfig,
    dictionary: TermDictionary,
    stats: Vec<TermStats>,
    buffers: Vec<PostingBuffer>,
    pool: SegmentPool,
    doc_lens: AHashMap<u32, u32>,
    doc_count: u32,
    last_docid: Option<u32>,
}

impl std::fmt::Debug for InvertedIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvertedIndex")
            .field("config", &self.config)
            .field("terms", &self.dictionary.len())
            .field("doc_count", &self.doc_count)
            .field("pool", &self.pool)
            .finish()
    }
}

impl InvertedIndex {
    pub fn new(config: IndexConfig) -> Self {
        let pool = SegmentPool::new(
            config.mode,
            config.reverse,
            config.bloom,
            config.segment_words,
        );
        InvertedIndex {
            config,
            dictionary: TermDictionary::new(),
            stats: Vec::new(),
            buffers: Vec::new(),
            pool,
            doc_lens: AHashMap::new(),
            doc_count: 0,
            last_docid: None,
        }
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// Number of documents inserted.
    pub fn doc_count(&self) -> u32 {
        self.doc_count
    }

    /// Number of distinct terms seen.
    pub fn term_count(&self) -> usize {
        self.dictionary.len()
    }

    /// Document frequency of a term, or 0 if unseen.
    pub fn df(&self, term: &str) -> u32 {
        self.dictionary
            .get(term)
            .map_or(0, |id| self.stats[id as usize].df)
    }

    /// Collection frequency (total occurrences) of a term, or 0 if unseen.
    pub fn cf(&self, term: &str) -> u64 {
        self.dictionary
            .get(term)
            .map_or(0, |id| self.stats[id as usize].cf)
    }

    /// Insert one document as an ordered token sequence. Docids must be
    /// strictly ascending across calls; the document length is the token
    /// count.
    pub fn insert_doc(&mut self, docid: u32, tokens: &[&str]) -> Result<()> {
        if let Some(last) = self.last_docid {
            if docid <= last {
                return Err(FreesiaError::index(format!(
                    "docid {docid} is not greater than the last inserted docid {last}"
                )));
            }
        }
        let doc_len = tokens.len() as u32;
        let positional = self.config.mode == IndexMode::Positional;

        // Aggregate per-term tf and positions, keeping first-occurrence
        // order so buffer pushes stay deterministic.
        let mut order: Vec<TermId> = Vec::new();
        let mut aggregate: AHashMap<TermId, (u32, Vec<u32>)> = AHashMap::new();
        for (position, token) in tokens.iter().enumerate() {
            let id = self.dictionary.intern(token);
            if id as usize >= self.stats.len() {
                self.stats.push(TermStats::new());
                self.buffers.push(PostingBuffer::new());
            }
            let entry = aggregate.entry(id).or_insert_with(|| {
                order.push(id);
                (0, Vec::new())
            });
            entry.0 += 1;
            if positional {
                entry.1.push(position as u32);
            }
        }

        for id in order {
            let (tf, positions) = match aggregate.remove(&id) {
                Some(entry) => entry,
                None => continue,
            };
            let stats = &mut self.stats[id as usize];
            stats.df += 1;
            stats.cf += tf as u64;
            if score::tf_norm(tf, doc_len) > score::tf_norm(stats.bound_tf, stats.bound_doc_len) {
                stats.bound_tf = tf;
                stats.bound_doc_len = doc_len;
            }
            self.buffers[id as usize].push_posting(docid, tf, &positions);

            // Promote only full groups, and only once the term has proven
            // frequent enough to deserve compressed blocks.
            while self.stats[id as usize].df >= self.config.df_cutoff
                && self.buffers[id as usize].len() >= BLOCK_LEN
            {
                Self::emit_block(
                    &mut self.pool,
                    &self.config,
                    &mut self.stats[id as usize],
                    &mut self.buffers[id as usize],
                    BLOCK_LEN,
                )?;
            }
        }

        self.doc_lens.insert(docid, doc_len);
        self.doc_count += 1;
        self.last_docid = Some(docid);
        Ok(())
    }

    /// Drain every staging buffer into blocks, including under-full groups
    /// and terms below the document frequency cutoff.
    pub fn flush(&mut self) -> Result<()> {
        let mut flushed_terms = 0usize;
        let mut flushed_blocks = 0usize;
        for id in 0..self.stats.len() {
            if self.buffers[id].is_empty() {
                continue;
            }
            flushed_terms += 1;
            while !self.buffers[id].is_empty() {
                let ndocs = self.buffers[id].len().min(BLOCK_LEN);
                Self::emit_block(
                    &mut self.pool,
                    &self.config,
                    &mut self.stats[id],
                    &mut self.buffers[id],
                    ndocs,
                )?;
                flushed_blocks += 1;
            }
        }
        info!(
            "flushed {flushed_terms} terms into {flushed_blocks} blocks; pool holds {} words",
            self.pool.live_words()
        );
        Ok(())
    }

    /// All docids for a term in ascending order, spanning both compressed
    /// blocks and any still-buffered tail.
    pub fn term_docids(&self, term: &str) -> Result<Vec<u32>> {
        let id = match self.dictionary.get(term) {
            Some(id) => id,
            None => return Ok(Vec::new()),
        };
        self.ensure_forward()?;
        let stats = &self.stats[id as usize];
        let mut docids = Vec::with_capacity(stats.df as usize);
        let mut pointer = stats.head;
        let mut block = [0u32; BLOCK_LEN];
        while !pointer.is_undefined() {
            let count = self.pool.decompress_docid_block(&mut block, pointer)?;
            docids.extend_from_slice(&block[..count]);
            pointer = self.pool.next_pointer(pointer)?;
        }
        docids.extend_from_slice(self.buffers[id as usize].docids());
        Ok(docids)
    }

    /// All postings for a term in ascending docid order, with term
    /// frequencies and (in positional mode) absolute positions. Not
    /// available for non-positional indexes, which store no frequencies.
    pub fn term_postings(&self, term: &str) -> Result<Vec<Posting>> {
        if self.config.mode == IndexMode::NonPositional {
            return Err(FreesiaError::config(
                "a non-positional index stores docids only; use term_docids",
            ));
        }
        let id = match self.dictionary.get(term) {
            Some(id) => id,
            None => return Ok(Vec::new()),
        };
        self.ensure_forward()?;
        let stats = &self.stats[id as usize];
        let positional = self.config.mode == IndexMode::Positional;
        let mut postings = Vec::with_capacity(stats.df as usize);

        let mut pointer = stats.head;
        let mut docids = [0u32; BLOCK_LEN];
        let mut tfs = [0u32; BLOCK_LEN];
        let mut deltas = Vec::new();
        while !pointer.is_undefined() {
            let count = self.pool.decompress_docid_block(&mut docids, pointer)?;
            self.pool.decompress_tf_block(&mut tfs, pointer)?;
            if positional {
                self.pool.decompress_position_block(&mut deltas, pointer)?;
            }
            Self::collect_postings(
                &mut postings,
                &docids[..count],
                &tfs[..count],
                &deltas,
                positional,
            )?;
            pointer = self.pool.next_pointer(pointer)?;
        }

        let buffer = &self.buffers[id as usize];
        Self::collect_postings(
            &mut postings,
            buffer.docids(),
            buffer.tfs(),
            buffer.positions(),
            positional,
        )?;
        Ok(postings)
    }

    /// Static score upper bound for a term, or 0 if unseen.
    pub fn term_upper_bound(&self, term: &str) -> f32 {
        self.dictionary.get(term).map_or(0.0, |id| {
            let stats = &self.stats[id as usize];
            score::upper_bound(self.doc_count, stats.df, stats.bound_tf, stats.bound_doc_len)
        })
    }

    /// Token count of an inserted document.
    pub fn doc_len(&self, docid: u32) -> Option<u32> {
        self.doc_lens.get(&docid).copied()
    }

    pub(crate) fn pool(&self) -> &SegmentPool {
        &self.pool
    }

    pub(crate) fn term_id(&self, term: &str) -> Option<TermId> {
        self.dictionary.get(term)
    }

    pub(crate) fn term_stats(&self, id: TermId) -> &TermStats {
        &self.stats[id as usize]
    }

    pub(crate) fn has_buffered_postings(&self) -> bool {
        self.buffers.iter().any(|buffer| !buffer.is_empty())
    }

    pub(crate) fn ensure_forward(&self) -> Result<()> {
        if self.config.reverse {
            return Err(FreesiaError::config(
                "reverse-linked chains do not support ordered traversal",
            ));
        }
        Ok(())
    }

    fn collect_postings(
        postings: &mut Vec<Posting>,
        docids: &[u32],
        tfs: &[u32],
        deltas: &[u32],
        positional: bool,
    ) -> Result<()> {
        let mut cursor = 0usize;
        for (&docid, &tf) in docids.iter().zip(tfs) {
            let positions = if positional {
                let run = deltas.get(cursor..cursor + tf as usize).ok_or_else(|| {
                    FreesiaError::corrupted("position run shorter than the block's tf sum")
                })?;
                cursor += tf as usize;
                // Undo the delta coding: first entry absolute, rest gaps.
                let mut absolute = Vec::with_capacity(run.len());
                let mut prev = 0u32;
                for (i, &delta) in run.iter().enumerate() {
                    let position = if i == 0 { delta } else { prev + delta };
                    absolute.push(position);
                    prev = position;
                }
                absolute
            } else {
                Vec::new()
            };
            postings.push(Posting {
                docid,
                tf,
                positions,
            });
        }
        Ok(())
    }

    fn emit_block(
        pool: &mut SegmentPool,
        config: &IndexConfig,
        stats: &mut TermStats,
        buffer: &mut PostingBuffer,
        ndocs: usize,
    ) -> Result<()> {
        let last = buffer.docids()[ndocs - 1];
        let pointer = match config.mode {
            IndexMode::NonPositional => {
                pool.add_non_positional(&buffer.docids()[..ndocs], stats.base, stats.tail)?
            }
            IndexMode::TfOnly => pool.add_tf_only(
                &buffer.docids()[..ndocs],
                &buffer.tfs()[..ndocs],
                stats.base,
                stats.tail,
            )?,
            IndexMode::Positional => {
                let npos = buffer.position_prefix(ndocs);
                pool.add_positional(
                    &buffer.docids()[..ndocs],
                    &buffer.tfs()[..ndocs],
                    &buffer.positions()[..npos],
                    stats.base,
                    stats.tail,
                )?
            }
        };
        stats.base = last;
        stats.tail = pointer;
        if config.reverse || stats.head.is_undefined() {
            stats.head = pointer;
        }
        buffer.discard_front(ndocs);
        debug!("emitted block of {ndocs} postings, chain tail now {pointer:?}");
        Ok(())
    }

    /// Write the whole index image: magic and version, the JSON config
    /// record, corpus counters, dictionary, per-term statistics, staging
    /// buffers, and the segment pool.
    pub fn save<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u32::<LittleEndian>(INDEX_MAGIC)?;
        writer.write_u32::<LittleEndian>(FORMAT_VERSION)?;

        let config = serde_json::to_vec(&self.config)
            .map_err(|e| FreesiaError::config(format!("config record serialization: {e}")))?;
        writer.write_u32::<LittleEndian>(config.len() as u32)?;
        writer.write_all(&config)?;

        writer.write_u32::<LittleEndian>(self.doc_count)?;
        writer.write_u8(self.last_docid.is_some() as u8)?;
        writer.write_u32::<LittleEndian>(self.last_docid.unwrap_or(0))?;

        let mut doc_lens: Vec<(u32, u32)> =
            self.doc_lens.iter().map(|(&d, &l)| (d, l)).collect();
        doc_lens.sort_unstable();
        writer.write_u32::<LittleEndian>(doc_lens.len() as u32)?;
        for (docid, len) in doc_lens {
            writer.write_u32::<LittleEndian>(docid)?;
            writer.write_u32::<LittleEndian>(len)?;
        }

        self.dictionary.save(writer)?;

        writer.write_u32::<LittleEndian>(self.stats.len() as u32)?;
        for stats in &self.stats {
            writer.write_u32::<LittleEndian>(stats.df)?;
            writer.write_u64::<LittleEndian>(stats.cf)?;
            writer.write_u64::<LittleEndian>(stats.head.to_raw())?;
            writer.write_u64::<LittleEndian>(stats.tail.to_raw())?;
            writer.write_u32::<LittleEndian>(stats.base)?;
            writer.write_u32::<LittleEndian>(stats.bound_tf)?;
            writer.write_u32::<LittleEndian>(stats.bound_doc_len)?;
        }

        for buffer in &self.buffers {
            writer.write_u32::<LittleEndian>(buffer.len() as u32)?;
            for &docid in buffer.docids() {
                writer.write_u32::<LittleEndian>(docid)?;
            }
            for &tf in buffer.tfs() {
                writer.write_u32::<LittleEndian>(tf)?;
            }
            writer.write_u32::<LittleEndian>(buffer.positions().len() as u32)?;
            for &delta in buffer.positions() {
                writer.write_u32::<LittleEndian>(delta)?;
            }
        }

        self.pool.save(writer)?;
        info!(
            "saved index: {} docs, {} terms, {} pool segments",
            self.doc_count,
            self.dictionary.len(),
            self.pool.segment_count()
        );
        Ok(())
    }

    /// Read an index image previously written by [`save`](Self::save).
    pub fn load<R: Read>(reader: &mut R) -> Result<Self> {
        let magic = reader.read_u32::<LittleEndian>()?;
        if magic != INDEX_MAGIC {
            return Err(FreesiaError::corrupted(format!(
                "bad index magic {magic:#010x}"
            )));
        }
        let version = reader.read_u32::<LittleEndian>()?;
        if version != FORMAT_VERSION {
            return Err(FreesiaError::corrupted(format!(
                "unsupported index format version {version}"
            )));
        }

        let config_len = reader.read_u32::<LittleEndian>()? as usize;
        if config_len > 1 << 20 {
            return Err(FreesiaError::corrupted(format!(
                "config record of {config_len} bytes exceeds the 1 MiB bound"
            )));
        }
        let mut config_bytes = vec![0u8; config_len];
        reader.read_exact(&mut config_bytes)?;
        let config: IndexConfig = serde_json::from_slice(&config_bytes)
            .map_err(|e| FreesiaError::corrupted(format!("config record: {e}")))?;

        let doc_count = reader.read_u32::<LittleEndian>()?;
        let has_last = reader.read_u8()? != 0;
        let last_value = reader.read_u32::<LittleEndian>()?;
        let last_docid = has_last.then_some(last_value);

        let doc_len_count = reader.read_u32::<LittleEndian>()? as usize;
        if doc_len_count != doc_count as usize {
            return Err(FreesiaError::corrupted(format!(
                "document length table of {doc_len_count} entries does not match {doc_count} docs"
            )));
        }
        let mut doc_lens = AHashMap::with_capacity(doc_len_count);
        for _ in 0..doc_len_count {
            let docid = reader.read_u32::<LittleEndian>()?;
            let len = reader.read_u32::<LittleEndian>()?;
            doc_lens.insert(docid, len);
        }

        let dictionary = TermDictionary::load(reader)?;

        let term_count = reader.read_u32::<LittleEndian>()? as usize;
        if term_count != dictionary.len() {
            return Err(FreesiaError::corrupted(format!(
                "statistics table of {term_count} entries does not match {} dictionary terms",
                dictionary.len()
            )));
        }
        let mut stats = Vec::with_capacity(term_count);
        for _ in 0..term_count {
            stats.push(TermStats {
                df: reader.read_u32::<LittleEndian>()?,
                cf: reader.read_u64::<LittleEndian>()?,
                head: BlockPointer::from_raw(reader.read_u64::<LittleEndian>()?),
                tail: BlockPointer::from_raw(reader.read_u64::<LittleEndian>()?),
                base: reader.read_u32::<LittleEndian>()?,
                bound_tf: reader.read_u32::<LittleEndian>()?,
                bound_doc_len: reader.read_u32::<LittleEndian>()?,
            });
        }

        let mut buffers = Vec::with_capacity(term_count);
        for _ in 0..term_count {
            let ndocs = reader.read_u32::<LittleEndian>()? as usize;
            if ndocs > 1 << 28 {
                return Err(FreesiaError::corrupted(format!(
                    "implausible buffer length {ndocs}"
                )));
            }
            let mut docids = vec![0u32; ndocs];
            for docid in docids.iter_mut() {
                *docid = reader.read_u32::<LittleEndian>()?;
            }
            let mut tfs = vec![0u32; ndocs];
            for tf in tfs.iter_mut() {
                *tf = reader.read_u32::<LittleEndian>()?;
            }
            let npos = reader.read_u32::<LittleEndian>()? as usize;
            if npos > 1 << 28 {
                return Err(FreesiaError::corrupted(format!(
                    "implausible position run length {npos}"
                )));
            }
            let mut positions = vec![0u32; npos];
            for delta in positions.iter_mut() {
                *delta = reader.read_u32::<LittleEndian>()?;
            }
            buffers.push(PostingBuffer::from_parts(docids, tfs, positions));
        }

        let pool = SegmentPool::load(reader)?;
        info!(
            "loaded index: {doc_count} docs, {} terms, {} pool segments",
            dictionary.len(),
            pool.segment_count()
        );
        Ok(InvertedIndex {
            config,
            dictionary,
            stats,
            buffers,
            pool,
            doc_lens,
            doc_count,
            last_docid,
        })
    }
}
