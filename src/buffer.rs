//! Per-term staging buffers for postings not yet compressed into blocks.
//!
//! Every term accumulates its postings here first. Low-frequency terms stay
//! buffered until `flush`; once a term's document frequency crosses the
//! configured cutoff, full 128-document groups are drained from the front of
//! its buffer and promoted into immutable compressed blocks.
//!
//! Growth is geometric: each array doubles when full, starting at a small
//! capacity, so rare terms cost a few words and frequent terms amortize
//! their reallocations.

const MIN_CAPACITY: usize = 4;

/// Staged postings for one term: parallel docid/tf arrays plus a flat run
/// of delta-coded positions (one run per staged document, run length equal
/// to the document's tf).
#[derive(Debug, Clone, Default)]
pub(crate) struct PostingBuffer {
    docids: Vec<u32>,
    tfs: Vec<u32>,
    positions: Vec<u32>,
}

impl PostingBuffer {
    pub fn new() -> Self {
        PostingBuffer::default()
    }

    /// Rebuild a buffer from its serialized arrays.
    pub fn from_parts(docids: Vec<u32>, tfs: Vec<u32>, positions: Vec<u32>) -> Self {
        PostingBuffer {
            docids,
            tfs,
            positions,
        }
    }

    fn grow(vec: &mut Vec<u32>, extra: usize) {
        if vec.len() + extra > vec.capacity() {
            let doubled = vec.capacity().max(MIN_CAPACITY);
            vec.reserve_exact(doubled.max(extra));
        }
    }

    /// Stage one posting. `positions` holds the absolute 0-based occurrence
    /// indices for the document; they are delta-coded on the way in (first
    /// absolute, then gaps).
    pub fn push_posting(&mut self, docid: u32, tf: u32, positions: &[u32]) {
        Self::grow(&mut self.docids, 1);
        self.docids.push(docid);
        Self::grow(&mut self.tfs, 1);
        self.tfs.push(tf);
        if !positions.is_empty() {
            Self::grow(&mut self.positions, positions.len());
            let mut prev = 0u32;
            for (i, &pos) in positions.iter().enumerate() {
                if i == 0 {
                    self.positions.push(pos);
                } else {
                    self.positions.push(pos - prev);
                }
                prev = pos;
            }
        }
    }

    /// Number of staged documents.
    pub fn len(&self) -> usize {
        self.docids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docids.is_empty()
    }

    pub fn docids(&self) -> &[u32] {
        &self.docids
    }

    pub fn tfs(&self) -> &[u32] {
        &self.tfs
    }

    pub fn positions(&self) -> &[u32] {
        &self.positions
    }

    /// Number of position entries belonging to the first `ndocs` staged
    /// documents.
    pub fn position_prefix(&self, ndocs: usize) -> usize {
        self.tfs[..ndocs].iter().map(|&tf| tf as usize).sum()
    }

    /// Drop the first `ndocs` staged documents (and their position runs)
    /// after they have been promoted into a block.
    pub fn discard_front(&mut self, ndocs: usize) {
        let npos = self.position_prefix(ndocs).min(self.positions.len());
        self.docids.drain(..ndocs);
        self.tfs.drain(..ndocs);
        self.positions.drain(..npos);
    }
}
