//! Retrieval over compressed block chains.
//!
//! Three algorithms, all operating directly on the pool without
//! materializing full posting lists:
//!
//! - [`bwand_and`](Searcher::bwand_and): conjunction driven by the rarest
//!   term, probing every other chain with Bloom-assisted membership tests.
//! - [`bwand_or`](Searcher::bwand_or): top-k disjunction ranked by
//!   accumulated static per-term upper bounds; terms are processed in
//!   descending bound order and stop admitting new candidates once the
//!   remaining terms cannot lift an unseen document into the top k.
//! - [`svs`](Searcher::svs): small-vs-small conjunction that intersects
//!   the candidate set against each chain in turn, skipping whole blocks
//!   by their stored maximum docid and galloping within decoded blocks.
//!
//! Searchers read only compressed blocks, so the index must be flushed
//! first; construction fails otherwise.

use ahash::{AHashMap, AHashSet};
use log::debug;

use crate::codec::BLOCK_LEN;
use crate::error::{FreesiaError, Result};
use crate::index::InvertedIndex;
use crate::pool::BlockPointer;

/// A docid with its accumulated upper-bound score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredDoc {
    pub docid: u32,
    pub score: f32,
}

/// Read-only query interface over a flushed index.
pub struct Searcher<'a> {
    index: &'a InvertedIndex,
}

impl<'a> Searcher<'a> {
    /// Wrap a flushed index. Fails if any postings are still staged or the
    /// index uses reverse-linked chains.
    pub fn new(index: &'a InvertedIndex) -> Result<Self> {
        index.ensure_forward()?;
        if index.has_buffered_postings() {
            return Err(FreesiaError::index(
                "index has unflushed postings; flush before searching",
            ));
        }
        Ok(Searcher { index })
    }

    /// Conjunction of the usable query terms, in ascending docid order.
    /// Terms absent from the dictionary contribute nothing; the result is
    /// empty only when no term resolves. `hits` caps the result count;
    /// 0 means no cap.
    ///
    /// The rarest term's chain drives; every candidate is probed against
    /// the other chains with [`SegmentPool::contains_docid`], whose
    /// pointers advance monotonically so each chain is walked at most once.
    /// Terms with equal document frequency keep their query order.
    ///
    /// [`SegmentPool::contains_docid`]: crate::pool::SegmentPool::contains_docid
    pub fn bwand_and(&self, terms: &[&str], hits: usize) -> Result<Vec<u32>> {
        let cap = if hits == 0 { usize::MAX } else { hits };
        let lists = match self.conjunction_lists(terms)? {
            Some(lists) => lists,
            None => return Ok(Vec::new()),
        };
        let pool = self.index.pool();
        let mut probes: Vec<BlockPointer> = lists[1..].iter().map(|&(_, head)| head).collect();
        let mut matches = Vec::new();
        let mut pointer = lists[0].1;
        let mut block = [0u32; BLOCK_LEN];
        'chain: while !pointer.is_undefined() {
            let count = pool.decompress_docid_block(&mut block, pointer)?;
            'candidates: for &docid in &block[..count] {
                for probe in probes.iter_mut() {
                    if !pool.contains_docid(docid, probe)? {
                        continue 'candidates;
                    }
                }
                matches.push(docid);
                if matches.len() >= cap {
                    break 'chain;
                }
            }
            pointer = pool.next_pointer(pointer)?;
        }
        debug!(
            "bwand_and over {} terms matched {} docs",
            lists.len(),
            matches.len()
        );
        Ok(matches)
    }

    /// Top-`hits` disjunction, ordered by descending accumulated
    /// upper-bound score with ties broken by ascending docid. `hits` of 0
    /// means no cap (the full ranked union).
    ///
    /// A document's score is the sum of the static upper bounds of the
    /// query terms it contains, so ranking needs no payload decoding and
    /// works in every index mode. Terms are processed in descending bound
    /// order; a running suffix sum of the remaining bounds gates admission.
    /// Once it falls below the current k-th best accumulated score, no
    /// unseen document can reach the top k, and later terms switch from
    /// decoding their whole chain to block-skipping membership probes
    /// that only finish the scores of already-admitted candidates. The
    /// gate never reopens (the suffix shrinks while the threshold only
    /// grows), which keeps admitted scores exact.
    pub fn bwand_or(&self, terms: &[&str], hits: usize) -> Result<Vec<ScoredDoc>> {
        let cap = if hits == 0 { usize::MAX } else { hits };

        struct OrTerm {
            bound: f32,
            head: BlockPointer,
        }
        let mut or_terms = Vec::new();
        for term in dedup(terms) {
            let id = match self.index.term_id(term) {
                Some(id) => id,
                None => continue,
            };
            if self.index.term_stats(id).head.is_undefined() {
                continue;
            }
            or_terms.push(OrTerm {
                bound: self.index.term_upper_bound(term),
                head: self.index.term_stats(id).head,
            });
        }
        or_terms.sort_by(|a, b| b.bound.total_cmp(&a.bound));

        let mut suffix = vec![0f32; or_terms.len() + 1];
        for i in (0..or_terms.len()).rev() {
            suffix[i] = suffix[i + 1] + or_terms[i].bound;
        }

        let pool = self.index.pool();
        let mut scores: AHashMap<u32, f32> = AHashMap::new();
        let mut block = [0u32; BLOCK_LEN];
        for (i, term) in or_terms.iter().enumerate() {
            let admitting = scores.len() < cap || suffix[i] >= kth_best(&scores, cap);
            if admitting {
                let mut pointer = term.head;
                while !pointer.is_undefined() {
                    let count = pool.decompress_docid_block(&mut block, pointer)?;
                    for &docid in &block[..count] {
                        *scores.entry(docid).or_insert(0.0) += term.bound;
                    }
                    pointer = pool.next_pointer(pointer)?;
                }
            } else {
                // Gate closed: no unseen document can reach the top k, so
                // only the admitted candidates need this term's
                // contribution. Probing them in ascending order lets the
                // chain pointer advance monotonically, skipping blocks by
                // their maximum docid instead of decoding the whole chain.
                let mut admitted: Vec<u32> = scores.keys().copied().collect();
                admitted.sort_unstable();
                let mut probe = term.head;
                for docid in admitted {
                    if probe.is_undefined() {
                        break;
                    }
                    if pool.contains_docid(docid, &mut probe)? {
                        if let Some(score) = scores.get_mut(&docid) {
                            *score += term.bound;
                        }
                    }
                }
            }
        }

        let mut results: Vec<ScoredDoc> = scores
            .into_iter()
            .map(|(docid, score)| ScoredDoc { docid, score })
            .collect();
        results.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.docid.cmp(&b.docid)));
        results.truncate(cap);
        Ok(results)
    }

    /// Small-vs-small conjunction of the usable query terms, in ascending
    /// docid order. Terms absent from the dictionary contribute nothing.
    /// `hits` caps the result count; 0 means no cap.
    ///
    /// The rarest term's docids seed the candidate set; each further chain
    /// filters it, skipping blocks whose maximum docid falls short of the
    /// candidate and galloping within the blocks it does decode.
    pub fn svs(&self, terms: &[&str], hits: usize) -> Result<Vec<u32>> {
        let lists = match self.conjunction_lists(terms)? {
            Some(lists) => lists,
            None => return Ok(Vec::new()),
        };
        let pool = self.index.pool();
        let mut candidates = Vec::new();
        let mut pointer = lists[0].1;
        let mut block = [0u32; BLOCK_LEN];
        while !pointer.is_undefined() {
            let count = pool.decompress_docid_block(&mut block, pointer)?;
            candidates.extend_from_slice(&block[..count]);
            pointer = pool.next_pointer(pointer)?;
        }
        for &(_, head) in &lists[1..] {
            candidates = self.intersect_chain(&candidates, head)?;
            if candidates.is_empty() {
                break;
            }
        }
        if hits > 0 {
            candidates.truncate(hits);
        }
        Ok(candidates)
    }

    /// Resolve a conjunction's terms to (df, chain head) pairs sorted by
    /// ascending document frequency. Terms absent from the dictionary or
    /// without a chain contribute nothing; `None` means no term resolved
    /// at all.
    fn conjunction_lists(&self, terms: &[&str]) -> Result<Option<Vec<(u32, BlockPointer)>>> {
        let mut lists = Vec::new();
        for term in dedup(terms) {
            let id = match self.index.term_id(term) {
                Some(id) => id,
                None => continue,
            };
            let stats = self.index.term_stats(id);
            if stats.head.is_undefined() {
                continue;
            }
            lists.push((stats.df, stats.head));
        }
        if lists.is_empty() {
            return Ok(None);
        }
        // Stable sort: equal-df terms keep their query order.
        lists.sort_by_key(|&(df, _)| df);
        Ok(Some(lists))
    }

    /// Keep only the candidates present in the chain. Both sides are
    /// ascending, so the chain is walked once with a monotone cursor.
    fn intersect_chain(&self, candidates: &[u32], head: BlockPointer) -> Result<Vec<u32>> {
        let pool = self.index.pool();
        let mut kept = Vec::with_capacity(candidates.len());
        let mut pointer = head;
        let mut block = [0u32; BLOCK_LEN];
        let mut count = 0usize;
        let mut loaded = false;
        let mut cursor = 0usize;
        for &docid in candidates {
            while !pointer.is_undefined() && pool.block_max(pointer)? < docid {
                pointer = pool.next_pointer(pointer)?;
                loaded = false;
                cursor = 0;
            }
            if pointer.is_undefined() {
                break;
            }
            if !loaded {
                count = pool.decompress_docid_block(&mut block, pointer)?;
                loaded = true;
            }
            let (found, at) = gallop(&block[..count], cursor, docid);
            if found {
                kept.push(docid);
                cursor = at + 1;
            } else {
                cursor = at;
            }
        }
        Ok(kept)
    }
}

/// Exponential probe from `start`, then binary search in the bracketed
/// window. Returns whether `target` was found and its index (or the
/// insertion point).
fn gallop(haystack: &[u32], start: usize, target: u32) -> (bool, usize) {
    let len = haystack.len();
    if start >= len {
        return (false, len);
    }
    let mut bound = 1usize;
    while start + bound < len && haystack[start + bound] < target {
        bound <<= 1;
    }
    let lo = start + (bound >> 1);
    let hi = (start + bound + 1).min(len);
    match haystack[lo..hi].binary_search(&target) {
        Ok(i) => (true, lo + i),
        Err(i) => (false, lo + i),
    }
}

fn kth_best(scores: &AHashMap<u32, f32>, k: usize) -> f32 {
    if scores.len() < k {
        return 0.0;
    }
    let mut values: Vec<f32> = scores.values().copied().collect();
    values.sort_by(|a, b| b.total_cmp(a));
    values[k - 1]
}

fn dedup<'t>(terms: &[&'t str]) -> Vec<&'t str> {
    let mut seen = AHashSet::new();
    terms
        .iter()
        .copied()
        .filter(|term| seen.insert(*term))
        .collect()
}
