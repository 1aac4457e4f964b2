//! Scoring helpers used for pruning.
//!
//! Retrieval never ranks by a full scoring model here; the only scores in
//! play are BM25-shaped upper bounds used to prune block traversal. The tf
//! normalization uses fixed constants (including a fixed length pivot
//! instead of a live corpus average) so a bound stored at build time remains
//! a provable upper bound no matter what is inserted later.

const K1: f32 = 0.9;
const B: f32 = 0.4;
const PIVOT: f32 = 128.0;

/// Saturating term-frequency normalization for a posting with the given
/// term frequency in a document of the given length.
///
/// Monotonically increasing in `tf` and decreasing in `doc_len`.
pub fn tf_norm(tf: u32, doc_len: u32) -> f32 {
    let tf = tf as f32;
    tf * (K1 + 1.0) / (tf + K1 * (1.0 - B + B * doc_len as f32 / PIVOT))
}

/// BM25-style inverse document frequency.
pub fn idf(doc_count: u32, df: u32) -> f32 {
    let n = doc_count as f32;
    let df = df as f32;
    ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
}

/// Static per-term score upper bound: the idf weight times the tf
/// normalization of the term's stored max-(tf, docLen) pair.
pub fn upper_bound(doc_count: u32, df: u32, bound_tf: u32, bound_doc_len: u32) -> f32 {
    idf(doc_count, df) * tf_norm(bound_tf, bound_doc_len)
}
