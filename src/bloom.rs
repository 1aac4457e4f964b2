//! Per-block Bloom filters stored as raw words inside the segment arena.
//!
//! The filter for a block lives in the block itself, directly after the
//! docid payload, so these routines operate in place on `u32` word slices
//! rather than owning their bits. Hashing is deterministic (two odd
//! multiplicative hashes combined by double hashing), which keeps a saved
//! and reloaded pool byte-identical in behavior.
//!
//! One-sided error: `contains` may report a false positive, never a false
//! negative.

/// Number of `u32` words needed for a filter over `n` keys at
/// `bits_per_element` bits each. Always at least one word.
pub fn filter_words(n: usize, bits_per_element: usize) -> usize {
    (n * bits_per_element).max(32).div_ceil(32)
}

fn spread(key: u32) -> (u32, u32) {
    let h1 = key.wrapping_mul(0x9E37_79B1);
    // Forcing h2 odd keeps the probe sequence full-period.
    let h2 = key.wrapping_mul(0x85EB_CA77) | 1;
    (h1, h2)
}

/// Set the `num_hashes` bits for `key` in the filter words.
pub fn insert(words: &mut [u32], num_hashes: u32, key: u32) {
    let num_bits = (words.len() * 32) as u32;
    let (h1, h2) = spread(key);
    for i in 0..num_hashes {
        let bit = h1.wrapping_add(i.wrapping_mul(h2)) % num_bits;
        words[(bit / 32) as usize] |= 1 << (bit % 32);
    }
}

/// Check whether all of `key`'s bits are set in the filter words.
pub fn contains(words: &[u32], num_hashes: u32, key: u32) -> bool {
    let num_bits = (words.len() * 32) as u32;
    let (h1, h2) = spread(key);
    for i in 0..num_hashes {
        let bit = h1.wrapping_add(i.wrapping_mul(h2)) % num_bits;
        if words[(bit / 32) as usize] & (1 << (bit % 32)) == 0 {
            return false;
        }
    }
    true
}
