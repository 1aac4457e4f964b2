//! # Freesia
//!
//! A disk-serializable compressed inverted index for Rust.
//!
//! ## Features
//!
//! - Pure Rust implementation
//! - Bit-packed posting blocks in a pointer-free segment arena
//! - Optional term frequencies and positions per posting
//! - Per-block Bloom filters for fast membership probes
//! - Skip-aware conjunction and exact top-k disjunction
//! - Single-stream save and load of the whole index image
// Core modules
mod bloom;
mod buffer;
pub mod codec;
mod dictionary;
mod error;
pub mod index;
pub mod pool;
pub mod score;
pub mod search;

// Re-exports for the public API
pub use codec::BLOCK_LEN;
pub use dictionary::TermId;
pub use error::{FreesiaError, Result};
pub use index::{IndexConfig, InvertedIndex, Posting};
pub use pool::{BlockPointer, BloomConfig, IndexMode, SegmentPool};
pub use search::{ScoredDoc, Searcher};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
