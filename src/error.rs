//! Error types for the freesia crate.

use thiserror::Error;

/// The error type for all fallible freesia operations.
#[derive(Error, Debug)]
pub enum FreesiaError {
    /// An index construction or chain traversal error.
    #[error("index error: {0}")]
    Index(String),

    /// The operation conflicts with the configured index mode or settings.
    #[error("configuration error: {0}")]
    Config(String),

    /// A persisted image failed validation on load.
    #[error("corrupted index image: {0}")]
    Corrupted(String),

    /// An underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FreesiaError {
    /// Create an index error.
    pub fn index<S: Into<String>>(message: S) -> Self {
        FreesiaError::Index(message.into())
    }

    /// Create a configuration error.
    pub fn config<S: Into<String>>(message: S) -> Self {
        FreesiaError::Config(message.into())
    }

    /// Create a corruption error.
    pub fn corrupted<S: Into<String>>(message: S) -> Self {
        FreesiaError::Corrupted(message.into())
    }
}

/// A specialized `Result` type for freesia operations.
pub type Result<T> = std::result::Result<T, FreesiaError>;
