//! Error types for columnlsm
//!
//! Provides a unified error type for all operations.
//!
//! Absence of a key is not an error: lookups return `Ok(None)`.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using LsmError
pub type Result<T> = std::result::Result<T, LsmError>;

/// Unified error type for columnlsm operations
#[derive(Debug, Error)]
pub enum LsmError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // WAL Errors
    // -------------------------------------------------------------------------
    /// A WAL frame failed to decode or verify. Recovery treats this as the
    /// end of the log.
    #[error("WAL truncated in segment {segment} at offset {offset}")]
    TruncatedLog { segment: u64, offset: u64 },

    // -------------------------------------------------------------------------
    // Storage Errors
    // -------------------------------------------------------------------------
    #[error("Corrupt segment {}: {reason}", path.display())]
    CorruptSegment { path: PathBuf, reason: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Corrupt manifest: {0}")]
    CorruptManifest(String),

    // -------------------------------------------------------------------------
    // Serialization / Compression Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Codec error: {0}")]
    Codec(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl LsmError {
    /// Shorthand for building a `CorruptSegment` error
    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        LsmError::CorruptSegment {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

impl From<bincode::Error> for LsmError {
    fn from(e: bincode::Error) -> Self {
        LsmError::Serialization(e.to_string())
    }
}
