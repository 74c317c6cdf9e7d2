//! Block compression
//!
//! The engine compresses every WAL frame and every SSTable data block through
//! a [`Codec`]. Codecs must be lossless and deterministic. Each file records
//! the id of the codec that wrote it, so data written under one built-in codec
//! stays readable after the configured codec changes.

use std::fmt::Debug;
use std::sync::Arc;

use crate::error::{LsmError, Result};

/// Pluggable compress/decompress collaborator
pub trait Codec: Send + Sync + Debug {
    /// Stable identifier persisted next to compressed data
    fn id(&self) -> u8;

    fn compress(&self, input: &[u8]) -> Result<Vec<u8>>;

    fn decompress(&self, input: &[u8]) -> Result<Vec<u8>>;
}

/// Identity codec (id 0)
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCompression;

impl NoCompression {
    pub const ID: u8 = 0;
}

impl Codec for NoCompression {
    fn id(&self) -> u8 {
        Self::ID
    }

    fn compress(&self, input: &[u8]) -> Result<Vec<u8>> {
        Ok(input.to_vec())
    }

    fn decompress(&self, input: &[u8]) -> Result<Vec<u8>> {
        Ok(input.to_vec())
    }
}

/// Raw Snappy codec (id 1)
#[derive(Debug, Clone, Copy, Default)]
pub struct SnappyCodec;

impl SnappyCodec {
    pub const ID: u8 = 1;
}

impl Codec for SnappyCodec {
    fn id(&self) -> u8 {
        Self::ID
    }

    fn compress(&self, input: &[u8]) -> Result<Vec<u8>> {
        snap::raw::Encoder::new()
            .compress_vec(input)
            .map_err(|e| LsmError::Codec(format!("Snappy compression failed: {}", e)))
    }

    fn decompress(&self, input: &[u8]) -> Result<Vec<u8>> {
        snap::raw::Decoder::new()
            .decompress_vec(input)
            .map_err(|e| LsmError::Codec(format!("Snappy decompression failed: {}", e)))
    }
}

/// Pick the codec able to read data tagged with `id`
///
/// Prefers the configured codec (which may be a custom one), then falls back
/// to the built-ins.
pub fn resolve(id: u8, configured: &Arc<dyn Codec>) -> Result<Arc<dyn Codec>> {
    if configured.id() == id {
        return Ok(Arc::clone(configured));
    }
    match id {
        NoCompression::ID => Ok(Arc::new(NoCompression)),
        SnappyCodec::ID => Ok(Arc::new(SnappyCodec)),
        other => Err(LsmError::Codec(format!("Unknown codec id: {}", other))),
    }
}
