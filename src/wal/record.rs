//! WAL record and frame encoding

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use crate::codec::Codec;
use crate::error::{LsmError, Result};
use crate::types::{Entry, Sequence};

/// Magic bytes identifying a WAL segment
pub(crate) const MAGIC: &[u8; 4] = b"LWAL";

/// Current segment format version
pub(crate) const VERSION: u16 = 1;

/// Segment header: Magic (4) + Version (2) + Codec id (1)
pub const SEGMENT_HEADER_SIZE: u64 = 7;

/// Frame header: payload length (4) + CRC32 of payload (4)
pub const FRAME_HEADER_SIZE: u64 = 8;

/// Upper bound on a single frame; anything larger is a torn length field
pub(crate) const MAX_FRAME_SIZE: u32 = 256 * 1024 * 1024;

/// One logged mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalRecord {
    /// Sequence assigned by the engine at write time
    pub sequence: Sequence,
    /// Column namespace the key belongs to
    pub column: String,
    pub key: Vec<u8>,
    /// `None` = tombstone
    pub value: Option<Vec<u8>>,
}

impl WalRecord {
    pub fn put(sequence: Sequence, column: impl Into<String>, key: Vec<u8>, value: Vec<u8>) -> Self {
        Self {
            sequence,
            column: column.into(),
            key,
            value: Some(value),
        }
    }

    pub fn delete(sequence: Sequence, column: impl Into<String>, key: Vec<u8>) -> Self {
        Self {
            sequence,
            column: column.into(),
            key,
            value: None,
        }
    }

    /// Split into the column and the MemTable entry
    pub fn into_entry(self) -> (String, Entry) {
        (
            self.column,
            Entry {
                key: self.key,
                value: self.value,
                sequence: self.sequence,
            },
        )
    }
}

/// Encode a segment header for the given codec
pub(crate) fn encode_segment_header(codec_id: u8) -> [u8; SEGMENT_HEADER_SIZE as usize] {
    let mut header = [0u8; SEGMENT_HEADER_SIZE as usize];
    header[0..4].copy_from_slice(MAGIC);
    header[4..6].copy_from_slice(&VERSION.to_le_bytes());
    header[6] = codec_id;
    header
}

/// Validate a segment header, returning the codec id
pub(crate) fn decode_segment_header(header: &[u8]) -> Option<u8> {
    if header.len() != SEGMENT_HEADER_SIZE as usize || &header[0..4] != MAGIC {
        return None;
    }
    let mut version = &header[4..6];
    if version.get_u16_le() != VERSION {
        return None;
    }
    Some(header[6])
}

/// Encode records as one checksummed, compressed frame
pub(crate) fn encode_frame(records: &[WalRecord], codec: &dyn Codec) -> Result<Vec<u8>> {
    let raw = bincode::serialize(records)?;
    let payload = codec.compress(&raw)?;

    if payload.len() as u64 > MAX_FRAME_SIZE as u64 {
        return Err(LsmError::Serialization(format!(
            "WAL frame of {} bytes exceeds limit",
            payload.len()
        )));
    }

    let mut frame = BytesMut::with_capacity(FRAME_HEADER_SIZE as usize + payload.len());
    frame.put_u32_le(payload.len() as u32);
    frame.put_u32_le(crc32fast::hash(&payload));
    frame.put_slice(&payload);
    Ok(frame.to_vec())
}

/// Decode a frame payload whose checksum already verified
pub(crate) fn decode_payload(payload: &[u8], codec: &dyn Codec) -> Result<Vec<WalRecord>> {
    let raw = codec.decompress(payload)?;
    Ok(bincode::deserialize(&raw)?)
}
