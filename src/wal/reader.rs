//! WAL Reader
//!
//! Handles reading frames from one WAL segment.

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;
use std::sync::Arc;

use bytes::Buf;

use crate::codec::{self, Codec};
use crate::error::{LsmError, Result};

use super::record::{
    decode_payload, decode_segment_header, FRAME_HEADER_SIZE, MAX_FRAME_SIZE, SEGMENT_HEADER_SIZE,
};
use super::WalRecord;

/// Reads frames from a WAL segment
///
/// Any frame that cannot be read in full, fails its checksum, or fails to
/// decode yields `LsmError::TruncatedLog`. The reader does not advance past
/// it; `valid_len()` is the end of the last good frame.
pub struct WalReader {
    segment_id: u64,
    reader: BufReader<File>,
    codec: Arc<dyn Codec>,
    /// Offset just past the last frame returned successfully
    valid_len: u64,
    /// Set once a bad frame was hit
    failed: bool,
}

impl WalReader {
    /// Open segment `segment_id` at `path` for reading
    ///
    /// A missing or torn header is reported as `TruncatedLog` at offset 0.
    pub fn open(path: &Path, segment_id: u64, configured: &Arc<dyn Codec>) -> Result<Self> {
        let mut reader = BufReader::new(File::open(path)?);

        let mut header = [0u8; SEGMENT_HEADER_SIZE as usize];
        match reader.read_exact(&mut header) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                return Err(LsmError::TruncatedLog {
                    segment: segment_id,
                    offset: 0,
                })
            }
            Err(e) => return Err(e.into()),
        }

        let codec_id = decode_segment_header(&header).ok_or(LsmError::TruncatedLog {
            segment: segment_id,
            offset: 0,
        })?;
        let codec = codec::resolve(codec_id, configured)?;

        Ok(Self {
            segment_id,
            reader,
            codec,
            valid_len: SEGMENT_HEADER_SIZE,
            failed: false,
        })
    }

    /// Read the next frame
    ///
    /// - `Ok(Some(records))`: a verified frame
    /// - `Ok(None)`: clean end of segment
    /// - `Err(TruncatedLog)`: torn or corrupt frame
    pub fn next_frame(&mut self) -> Result<Option<Vec<WalRecord>>> {
        if self.failed {
            return Err(self.truncated());
        }

        let mut header = [0u8; FRAME_HEADER_SIZE as usize];
        match read_full(&mut self.reader, &mut header)? {
            0 => return Ok(None),
            n if n < header.len() => return Err(self.fail()),
            _ => {}
        }

        let mut buf = &header[..];
        let len = buf.get_u32_le();
        let crc = buf.get_u32_le();

        if len > MAX_FRAME_SIZE {
            return Err(self.fail());
        }

        let mut payload = vec![0u8; len as usize];
        if read_full(&mut self.reader, &mut payload)? < payload.len() {
            return Err(self.fail());
        }

        if crc32fast::hash(&payload) != crc {
            return Err(self.fail());
        }

        let records = match decode_payload(&payload, self.codec.as_ref()) {
            Ok(records) => records,
            Err(_) => return Err(self.fail()),
        };

        self.valid_len += FRAME_HEADER_SIZE + len as u64;
        Ok(Some(records))
    }

    /// Offset just past the last good frame
    pub fn valid_len(&self) -> u64 {
        self.valid_len
    }

    pub fn segment_id(&self) -> u64 {
        self.segment_id
    }

    /// Iterate over frames until the end of the segment or the first bad frame
    pub fn frames(self) -> WalIterator {
        WalIterator { reader: self }
    }

    fn fail(&mut self) -> LsmError {
        self.failed = true;
        self.truncated()
    }

    fn truncated(&self) -> LsmError {
        LsmError::TruncatedLog {
            segment: self.segment_id,
            offset: self.valid_len,
        }
    }
}

/// Iterator over WAL frames
pub struct WalIterator {
    reader: WalReader,
}

impl Iterator for WalIterator {
    type Item = Result<Vec<WalRecord>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.reader.failed {
            return None;
        }
        self.reader.next_frame().transpose()
    }
}

/// Read until `buf` is full or EOF; returns bytes read
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}
