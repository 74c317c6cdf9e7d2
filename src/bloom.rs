//! Bloom Filter
//!
//! Per-SSTable probabilistic membership index. A negative answer lets a read
//! skip the table without touching disk.
//!
//! - No false negatives: every added key answers `true`
//! - False-positive rate bounded by the sizing below
//!
//! ## Sizing
//! For `n` expected keys and target rate `p`:
//! - bits:   `m = -n * ln(p) / ln(2)^2`
//! - hashes: `k = (m / n) * ln(2)`
//!
//! ## Serialized Form
//! ```text
//! ┌────────────────┬─────────────────┬──────────────┐
//! │ num_bits (8)   │ num_hashes (4)  │ bit array    │
//! └────────────────┴─────────────────┴──────────────┘
//! ```
//!
//! Bit positions come from CRC32 double hashing so the layout is stable across
//! builds and platforms (the filter is persisted inside SSTables).

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{LsmError, Result};

/// CRC seed for the base hash
const SEED: u32 = 0x9747_b28c;

/// Salt separating the two double-hashing streams
const MIX_SALT: u64 = 0x5bd1_e995_9e37_79b9;

/// Header: num_bits (8) + num_hashes (4)
const HEADER_SIZE: usize = 12;

#[derive(Debug, Clone)]
pub struct BloomFilter {
    /// Bit array stored as bytes
    bits: Vec<u8>,
    /// Number of addressable bits
    num_bits: u64,
    /// Number of probes per key
    num_hashes: u32,
}

impl BloomFilter {
    /// Create a filter sized for `expected_items` at `false_positive_rate`
    pub fn new(expected_items: usize, false_positive_rate: f64) -> Self {
        let n = expected_items.max(1) as f64;
        let p = false_positive_rate.clamp(1e-6, 0.5);
        let ln2 = std::f64::consts::LN_2;

        let num_bits = ((-n * p.ln()) / (ln2 * ln2)).ceil().max(64.0) as u64;
        let num_hashes = ((num_bits as f64 / n) * ln2).round().clamp(1.0, 30.0) as u32;

        Self {
            bits: vec![0u8; num_bits.div_ceil(8) as usize],
            num_bits,
            num_hashes,
        }
    }

    /// Record a key
    pub fn add(&mut self, key: &[u8]) {
        let (h1, h2) = Self::base_hashes(key);
        for i in 0..self.num_hashes {
            let bit = self.probe(h1, h2, i);
            self.bits[(bit / 8) as usize] |= 1 << (bit % 8);
        }
    }

    /// `false` means definitely absent; `true` means possibly present
    pub fn may_contain(&self, key: &[u8]) -> bool {
        let (h1, h2) = Self::base_hashes(key);
        (0..self.num_hashes).all(|i| {
            let bit = self.probe(h1, h2, i);
            self.bits[(bit / 8) as usize] & (1 << (bit % 8)) != 0
        })
    }

    pub fn num_bits(&self) -> u64 {
        self.num_bits
    }

    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    /// Serialize into the filter block format
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.bits.len());
        buf.put_u64_le(self.num_bits);
        buf.put_u32_le(self.num_hashes);
        buf.put_slice(&self.bits);
        buf.to_vec()
    }

    /// Parse a filter block
    pub fn decode(mut data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(LsmError::Serialization("bloom filter block too short".into()));
        }
        let num_bits = data.get_u64_le();
        let num_hashes = data.get_u32_le();

        if num_bits == 0 || num_hashes == 0 || data.len() as u64 != num_bits.div_ceil(8) {
            return Err(LsmError::Serialization(format!(
                "bloom filter block malformed: {} bits, {} hashes, {} bytes",
                num_bits,
                num_hashes,
                data.len()
            )));
        }

        Ok(Self {
            bits: data.to_vec(),
            num_bits,
            num_hashes,
        })
    }

    fn base_hashes(key: &[u8]) -> (u64, u64) {
        let mut hasher = crc32fast::Hasher::new_with_initial(SEED);
        hasher.update(key);
        let crc = hasher.finalize() as u64;
        // h2 is forced odd so probes never collapse onto one bit
        (mix64(crc), mix64(crc ^ MIX_SALT) | 1)
    }

    #[inline]
    fn probe(&self, h1: u64, h2: u64, i: u32) -> u64 {
        h1.wrapping_add((i as u64).wrapping_mul(h2)) % self.num_bits
    }
}

/// SplitMix64 finalizer: spreads a 32-bit CRC over 64 well-mixed bits
#[inline]
fn mix64(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}
