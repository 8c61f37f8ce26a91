//! Bloom filter for fast existence checks

use crate::{EngineError, Result};
use bytes::{Buf, BufMut, BytesMut};

/// Bloom filter implementation
#[derive(Debug, Clone)]
pub struct BloomFilter {
    bits: Vec<u8>,
    num_bits: usize,
    num_hashes: usize,
}

impl BloomFilter {
    /// Create a new bloom filter sized for `num_keys`
    pub fn new(num_keys: usize, bits_per_key: f64) -> Self {
        let num_bits = ((num_keys as f64 * bits_per_key).ceil() as usize).max(64);
        let num_bytes = num_bits.div_ceil(8);

        // Optimal number of hash functions
        let num_hashes = (bits_per_key * 0.69).round() as usize;
        let num_hashes = num_hashes.clamp(1, 30);

        Self {
            bits: vec![0u8; num_bytes],
            num_bits: num_bytes * 8,
            num_hashes,
        }
    }

    /// Build a filter over precomputed key hashes
    pub fn from_hashes(hashes: &[u64], bits_per_key: f64) -> Self {
        let mut filter = Self::new(hashes.len(), bits_per_key);
        for &h in hashes {
            filter.add_hash(h);
        }
        filter
    }

    /// Create from existing data
    pub fn from_bytes(data: Vec<u8>, num_hashes: usize) -> Self {
        let num_bits = data.len() * 8;
        Self {
            bits: data,
            num_bits,
            num_hashes,
        }
    }

    /// Stable 64-bit hash of a key. Filters are persisted, so this must not
    /// depend on the std hasher.
    pub fn hash_key(key: &str) -> u64 {
        // FNV-1a followed by a finalizer
        let mut h: u64 = 0xcbf2_9ce4_8422_2325;
        for b in key.as_bytes() {
            h ^= *b as u64;
            h = h.wrapping_mul(0x0100_0000_01b3);
        }
        h ^= h >> 33;
        h = h.wrapping_mul(0xff51_afd7_ed55_8ccd);
        h ^= h >> 33;
        h
    }

    /// Add a key to the filter
    pub fn add(&mut self, key: &str) {
        self.add_hash(Self::hash_key(key));
    }

    /// Add a precomputed key hash
    pub fn add_hash(&mut self, hash: u64) {
        let (h1, h2) = Self::split(hash);
        for i in 0..self.num_hashes {
            let bit = self.bit_position(h1, h2, i);
            self.set_bit(bit);
        }
    }

    /// Check if a key may be in the set
    pub fn may_contain(&self, key: &str) -> bool {
        let (h1, h2) = Self::split(Self::hash_key(key));
        for i in 0..self.num_hashes {
            let bit = self.bit_position(h1, h2, i);
            if !self.get_bit(bit) {
                return false;
            }
        }
        true
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }

    /// Get number of hash functions
    pub fn num_hashes(&self) -> usize {
        self.num_hashes
    }

    /// Memory charged to the block cache
    pub fn charge(&self) -> u64 {
        self.bits.len() as u64 + 16
    }

    /// Encode as `[num_hashes: u8][bits...]`
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(1 + self.bits.len());
        buf.put_u8(self.num_hashes as u8);
        buf.put_slice(&self.bits);
        buf.to_vec()
    }

    /// Inverse of [`BloomFilter::encode`]
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.is_empty() {
            return Err(EngineError::InvalidFormat("Bloom filter data too short".into()));
        }
        let mut cursor = data;
        let num_hashes = cursor.get_u8() as usize;
        Ok(Self::from_bytes(cursor.to_vec(), num_hashes))
    }

    fn split(hash: u64) -> (u64, u64) {
        let h2 = hash.rotate_right(17) | 1;
        (hash, h2)
    }

    fn bit_position(&self, h1: u64, h2: u64, i: usize) -> usize {
        let hash = h1.wrapping_add((i as u64).wrapping_mul(h2));
        (hash % self.num_bits as u64) as usize
    }

    fn set_bit(&mut self, bit: usize) {
        let byte = bit / 8;
        let offset = bit % 8;
        if byte < self.bits.len() {
            self.bits[byte] |= 1 << offset;
        }
    }

    fn get_bit(&self, bit: usize) -> bool {
        let byte = bit / 8;
        let offset = bit % 8;
        if byte < self.bits.len() {
            (self.bits[byte] >> offset) & 1 == 1
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bloom_filter_basic() {
        let mut filter = BloomFilter::new(100, 10.0);

        for i in 0..100 {
            filter.add(&format!("key-{}", i));
        }

        // All added keys should be found
        for i in 0..100 {
            assert!(filter.may_contain(&format!("key-{}", i)));
        }

        // Count false positives for non-existent keys
        let mut false_positives = 0;
        for i in 100..1000 {
            if filter.may_contain(&format!("key-{}", i)) {
                false_positives += 1;
            }
        }

        // False positive rate should be around 1%
        let fp_rate = false_positives as f64 / 900.0;
        assert!(fp_rate < 0.05, "False positive rate too high: {}", fp_rate);
    }

    #[test]
    fn test_bloom_filter_encoding() {
        let hashes: Vec<u64> = (0..50)
            .map(|i| BloomFilter::hash_key(&format!("k{}", i)))
            .collect();
        let filter = BloomFilter::from_hashes(&hashes, 8.0);

        let restored = BloomFilter::decode(&filter.encode()).unwrap();
        assert_eq!(restored.num_hashes(), filter.num_hashes());
        for i in 0..50 {
            assert!(restored.may_contain(&format!("k{}", i)));
        }
    }

    #[test]
    fn test_hash_is_stable() {
        assert_eq!(BloomFilter::hash_key("abc"), BloomFilter::hash_key("abc"));
        assert_ne!(BloomFilter::hash_key("abc"), BloomFilter::hash_key("abd"));
    }
}
