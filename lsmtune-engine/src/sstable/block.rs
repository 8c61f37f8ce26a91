//! SSTable block encoding
//!
//! Every block on disk is framed as
//! `[compression: u8][payload_len: u32][payload][crc32: u32]`, where the
//! checksum covers everything before it. Data block payloads are a run of
//! length-prefixed entries.

use crate::options::CompressionType;
use crate::{EngineError, Entry, Result, ValueEntry};
use bytes::{Buf, BufMut, Bytes, BytesMut};

const NO_COMPRESSION: u8 = 0;
const LZ4_COMPRESSION: u8 = 1;

const KIND_TOMBSTONE: u8 = 0;
const KIND_VALUE: u8 = 1;

/// Bytes added around a payload by [`encode_frame`]
pub const FRAME_OVERHEAD: usize = 9;

/// Wrap a payload in a checksummed frame
pub fn encode_frame(payload: &[u8], compression: CompressionType) -> Bytes {
    let mut buf = BytesMut::with_capacity(payload.len() + FRAME_OVERHEAD);

    match compression {
        CompressionType::Lz4 => {
            let compressed = lz4_flex::compress_prepend_size(payload);
            buf.put_u8(LZ4_COMPRESSION);
            buf.put_u32_le(compressed.len() as u32);
            buf.put_slice(&compressed);
        }
        CompressionType::None => {
            buf.put_u8(NO_COMPRESSION);
            buf.put_u32_le(payload.len() as u32);
            buf.put_slice(payload);
        }
    }

    let checksum = crc32fast::hash(&buf);
    buf.put_u32_le(checksum);
    buf.freeze()
}

/// Unwrap a frame, optionally verifying its checksum
pub fn decode_frame(data: &[u8], verify_checksum: bool) -> Result<Vec<u8>> {
    if data.len() < FRAME_OVERHEAD {
        return Err(EngineError::InvalidFormat("Block too short".into()));
    }

    let mut cursor = data;
    let flag = cursor.get_u8();
    let len = cursor.get_u32_le() as usize;
    if 5 + len + 4 > data.len() {
        return Err(EngineError::Corruption(format!(
            "Block payload of {} bytes exceeds frame of {} bytes",
            len,
            data.len()
        )));
    }

    let checksum_pos = 5 + len;
    if verify_checksum {
        let expected = (&data[checksum_pos..checksum_pos + 4]).get_u32_le();
        let actual = crc32fast::hash(&data[..checksum_pos]);
        if expected != actual {
            return Err(EngineError::ChecksumMismatch { expected, actual });
        }
    }

    let payload = &data[5..checksum_pos];
    match flag {
        NO_COMPRESSION => Ok(payload.to_vec()),
        LZ4_COMPRESSION => lz4_flex::decompress_size_prepended(payload)
            .map_err(|e| EngineError::Compression(e.to_string())),
        other => Err(EngineError::InvalidFormat(format!(
            "Unknown block compression flag: {}",
            other
        ))),
    }
}

/// Read a length-prefixed UTF-8 string
pub(crate) fn get_string(cursor: &mut &[u8]) -> Result<String> {
    if cursor.remaining() < 4 {
        return Err(EngineError::Corruption("Truncated string length".into()));
    }
    let len = cursor.get_u32_le() as usize;
    if cursor.remaining() < len {
        return Err(EngineError::Corruption("Truncated string".into()));
    }
    let s = std::str::from_utf8(&cursor[..len])
        .map_err(|e| EngineError::InvalidFormat(e.to_string()))?
        .to_string();
    cursor.advance(len);
    Ok(s)
}

pub(crate) fn put_string(buf: &mut BytesMut, s: &str) {
    buf.put_u32_le(s.len() as u32);
    buf.put_slice(s.as_bytes());
}

/// A decoded data block: entries sorted by key
#[derive(Debug, Clone, Default)]
pub struct DataBlock {
    entries: Vec<Entry>,
    size: usize,
}

impl DataBlock {
    /// Build from entries already sorted by key
    pub fn from_entries(entries: Vec<Entry>) -> Self {
        let size = entries.iter().map(|e| e.size() + 9).sum();
        Self { entries, size }
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Exact match lookup
    pub fn get(&self, key: &str) -> Option<&Entry> {
        self.entries
            .binary_search_by(|e| e.key.as_str().cmp(key))
            .ok()
            .map(|i| &self.entries[i])
    }

    /// Position of the first entry with key >= `key`
    pub fn seek(&self, key: &str) -> usize {
        self.entries.partition_point(|e| e.key.as_str() < key)
    }

    /// Memory charged to the block cache
    pub fn charge(&self) -> u64 {
        (self.size + std::mem::size_of::<Self>()) as u64
    }

    /// Serialize the entry payload (unframed)
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(self.size + 4);
        buf.put_u32_le(self.entries.len() as u32);
        for entry in &self.entries {
            match &entry.value {
                ValueEntry::Value(v) => {
                    buf.put_u8(KIND_VALUE);
                    put_string(&mut buf, &entry.key);
                    put_string(&mut buf, v);
                }
                ValueEntry::Tombstone => {
                    buf.put_u8(KIND_TOMBSTONE);
                    put_string(&mut buf, &entry.key);
                }
            }
        }
        buf.to_vec()
    }

    /// Inverse of [`DataBlock::encode`]
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut cursor = payload;
        if cursor.remaining() < 4 {
            return Err(EngineError::InvalidFormat("Data block too short".into()));
        }
        let count = cursor.get_u32_le() as usize;
        let mut entries = Vec::with_capacity(count);

        for _ in 0..count {
            if !cursor.has_remaining() {
                return Err(EngineError::Corruption("Truncated data block".into()));
            }
            let kind = cursor.get_u8();
            let key = get_string(&mut cursor)?;
            let value = match kind {
                KIND_VALUE => ValueEntry::Value(get_string(&mut cursor)?),
                KIND_TOMBSTONE => ValueEntry::Tombstone,
                other => {
                    return Err(EngineError::Corruption(format!(
                        "Unknown entry kind: {}",
                        other
                    )))
                }
            };
            entries.push(Entry { key, value });
        }

        Ok(Self::from_entries(entries))
    }
}

/// Accumulates entries until a block reaches its target size
pub struct BlockBuilder {
    entries: Vec<Entry>,
    estimated_size: usize,
}

impl BlockBuilder {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            estimated_size: 4,
        }
    }

    /// Add an entry; keys must arrive in ascending order
    pub fn add(&mut self, entry: Entry) {
        self.estimated_size += entry.size() + 9;
        self.entries.push(entry);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Uncompressed payload size so far
    pub fn estimated_size(&self) -> usize {
        self.estimated_size
    }

    /// Last key added
    pub fn last_key(&self) -> Option<&str> {
        self.entries.last().map(|e| e.key.as_str())
    }

    /// Finish the block and reset the builder
    pub fn finish(&mut self) -> DataBlock {
        self.estimated_size = 4;
        DataBlock::from_entries(std::mem::take(&mut self.entries))
    }
}

impl Default for BlockBuilder {
    fn default() -> Self {
        Self::new()
    }
}
