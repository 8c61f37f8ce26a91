//! SSTable (Sorted String Table) implementation
//!
//! Immutable on-disk runs of sorted key/value entries with:
//! - Block-based format with optional LZ4 compression
//! - Index block of (last key, offset, size) per data block
//! - Optional bloom filter block
//! - Fixed-size footer locating the metadata blocks

mod block;
mod bloom;
mod builder;
mod iter;
mod reader;

pub use block::{decode_frame, encode_frame, BlockBuilder, DataBlock, FRAME_OVERHEAD};
pub use bloom::BloomFilter;
pub use builder::{BuildOptions, TableBuilder};
pub use iter::TableIterator;
pub use reader::{TableContext, TableReader};

use crate::options::CompressionType;
use crate::types::{Epoch, FileNumber};
use crate::{EngineError, Result};
use block::{get_string, put_string};
use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};

/// SSTable file format version
pub const FORMAT_VERSION: u32 = 1;

/// Magic bytes closing every table file
pub const TABLE_MAGIC: &[u8; 4] = b"LSMT";

/// Metadata of a live table file, as recorded in the manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMeta {
    /// File number (`{:06}.sst`)
    pub number: FileNumber,
    /// Level in the LSM tree
    pub level: usize,
    /// File size in bytes
    pub file_size: u64,
    /// Number of entries, tombstones included
    pub entry_count: u64,
    /// Number of tombstones
    pub tombstone_count: u64,
    /// Smallest key
    pub smallest_key: String,
    /// Largest key
    pub largest_key: String,
    /// Oldest memtable epoch contributing data
    pub min_epoch: Epoch,
    /// Newest memtable epoch contributing data
    pub max_epoch: Epoch,
}

impl TableMeta {
    /// Check if the table's key range intersects `[smallest, largest]`
    pub fn overlaps(&self, smallest: &str, largest: &str) -> bool {
        self.smallest_key.as_str() <= largest && self.largest_key.as_str() >= smallest
    }

    /// Check if the table may contain `key`
    pub fn may_contain_key(&self, key: &str) -> bool {
        key >= self.smallest_key.as_str() && key <= self.largest_key.as_str()
    }

    /// Size with deletions weighted up, used to pick compaction inputs
    pub fn compensated_size(&self) -> u64 {
        if self.entry_count == 0 {
            return self.file_size;
        }
        let avg = self.file_size / self.entry_count.max(1);
        self.file_size + self.tombstone_count * avg * 2
    }
}

/// Properties stored in every table's properties block
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableProperties {
    pub entry_count: u64,
    pub tombstone_count: u64,
    pub num_data_blocks: u64,
    pub raw_key_size: u64,
    pub raw_value_size: u64,
    pub data_size: u64,
    pub smallest_key: String,
    pub largest_key: String,
    pub min_epoch: Epoch,
    pub max_epoch: Epoch,
    pub compression: Option<CompressionType>,
}

/// Location of a block inside a table file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockHandle {
    pub offset: u64,
    pub size: u64,
}

impl BlockHandle {
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }
}

/// Fixed trailer of a table file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Footer {
    pub index: BlockHandle,
    /// Empty when the table has no filter
    pub filter: BlockHandle,
    pub properties: BlockHandle,
}

impl Footer {
    /// Footer size in bytes
    pub const SIZE: usize = 6 * 8 + 4 + 4;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(Self::SIZE);
        for handle in [self.index, self.filter, self.properties] {
            buf.put_u64_le(handle.offset);
            buf.put_u64_le(handle.size);
        }
        buf.put_u32_le(FORMAT_VERSION);
        buf.put_slice(TABLE_MAGIC);
        buf.to_vec()
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() != Self::SIZE {
            return Err(EngineError::InvalidFormat("Footer has wrong size".into()));
        }
        if &data[Self::SIZE - 4..] != TABLE_MAGIC {
            return Err(EngineError::InvalidFormat("Invalid SSTable magic".into()));
        }

        let mut cursor = data;
        let mut handle = || BlockHandle {
            offset: cursor.get_u64_le(),
            size: cursor.get_u64_le(),
        };
        let index = handle();
        let filter = handle();
        let properties = handle();

        let version = (&data[48..52]).get_u32_le();
        if version != FORMAT_VERSION {
            return Err(EngineError::InvalidFormat(format!(
                "Unsupported version: {}",
                version
            )));
        }

        Ok(Self {
            index,
            filter,
            properties,
        })
    }
}

/// One index entry per data block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    /// Largest key stored in the block
    pub last_key: String,
    pub handle: BlockHandle,
}

/// Decoded index block
#[derive(Debug, Clone, Default)]
pub struct IndexBlock {
    entries: Vec<IndexEntry>,
}

impl IndexBlock {
    pub fn new(entries: Vec<IndexEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// First block that may hold keys >= `key`
    pub fn find_block(&self, key: &str) -> Option<usize> {
        let idx = self.entries.partition_point(|e| e.last_key.as_str() < key);
        (idx < self.entries.len()).then_some(idx)
    }

    /// Memory charged to the block cache
    pub fn charge(&self) -> u64 {
        self.entries
            .iter()
            .map(|e| e.last_key.len() as u64 + 40)
            .sum::<u64>()
            + 24
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u32_le(self.entries.len() as u32);
        for entry in &self.entries {
            put_string(&mut buf, &entry.last_key);
            buf.put_u64_le(entry.handle.offset);
            buf.put_u64_le(entry.handle.size);
        }
        buf.to_vec()
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut cursor = payload;
        if cursor.remaining() < 4 {
            return Err(EngineError::InvalidFormat("Index block too short".into()));
        }
        let count = cursor.get_u32_le() as usize;
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            let last_key = get_string(&mut cursor)?;
            if cursor.remaining() < 16 {
                return Err(EngineError::Corruption("Truncated index entry".into()));
            }
            let offset = cursor.get_u64_le();
            let size = cursor.get_u64_le();
            entries.push(IndexEntry {
                last_key,
                handle: BlockHandle { offset, size },
            });
        }
        Ok(Self { entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_footer_roundtrip_and_magic() {
        let footer = Footer {
            index: BlockHandle { offset: 100, size: 20 },
            filter: BlockHandle::default(),
            properties: BlockHandle { offset: 120, size: 30 },
        };
        let bytes = footer.encode();
        assert_eq!(bytes.len(), Footer::SIZE);
        assert_eq!(Footer::decode(&bytes).unwrap(), footer);

        let mut bad = bytes.clone();
        bad[Footer::SIZE - 1] = b'X';
        assert!(Footer::decode(&bad).is_err());
    }

    #[test]
    fn test_index_find_block() {
        let index = IndexBlock::new(vec![
            IndexEntry {
                last_key: "d".into(),
                handle: BlockHandle { offset: 0, size: 10 },
            },
            IndexEntry {
                last_key: "m".into(),
                handle: BlockHandle { offset: 10, size: 10 },
            },
        ]);
        assert_eq!(index.find_block("a"), Some(0));
        assert_eq!(index.find_block("d"), Some(0));
        assert_eq!(index.find_block("e"), Some(1));
        assert_eq!(index.find_block("z"), None);

        let restored = IndexBlock::decode(&index.encode()).unwrap();
        assert_eq!(restored.entries(), index.entries());
    }

    #[test]
    fn test_meta_overlap() {
        let meta = TableMeta {
            number: 1,
            level: 1,
            file_size: 1000,
            entry_count: 10,
            tombstone_count: 5,
            smallest_key: "c".into(),
            largest_key: "f".into(),
            min_epoch: 1,
            max_epoch: 1,
        };
        assert!(meta.overlaps("a", "c"));
        assert!(meta.overlaps("d", "e"));
        assert!(!meta.overlaps("g", "z"));
        assert!(meta.may_contain_key("f"));
        assert!(!meta.may_contain_key("b"));
        assert_eq!(meta.compensated_size(), 2000);
    }
}
