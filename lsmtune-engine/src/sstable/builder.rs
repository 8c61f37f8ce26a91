//! SSTable builder for writing sorted entries to disk

use super::block::{encode_frame, BlockBuilder};
use super::{BlockHandle, BloomFilter, Footer, IndexBlock, IndexEntry, TableMeta, TableProperties};
use crate::options::{CompressionType, DbOptions};
use crate::types::{Epoch, FileNumber};
use crate::{EngineError, Entry, Result, ValueEntry};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Format options for a table being written
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BuildOptions {
    /// Target uncompressed data block size
    pub block_size: u64,
    pub compression: CompressionType,
    /// `None` writes no filter block
    pub bits_per_key: Option<f64>,
}

impl BuildOptions {
    pub fn from_options(options: &DbOptions) -> Self {
        Self {
            block_size: options.table.block_size,
            compression: options.compression,
            bits_per_key: options.table.filter_policy.map(|p| p.bits_per_key),
        }
    }
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            block_size: 4096,
            compression: CompressionType::Lz4,
            bits_per_key: Some(10.0),
        }
    }
}

/// Streams sorted entries into a new table file
pub struct TableBuilder {
    options: BuildOptions,
    path: PathBuf,
    number: FileNumber,
    writer: BufWriter<File>,
    offset: u64,

    block: BlockBuilder,
    index_entries: Vec<IndexEntry>,
    key_hashes: Vec<u64>,

    props: TableProperties,
    first_key: Option<String>,
    last_key: Option<String>,
}

impl TableBuilder {
    /// Create the file and start a new table
    pub fn new(path: impl AsRef<Path>, number: FileNumber, options: BuildOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let writer = BufWriter::new(File::create(&path)?);
        Ok(Self {
            options,
            path,
            number,
            writer,
            offset: 0,
            block: BlockBuilder::new(),
            index_entries: Vec::new(),
            key_hashes: Vec::new(),
            props: TableProperties {
                compression: Some(options.compression),
                ..Default::default()
            },
            first_key: None,
            last_key: None,
        })
    }

    /// Add an entry. Keys must be strictly increasing.
    pub fn add(&mut self, entry: Entry) -> Result<()> {
        if let Some(last) = &self.last_key {
            if entry.key.as_str() <= last.as_str() {
                return Err(EngineError::InvalidArgument(format!(
                    "Keys added out of order: {} after {}",
                    entry.key, last
                )));
            }
        }

        self.props.entry_count += 1;
        self.props.raw_key_size += entry.key.len() as u64;
        match &entry.value {
            ValueEntry::Value(v) => self.props.raw_value_size += v.len() as u64,
            ValueEntry::Tombstone => self.props.tombstone_count += 1,
        }

        if self.options.bits_per_key.is_some() {
            self.key_hashes.push(BloomFilter::hash_key(&entry.key));
        }
        if self.first_key.is_none() {
            self.first_key = Some(entry.key.clone());
        }
        self.last_key = Some(entry.key.clone());

        self.block.add(entry);
        if self.block.estimated_size() as u64 >= self.options.block_size {
            self.flush_block()?;
        }
        Ok(())
    }

    /// Number of entries added so far
    pub fn num_entries(&self) -> u64 {
        self.props.entry_count
    }

    pub fn is_empty(&self) -> bool {
        self.props.entry_count == 0
    }

    /// Bytes written plus the pending block
    pub fn estimated_size(&self) -> u64 {
        self.offset + self.block.estimated_size() as u64
    }

    pub fn number(&self) -> FileNumber {
        self.number
    }

    fn flush_block(&mut self) -> Result<()> {
        if self.block.is_empty() {
            return Ok(());
        }
        let Some(last_key) = self.block.last_key().map(str::to_string) else {
            return Ok(());
        };

        let block = self.block.finish();
        let bytes = encode_frame(&block.encode(), self.options.compression);
        let handle = self.write_raw(&bytes)?;

        self.index_entries.push(IndexEntry { last_key, handle });
        self.props.num_data_blocks += 1;
        Ok(())
    }

    fn write_raw(&mut self, bytes: &[u8]) -> Result<BlockHandle> {
        let handle = BlockHandle {
            offset: self.offset,
            size: bytes.len() as u64,
        };
        self.writer.write_all(bytes)?;
        self.offset += bytes.len() as u64;
        Ok(handle)
    }

    /// Write the metadata blocks and footer, sync the file and return
    /// its metadata. The table is recorded at level 0; callers move it.
    pub fn finish(mut self, min_epoch: Epoch, max_epoch: Epoch) -> Result<TableMeta> {
        self.flush_block()?;
        self.props.data_size = self.offset;

        // Write index
        let index = IndexBlock::new(std::mem::take(&mut self.index_entries));
        let index_handle = self.write_raw(&encode_frame(&index.encode(), CompressionType::None))?;

        // Write bloom filter
        let filter_handle = match self.options.bits_per_key {
            Some(bits_per_key) => {
                let filter = BloomFilter::from_hashes(&self.key_hashes, bits_per_key);
                self.write_raw(&encode_frame(&filter.encode(), CompressionType::None))?
            }
            None => BlockHandle::default(),
        };

        // Write properties
        self.props.smallest_key = self.first_key.clone().unwrap_or_default();
        self.props.largest_key = self.last_key.clone().unwrap_or_default();
        self.props.min_epoch = min_epoch;
        self.props.max_epoch = max_epoch;
        let props_bytes = bincode::serialize(&self.props)?;
        let props_handle = self.write_raw(&encode_frame(&props_bytes, CompressionType::None))?;

        // Write footer
        let footer = Footer {
            index: index_handle,
            filter: filter_handle,
            properties: props_handle,
        };
        self.write_raw(&footer.encode())?;

        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;

        Ok(TableMeta {
            number: self.number,
            level: 0,
            file_size: self.offset,
            entry_count: self.props.entry_count,
            tombstone_count: self.props.tombstone_count,
            smallest_key: self.props.smallest_key.clone(),
            largest_key: self.props.largest_key.clone(),
            min_epoch,
            max_epoch,
        })
    }

    /// Discard a partially written table
    pub fn abandon(self) -> Result<()> {
        let path = self.path.clone();
        drop(self);
        fs::remove_file(path)?;
        Ok(())
    }
}
