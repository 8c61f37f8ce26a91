//! Forward iteration over one table

use super::{DataBlock, IndexBlock, TableReader};
use crate::options::ReadOptions;
use crate::{Entry, Result};
use std::sync::Arc;

/// Cursor over the entries of a single table, tombstones included
pub struct TableIterator {
    reader: Arc<TableReader>,
    read: ReadOptions,
    index: Arc<IndexBlock>,
    block_idx: usize,
    block: Option<Arc<DataBlock>>,
    pos: usize,
}

impl TableIterator {
    /// Create an unpositioned iterator
    pub fn new(reader: Arc<TableReader>, read: ReadOptions) -> Result<Self> {
        let index = reader.index_block(&read)?;
        Ok(Self {
            reader,
            read,
            index,
            block_idx: 0,
            block: None,
            pos: 0,
        })
    }

    pub fn seek_to_first(&mut self) -> Result<()> {
        if self.index.is_empty() {
            self.block = None;
            return Ok(());
        }
        self.load_block(0)?;
        self.pos = 0;
        self.skip_exhausted_blocks()
    }

    /// Position at the first entry with key >= `key`
    pub fn seek(&mut self, key: &str) -> Result<()> {
        match self.index.find_block(key) {
            Some(idx) => {
                self.load_block(idx)?;
                self.pos = self.block.as_ref().map_or(0, |b| b.seek(key));
                self.skip_exhausted_blocks()
            }
            None => {
                self.block = None;
                Ok(())
            }
        }
    }

    pub fn valid(&self) -> bool {
        self.block.as_ref().is_some_and(|b| self.pos < b.len())
    }

    /// Current entry; `None` when not valid
    pub fn entry(&self) -> Option<&Entry> {
        self.block.as_ref().and_then(|b| b.entries().get(self.pos))
    }

    pub fn next(&mut self) -> Result<()> {
        if self.valid() {
            self.pos += 1;
            self.skip_exhausted_blocks()?;
        }
        Ok(())
    }

    fn load_block(&mut self, idx: usize) -> Result<()> {
        let handle = self.index.entries()[idx].handle;
        self.block = Some(self.reader.data_block(handle, &self.read)?);
        self.block_idx = idx;
        Ok(())
    }

    fn skip_exhausted_blocks(&mut self) -> Result<()> {
        while let Some(block) = &self.block {
            if self.pos < block.len() {
                break;
            }
            let next = self.block_idx + 1;
            if next >= self.index.len() {
                self.block = None;
                break;
            }
            self.load_block(next)?;
            self.pos = 0;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::DbOptions;
    use crate::sstable::{BuildOptions, TableBuilder, TableContext};
    use tempfile::TempDir;

    fn open_table(dir: &TempDir, count: usize) -> Arc<TableReader> {
        let path = dir.path().join("000009.sst");
        let options = BuildOptions {
            block_size: 128,
            ..Default::default()
        };
        let mut builder = TableBuilder::new(&path, 9, options).unwrap();
        for i in 0..count {
            builder
                .add(Entry::put(format!("k{:04}", i * 2), format!("v{}", i)))
                .unwrap();
        }
        builder.finish(1, 1).unwrap();
        let ctx = Arc::new(TableContext::from_options(&DbOptions::default()));
        Arc::new(TableReader::open(&path, 9, 0, ctx).unwrap())
    }

    #[test]
    fn test_full_scan_crosses_blocks() {
        let dir = TempDir::new().unwrap();
        let reader = open_table(&dir, 300);
        let mut iter = reader.iter(ReadOptions::default()).unwrap();
        iter.seek_to_first().unwrap();

        let mut seen = 0;
        let mut last = String::new();
        while iter.valid() {
            let key = iter.entry().unwrap().key.clone();
            assert!(key > last);
            last = key;
            seen += 1;
            iter.next().unwrap();
        }
        assert_eq!(seen, 300);
    }

    #[test]
    fn test_seek_between_keys() {
        let dir = TempDir::new().unwrap();
        let reader = open_table(&dir, 300);
        let mut iter = reader.iter(ReadOptions::default()).unwrap();

        iter.seek("k0101").unwrap();
        assert_eq!(iter.entry().unwrap().key, "k0102");

        iter.seek("k0598").unwrap();
        assert_eq!(iter.entry().unwrap().key, "k0598");
        iter.next().unwrap();
        assert!(!iter.valid());

        iter.seek("zzz").unwrap();
        assert!(!iter.valid());
    }
}
