//! SSTable reader for point lookups and block access

use super::block::decode_frame;
use super::{BlockHandle, BloomFilter, DataBlock, Footer, IndexBlock, TableIterator, TableProperties};
use crate::cache::{BlockCache, BlockKind, CacheKey, CacheOptions, CachedBlock, Priority};
use crate::options::{DbOptions, PinningTier, ReadOptions, TableOptions};
use crate::statistics::{HistogramType, Statistics, StatsExt, Ticker};
use crate::types::FileNumber;
use crate::{EngineError, Result, ValueEntry};
use parking_lot::Mutex;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

/// Engine cache used when no dedicated cache is configured
pub const DEFAULT_CACHE_CAPACITY: u64 = 8 * 1024 * 1024;

/// State shared by every open table of one database
pub struct TableContext {
    pub cache: Arc<BlockCache>,
    pub table: TableOptions,
    pub statistics: Option<Arc<Statistics>>,
}

impl TableContext {
    pub fn from_options(options: &DbOptions) -> Self {
        let cache = options.table.block_cache.clone().unwrap_or_else(|| {
            Arc::new(BlockCache::new(CacheOptions::with_capacity(
                DEFAULT_CACHE_CAPACITY,
            )))
        });
        Self {
            cache,
            table: options.table.clone(),
            statistics: options.statistics.clone(),
        }
    }

    /// Whether a table at `level` keeps its metadata resident
    fn pins_metadata(&self, level: usize) -> bool {
        match self.table.metadata_pinning {
            PinningTier::None => false,
            PinningTier::FlushedAndSimilar => level == 0,
            PinningTier::All => true,
        }
    }

    fn metadata_priority(&self) -> Priority {
        if self.table.cache_index_and_filter_blocks_with_high_priority {
            Priority::High
        } else {
            Priority::Low
        }
    }
}

/// An open table file
pub struct TableReader {
    number: FileNumber,
    path: PathBuf,
    file: Mutex<File>,
    file_size: u64,
    footer: Footer,
    props: TableProperties,
    pinned_index: Option<Arc<IndexBlock>>,
    pinned_filter: Option<Arc<BloomFilter>>,
    ctx: Arc<TableContext>,
}

impl TableReader {
    /// Open a table file that lives at `level`
    pub fn open(
        path: impl AsRef<Path>,
        number: FileNumber,
        level: usize,
        ctx: Arc<TableContext>,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path)?;
        let file_size = file.metadata()?.len();
        if file_size < Footer::SIZE as u64 {
            return Err(EngineError::Corruption(format!(
                "Table {} is too short: {} bytes",
                path.display(),
                file_size
            )));
        }

        // Read footer
        file.seek(SeekFrom::End(-(Footer::SIZE as i64)))?;
        let mut footer_bytes = [0u8; Footer::SIZE];
        file.read_exact(&mut footer_bytes)?;
        let footer = Footer::decode(&footer_bytes)?;

        // Read properties
        let props_frame = read_at(&mut file, footer.properties)?;
        let props: TableProperties = bincode::deserialize(&decode_frame(&props_frame, true)?)?;

        let mut reader = Self {
            number,
            path,
            file: Mutex::new(file),
            file_size,
            footer,
            props,
            pinned_index: None,
            pinned_filter: None,
            ctx,
        };

        let resident = !reader.ctx.table.cache_index_and_filter_blocks
            || reader.ctx.pins_metadata(level);
        let verify = ReadOptions::default();
        if resident {
            let index = Arc::new(reader.load_index(&verify)?);
            let filter = reader.load_filter(&verify)?.map(Arc::new);
            if reader.ctx.table.cache_index_and_filter_blocks {
                // Pinned metadata is still charged to the cache
                reader.insert_metadata(&index, filter.as_ref());
            }
            reader.pinned_index = Some(index);
            reader.pinned_filter = filter;
        } else {
            // Prefetch so the first lookup finds metadata in the cache
            reader.index_block(&verify)?;
            reader.filter_block(&verify)?;
        }

        Ok(reader)
    }

    pub fn number(&self) -> FileNumber {
        self.number
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn properties(&self) -> &TableProperties {
        &self.props
    }

    pub fn has_filter(&self) -> bool {
        !self.footer.filter.is_empty()
    }

    /// Point lookup. Returns the stored value or tombstone.
    pub fn get(&self, key: &str, read: &ReadOptions) -> Result<Option<ValueEntry>> {
        if let Some(filter) = self.filter_block(read)? {
            if !filter.may_contain(key) {
                self.ctx.statistics.tick(Ticker::BloomFilterUseful, 1);
                return Ok(None);
            }
            self.ctx.statistics.tick(Ticker::BloomFilterFullPositive, 1);
        }

        let index = self.index_block(read)?;
        let Some(i) = index.find_block(key) else {
            return Ok(None);
        };
        let block = self.data_block(index.entries()[i].handle, read)?;
        Ok(block.get(key).map(|e| e.value.clone()))
    }

    /// Iterator over the whole table
    pub fn iter(self: &Arc<Self>, read: ReadOptions) -> Result<TableIterator> {
        TableIterator::new(Arc::clone(self), read)
    }

    /// Index block, from the reader, the cache or the file
    pub fn index_block(&self, read: &ReadOptions) -> Result<Arc<IndexBlock>> {
        if let Some(index) = &self.pinned_index {
            return Ok(Arc::clone(index));
        }

        let key = CacheKey::new(self.number, self.footer.index.offset, BlockKind::Index);
        if let Some(CachedBlock::Index(index)) = self.lookup(&key) {
            return Ok(index);
        }

        let index = Arc::new(self.load_index(read)?);
        self.insert(
            key,
            CachedBlock::Index(Arc::clone(&index)),
            index.charge(),
            self.ctx.metadata_priority(),
        );
        Ok(index)
    }

    /// Filter block, if the table has one
    pub fn filter_block(&self, read: &ReadOptions) -> Result<Option<Arc<BloomFilter>>> {
        if !self.has_filter() {
            return Ok(None);
        }
        if let Some(filter) = &self.pinned_filter {
            return Ok(Some(Arc::clone(filter)));
        }
        let key = CacheKey::new(self.number, self.footer.filter.offset, BlockKind::Filter);
        if let Some(CachedBlock::Filter(filter)) = self.lookup(&key) {
            return Ok(Some(filter));
        }

        let Some(filter) = self.load_filter(read)? else {
            return Ok(None);
        };
        let filter = Arc::new(filter);
        self.insert(
            key,
            CachedBlock::Filter(Arc::clone(&filter)),
            filter.charge(),
            self.ctx.metadata_priority(),
        );
        Ok(Some(filter))
    }

    /// Data block at `handle`, through the block cache unless disabled
    pub fn data_block(&self, handle: BlockHandle, read: &ReadOptions) -> Result<Arc<DataBlock>> {
        let use_cache = !self.ctx.table.no_block_cache;
        let key = CacheKey::new(self.number, handle.offset, BlockKind::Data);

        if use_cache {
            if let Some(CachedBlock::Data(block)) = self.lookup(&key) {
                return Ok(block);
            }
        }

        let frame = self.read_block(handle)?;
        let block = Arc::new(DataBlock::decode(&decode_frame(&frame, read.verify_checksums)?)?);

        if use_cache && read.fill_cache {
            self.insert(key, CachedBlock::Data(Arc::clone(&block)), block.charge(), Priority::Low);
        }
        Ok(block)
    }

    /// Drop this table's metadata from the shared cache
    pub fn evict_metadata(&self) {
        let cache = &self.ctx.cache;
        cache.erase(&CacheKey::new(self.number, self.footer.index.offset, BlockKind::Index));
        if self.has_filter() {
            cache.erase(&CacheKey::new(self.number, self.footer.filter.offset, BlockKind::Filter));
        }
    }

    fn load_index(&self, read: &ReadOptions) -> Result<IndexBlock> {
        let frame = self.read_block(self.footer.index)?;
        IndexBlock::decode(&decode_frame(&frame, read.verify_checksums)?)
    }

    fn load_filter(&self, read: &ReadOptions) -> Result<Option<BloomFilter>> {
        if !self.has_filter() {
            return Ok(None);
        }
        let frame = self.read_block(self.footer.filter)?;
        BloomFilter::decode(&decode_frame(&frame, read.verify_checksums)?).map(Some)
    }

    fn insert_metadata(&self, index: &Arc<IndexBlock>, filter: Option<&Arc<BloomFilter>>) {
        let priority = self.ctx.metadata_priority();
        self.insert(
            CacheKey::new(self.number, self.footer.index.offset, BlockKind::Index),
            CachedBlock::Index(Arc::clone(index)),
            index.charge(),
            priority,
        );
        if let Some(filter) = filter {
            self.insert(
                CacheKey::new(self.number, self.footer.filter.offset, BlockKind::Filter),
                CachedBlock::Filter(Arc::clone(filter)),
                filter.charge(),
                priority,
            );
        }
    }

    fn read_block(&self, handle: BlockHandle) -> Result<Vec<u8>> {
        let start = Instant::now();
        let data = {
            let mut file = self.file.lock();
            read_at(&mut file, handle)?
        };
        let stats = &self.ctx.statistics;
        stats.observe(HistogramType::SstReadMicros, start.elapsed().as_micros() as u64);
        stats.observe(HistogramType::BytesPerRead, handle.size);
        Ok(data)
    }

    fn lookup(&self, key: &CacheKey) -> Option<CachedBlock> {
        let stats = &self.ctx.statistics;
        let (hit, miss) = match key.kind {
            BlockKind::Data => (Ticker::BlockCacheDataHit, Ticker::BlockCacheDataMiss),
            BlockKind::Index => (Ticker::BlockCacheIndexHit, Ticker::BlockCacheIndexMiss),
            BlockKind::Filter => (Ticker::BlockCacheFilterHit, Ticker::BlockCacheFilterMiss),
        };

        match self.ctx.cache.lookup(key) {
            Some(block) => {
                stats.tick(Ticker::BlockCacheHit, 1);
                stats.tick(hit, 1);
                stats.tick(Ticker::BlockCacheBytesRead, cached_charge(&block));
                Some(block)
            }
            None => {
                stats.tick(Ticker::BlockCacheMiss, 1);
                stats.tick(miss, 1);
                None
            }
        }
    }

    fn insert(&self, key: CacheKey, block: CachedBlock, charge: u64, priority: Priority) {
        let stats = &self.ctx.statistics;
        if self.ctx.cache.insert(key, block, charge, priority) {
            stats.tick(Ticker::BlockCacheAdd, 1);
            stats.tick(Ticker::BlockCacheBytesWrite, charge);
        } else {
            stats.tick(Ticker::BlockCacheAddFailures, 1);
        }
    }
}

fn cached_charge(block: &CachedBlock) -> u64 {
    match block {
        CachedBlock::Data(b) => b.charge(),
        CachedBlock::Index(b) => b.charge(),
        CachedBlock::Filter(b) => b.charge(),
    }
}

fn read_at(file: &mut File, handle: BlockHandle) -> Result<Vec<u8>> {
    file.seek(SeekFrom::Start(handle.offset))?;
    let mut data = vec![0u8; handle.size as usize];
    file.read_exact(&mut data)?;
    Ok(data)
}
