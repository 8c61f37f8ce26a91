//! Engine option groups
//!
//! These are the knobs the embedded engine understands. Each `Default`
//! is the engine's own built-in behaviour; callers override the fields
//! they care about.

use crate::cache::BlockCache;
use crate::statistics::Statistics;
use crate::storage::EventListener;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

const MIB: u64 = 1024 * 1024;

/// How the engine organises files across levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompactionStyle {
    /// Leveled compaction with per-level size targets
    Level,
    /// Size-tiered merging of sorted runs
    Universal,
    /// Drop the oldest files once a size cap is reached
    Fifo,
    /// No automatic compaction
    None,
}

impl CompactionStyle {
    /// Map the 1-based command-line choice to a style
    pub fn from_choice(choice: u8) -> Option<Self> {
        match choice {
            1 => Some(Self::Level),
            2 => Some(Self::Universal),
            3 => Some(Self::Fifo),
            4 => Some(Self::None),
            _ => None,
        }
    }
}

impl fmt::Display for CompactionStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Level => "level",
            Self::Universal => "universal",
            Self::Fifo => "fifo",
            Self::None => "none",
        };
        f.write_str(name)
    }
}

/// Which file a leveled compaction picks first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompactionPri {
    /// Smallest ratio of overlapping bytes in the next level to file size
    MinOverlappingRatio,
    /// Largest file, with tombstones weighted up
    ByCompensatedSize,
    /// File whose newest data is the oldest
    OldestLargestSeqFirst,
    /// File whose oldest data is the oldest
    OldestSmallestSeqFirst,
    /// Cycle through the key space of each level
    RoundRobin,
}

impl CompactionPri {
    /// Map the 1-based command-line choice to a priority
    pub fn from_choice(choice: u8) -> Option<Self> {
        match choice {
            1 => Some(Self::MinOverlappingRatio),
            2 => Some(Self::ByCompensatedSize),
            3 => Some(Self::OldestLargestSeqFirst),
            4 => Some(Self::OldestSmallestSeqFirst),
            5 => Some(Self::RoundRobin),
            _ => None,
        }
    }
}

impl fmt::Display for CompactionPri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::MinOverlappingRatio => "min_ovlp",
            Self::ByCompensatedSize => "by_size",
            Self::OldestLargestSeqFirst => "old_lrg",
            Self::OldestSmallestSeqFirst => "old_sml",
            Self::RoundRobin => "rr",
        };
        f.write_str(name)
    }
}

/// Which tables keep their index and filter blocks resident
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PinningTier {
    /// Nothing pinned; metadata competes in the block cache
    None,
    /// Pin metadata of freshly flushed (L0) tables
    FlushedAndSimilar,
    /// Pin metadata of every table
    All,
}

impl PinningTier {
    /// Map the 1-based command-line choice to a tier
    pub fn from_choice(choice: u8) -> Option<Self> {
        match choice {
            1 => Some(Self::None),
            2 => Some(Self::FlushedAndSimilar),
            3 => Some(Self::All),
            _ => None,
        }
    }
}

/// Block compression codec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionType {
    None,
    Lz4,
}


/// Bloom filter policy attached to every table
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterPolicy {
    pub bits_per_key: f64,
}

impl FilterPolicy {
    pub fn bloom(bits_per_key: f64) -> Self {
        Self { bits_per_key }
    }
}

/// Table format and block cache options
#[derive(Clone)]
pub struct TableOptions {
    /// Target uncompressed size of a data block
    pub block_size: u64,
    /// Filter built for each table; `None` builds no filter
    pub filter_policy: Option<FilterPolicy>,
    /// Dedicated cache; `None` uses the engine's default cache
    pub block_cache: Option<Arc<BlockCache>>,
    /// Do not cache data blocks at all
    pub no_block_cache: bool,
    /// Route index and filter blocks through the block cache
    pub cache_index_and_filter_blocks: bool,
    /// Insert index and filter blocks into the high-priority pool
    pub cache_index_and_filter_blocks_with_high_priority: bool,
    /// Which tables keep index and filter blocks resident
    pub metadata_pinning: PinningTier,
}

impl Default for TableOptions {
    fn default() -> Self {
        Self {
            block_size: 4 * 1024,
            filter_policy: None,
            block_cache: None,
            no_block_cache: false,
            cache_index_and_filter_blocks: false,
            cache_index_and_filter_blocks_with_high_priority: true,
            metadata_pinning: PinningTier::None,
        }
    }
}

impl fmt::Debug for TableOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableOptions")
            .field("block_size", &self.block_size)
            .field("filter_policy", &self.filter_policy)
            .field(
                "block_cache",
                &self.block_cache.as_ref().map(|c| c.capacity()),
            )
            .field("no_block_cache", &self.no_block_cache)
            .field(
                "cache_index_and_filter_blocks",
                &self.cache_index_and_filter_blocks,
            )
            .field(
                "cache_index_and_filter_blocks_with_high_priority",
                &self.cache_index_and_filter_blocks_with_high_priority,
            )
            .field("metadata_pinning", &self.metadata_pinning)
            .finish()
    }
}

/// Database-wide options
#[derive(Clone)]
pub struct DbOptions {
    pub create_if_missing: bool,
    /// Number of L0 files (or sorted runs) that triggers compaction
    pub level0_file_num_compaction_trigger: usize,
    pub disable_auto_compactions: bool,
    /// Background worker threads shared by flushes and compactions
    pub max_background_jobs: usize,
    /// Mutable plus immutable memtables allowed before writers stall
    pub max_write_buffer_number: usize,
    pub compression: CompressionType,
    /// Memtable size that triggers a flush
    pub write_buffer_size: u64,
    /// Target size of level 1
    pub max_bytes_for_level_base: u64,
    /// Growth factor between adjacent level targets
    pub max_bytes_for_level_multiplier: f64,
    /// Output file size for compactions
    pub target_file_size_base: u64,
    pub num_levels: usize,
    pub compaction_style: CompactionStyle,
    pub compaction_pri: CompactionPri,
    /// Total size cap for FIFO compaction
    pub fifo_max_table_files_size: u64,
    pub table: TableOptions,
    /// Statistics sink; `None` disables collection
    pub statistics: Option<Arc<Statistics>>,
    /// Invoked after every finished compaction job
    pub listeners: Vec<Arc<dyn EventListener>>,
}

impl Default for DbOptions {
    fn default() -> Self {
        Self {
            create_if_missing: false,
            level0_file_num_compaction_trigger: 4,
            disable_auto_compactions: false,
            max_background_jobs: 2,
            max_write_buffer_number: 2,
            compression: CompressionType::Lz4,
            write_buffer_size: 64 * MIB,
            max_bytes_for_level_base: 256 * MIB,
            max_bytes_for_level_multiplier: 10.0,
            target_file_size_base: 64 * MIB,
            num_levels: 7,
            compaction_style: CompactionStyle::Level,
            compaction_pri: CompactionPri::MinOverlappingRatio,
            fifo_max_table_files_size: 1024 * MIB,
            table: TableOptions::default(),
            statistics: None,
            listeners: Vec::new(),
        }
    }
}

impl DbOptions {
    /// Register a compaction listener
    pub fn add_listener(&mut self, listener: Arc<dyn EventListener>) {
        self.listeners.push(listener);
    }
}

impl fmt::Debug for DbOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbOptions")
            .field("create_if_missing", &self.create_if_missing)
            .field(
                "level0_file_num_compaction_trigger",
                &self.level0_file_num_compaction_trigger,
            )
            .field("disable_auto_compactions", &self.disable_auto_compactions)
            .field("max_background_jobs", &self.max_background_jobs)
            .field("max_write_buffer_number", &self.max_write_buffer_number)
            .field("compression", &self.compression)
            .field("write_buffer_size", &self.write_buffer_size)
            .field("max_bytes_for_level_base", &self.max_bytes_for_level_base)
            .field(
                "max_bytes_for_level_multiplier",
                &self.max_bytes_for_level_multiplier,
            )
            .field("target_file_size_base", &self.target_file_size_base)
            .field("num_levels", &self.num_levels)
            .field("compaction_style", &self.compaction_style)
            .field("compaction_pri", &self.compaction_pri)
            .field("fifo_max_table_files_size", &self.fifo_max_table_files_size)
            .field("table", &self.table)
            .field("statistics", &self.statistics.is_some())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

/// Per-read options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOptions {
    /// Verify block checksums on every read
    pub verify_checksums: bool,
    /// Insert blocks read by this call into the cache
    pub fill_cache: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            verify_checksums: true,
            fill_cache: true,
        }
    }
}

/// Per-write options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WriteOptions {
    /// fsync the WAL before acknowledging
    pub sync: bool,
    /// Skip the WAL entirely
    pub disable_wal: bool,
}
