//! Benchmark configuration and the parameter model
//!
//! [`BenchConfig`] is the single record describing one run. A handful of
//! primitive sizing knobs (entry size, entries per page, pages per buffer,
//! size ratio) determine the engine's block size, memtable size and level-1
//! capacity through [`BenchConfig::block_size`], [`BenchConfig::buffer_size`]
//! and [`BenchConfig::max_bytes_for_level_base`]. Derived values are computed
//! on every call and never stored, so mutating a primitive is always visible.

use crate::{LsmError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub use lsmtune_engine::options::{CompactionPri, CompactionStyle, CompressionType, PinningTier};

const MIB: u64 = 1024 * 1024;

/// Configuration for one benchmark run, with a documented default for
/// every field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    // Harness options
    /// Trace to replay
    pub workload_path: PathBuf,
    /// Plain-text report destination
    pub output_path: PathBuf,
    /// Optional JSON report destination
    pub json_output_path: Option<PathBuf>,
    /// Database directory
    pub db_path: PathBuf,
    /// Emit a progress marker every N trace lines (0 disables)
    pub log_interval: u64,
    /// Destroy existing database files before opening
    pub destroy_database: bool,
    /// Ask the OS to drop its page cache before opening
    pub clear_system_cache: bool,
    /// Collect engine statistics
    pub enable_statistics: bool,

    // Sizing knobs
    /// Size of one key-value entry in bytes (E)
    pub entry_size: u64,
    /// Entries per page (B)
    pub entries_per_page: u64,
    /// Memtable size in pages (P)
    pub buffer_size_in_pages: u64,
    /// Explicit memtable size in bytes; overrides P*B*E when non-zero (M)
    pub buffer_size: u64,
    /// Size ratio between adjacent levels (T)
    pub size_ratio: f64,
    /// Ratio between file size and memtable size (f); reported only
    pub file_to_memtable_size_ratio: u32,
    /// Bloom filter bits per key, 0 disables the filter (b)
    pub bits_per_key: f64,

    // Database options
    pub level0_file_num_compaction_trigger: usize,
    pub disable_auto_compactions: bool,
    pub create_if_missing: bool,
    pub max_background_jobs: usize,
    pub max_write_buffer_number: usize,
    /// Keep the engine's built-in compression
    pub use_default_compression: bool,
    /// Compression used when `use_default_compression` is off
    pub compression: CompressionType,
    pub num_levels: usize,
    pub compaction_style: CompactionStyle,
    pub compaction_pri: CompactionPri,
    pub fifo_max_table_files_size: u64,

    // Table and cache options
    pub cache_index_and_filter_blocks: bool,
    pub cache_index_and_filter_blocks_with_high_priority: bool,
    pub no_block_cache: bool,
    /// Block cache capacity in bytes; 0 keeps the engine default cache
    pub capacity: u64,
    /// Cache shard bits; negative picks automatically
    pub num_shard_bits: i32,
    pub strict_capacity_limit: bool,
    pub cache_high_priority_ratio: f64,
    pub metadata_pinning: PinningTier,

    // Read options
    pub verify_checksums: bool,
    pub fill_cache: bool,

    // Write options
    pub sync: bool,
    pub disable_wal: bool,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            workload_path: PathBuf::from("workload.txt"),
            output_path: PathBuf::from("output.txt"),
            json_output_path: None,
            db_path: PathBuf::from("./db"),
            log_interval: 100_000,
            destroy_database: true,
            clear_system_cache: true,
            enable_statistics: true,

            entry_size: 1024,
            entries_per_page: 4,
            buffer_size_in_pages: 4096,
            buffer_size: 0,
            size_ratio: 10.0,
            file_to_memtable_size_ratio: 1,
            bits_per_key: 10.0,

            level0_file_num_compaction_trigger: 4,
            disable_auto_compactions: false,
            create_if_missing: true,
            max_background_jobs: 1,
            max_write_buffer_number: 2,
            use_default_compression: true,
            compression: CompressionType::None,
            num_levels: 10,
            compaction_style: CompactionStyle::Level,
            compaction_pri: CompactionPri::MinOverlappingRatio,
            fifo_max_table_files_size: 1024 * MIB,

            cache_index_and_filter_blocks: true,
            cache_index_and_filter_blocks_with_high_priority: true,
            no_block_cache: false,
            capacity: 32 * MIB,
            num_shard_bits: -1,
            strict_capacity_limit: true,
            cache_high_priority_ratio: 0.5,
            metadata_pinning: PinningTier::None,

            verify_checksums: true,
            fill_cache: true,

            sync: false,
            disable_wal: false,
        }
    }
}

impl BenchConfig {
    /// Bytes per data block: `entries_per_page * entry_size`
    pub fn block_size(&self) -> u64 {
        self.checked_block_size().unwrap_or(u64::MAX)
    }

    /// Memtable size in bytes. An explicit `buffer_size` wins over the
    /// page-based `buffer_size_in_pages * entries_per_page * entry_size`.
    pub fn buffer_size(&self) -> u64 {
        self.checked_buffer_size().unwrap_or(u64::MAX)
    }

    /// Level-1 capacity in bytes: `buffer_size * size_ratio`
    pub fn max_bytes_for_level_base(&self) -> u64 {
        (self.buffer_size() as f64 * self.size_ratio) as u64
    }

    fn checked_block_size(&self) -> Option<u64> {
        self.entries_per_page.checked_mul(self.entry_size)
    }

    fn checked_buffer_size(&self) -> Option<u64> {
        if self.buffer_size != 0 {
            Some(self.buffer_size)
        } else {
            self.buffer_size_in_pages.checked_mul(self.checked_block_size()?)
        }
    }

    /// Check the invariants the derived values rely on
    pub fn validate(&self) -> Result<()> {
        let block_size = self.checked_block_size().ok_or_else(|| {
            LsmError::Config(format!(
                "block size overflows: {} entries per page * {} bytes",
                self.entries_per_page, self.entry_size
            ))
        })?;
        if block_size == 0 {
            return Err(LsmError::Config(
                "block size must be positive (entries_per_page * entry_size)".into(),
            ));
        }
        let buffer_size = self.checked_buffer_size().ok_or_else(|| {
            LsmError::Config(format!(
                "buffer size overflows: {} pages * {} bytes per page",
                self.buffer_size_in_pages, block_size
            ))
        })?;
        if buffer_size == 0 {
            return Err(LsmError::Config("buffer size must be positive".into()));
        }
        if !(self.size_ratio > 0.0) {
            return Err(LsmError::Config(format!(
                "size ratio must be positive, got {}",
                self.size_ratio
            )));
        }
        let level_base = buffer_size as f64 * self.size_ratio;
        if !level_base.is_finite() || level_base >= u64::MAX as f64 {
            return Err(LsmError::Config(format!(
                "level 1 size overflows: {} bytes * size ratio {}",
                buffer_size, self.size_ratio
            )));
        }
        if self.bits_per_key < 0.0 {
            return Err(LsmError::Config(format!(
                "bits per key must not be negative, got {}",
                self.bits_per_key
            )));
        }
        if !(0.0..=1.0).contains(&self.cache_high_priority_ratio) {
            return Err(LsmError::Config(format!(
                "cache high priority ratio must be within [0, 1], got {}",
                self.cache_high_priority_ratio
            )));
        }
        Ok(())
    }

    /// Load a configuration from JSON. Missing fields keep their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|e| {
            LsmError::Config(format!("invalid config file {}: {}", path.display(), e))
        })
    }
}
