//! Translate a [`BenchConfig`] into engine option groups
//!
//! Pure field copying and derivation; nothing here touches the engine.
//! Inconsistent combinations are left for [`lsmtune_engine::Db::open`] to
//! reject.

use crate::params::BenchConfig;
use lsmtune_engine::cache::{BlockCache, CacheOptions};
use lsmtune_engine::options::{DbOptions, FilterPolicy, ReadOptions, TableOptions, WriteOptions};
use std::sync::Arc;

/// Database-level options. Table options are left at the engine default;
/// see [`configure_table_options`].
pub fn configure_options(config: &BenchConfig) -> DbOptions {
    let mut options = DbOptions {
        level0_file_num_compaction_trigger: config.level0_file_num_compaction_trigger,
        disable_auto_compactions: config.disable_auto_compactions,
        create_if_missing: config.create_if_missing,
        max_background_jobs: config.max_background_jobs,
        max_write_buffer_number: config.max_write_buffer_number,
        write_buffer_size: config.buffer_size(),
        max_bytes_for_level_base: config.max_bytes_for_level_base(),
        num_levels: config.num_levels,
        compaction_style: config.compaction_style,
        compaction_pri: config.compaction_pri,
        fifo_max_table_files_size: config.fifo_max_table_files_size,
        // Files are sized like the memtable at the base level
        target_file_size_base: config.buffer_size(),
        max_bytes_for_level_multiplier: config.size_ratio,
        ..DbOptions::default()
    };

    if !config.use_default_compression {
        options.compression = config.compression;
    }

    options
}

/// Table format and block cache options
pub fn configure_table_options(config: &BenchConfig) -> TableOptions {
    let mut table = TableOptions {
        block_size: config.block_size(),
        no_block_cache: config.no_block_cache,
        cache_index_and_filter_blocks: config.cache_index_and_filter_blocks,
        cache_index_and_filter_blocks_with_high_priority: config
            .cache_index_and_filter_blocks_with_high_priority,
        metadata_pinning: config.metadata_pinning,
        ..TableOptions::default()
    };

    if config.bits_per_key > 0.0 {
        table.filter_policy = Some(FilterPolicy::bloom(config.bits_per_key));
    }

    // A capacity of 0 keeps the engine's default cache
    if config.capacity > 0 {
        table.block_cache = Some(Arc::new(BlockCache::new(CacheOptions {
            capacity: config.capacity,
            num_shard_bits: config.num_shard_bits,
            strict_capacity_limit: config.strict_capacity_limit,
            high_pri_pool_ratio: config.cache_high_priority_ratio,
        })));
    }

    table
}

pub fn configure_read_options(config: &BenchConfig) -> ReadOptions {
    ReadOptions {
        verify_checksums: config.verify_checksums,
        fill_cache: config.fill_cache,
    }
}

pub fn configure_write_options(config: &BenchConfig) -> WriteOptions {
    WriteOptions {
        sync: config.sync,
        disable_wal: config.disable_wal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{CompactionStyle, CompressionType};

    #[test]
    fn test_sizes_come_from_parameter_model() {
        let config = BenchConfig {
            entry_size: 64,
            entries_per_page: 16,
            buffer_size_in_pages: 128,
            size_ratio: 6.0,
            ..Default::default()
        };
        let options = configure_options(&config);
        assert_eq!(options.write_buffer_size, config.buffer_size());
        assert_eq!(options.target_file_size_base, config.buffer_size());
        assert_eq!(options.max_bytes_for_level_base, config.buffer_size() * 6);
        assert_eq!(options.max_bytes_for_level_multiplier, 6.0);

        let table = configure_table_options(&config);
        assert_eq!(table.block_size, 1024);
    }

    #[test]
    fn test_filter_only_with_positive_bits() {
        let config = BenchConfig {
            bits_per_key: 0.0,
            ..Default::default()
        };
        assert!(configure_table_options(&config).filter_policy.is_none());

        let config = BenchConfig {
            bits_per_key: 5.0,
            ..Default::default()
        };
        let policy = configure_table_options(&config).filter_policy.unwrap();
        assert_eq!(policy.bits_per_key, 5.0);
    }

    #[test]
    fn test_zero_capacity_keeps_default_cache() {
        let config = BenchConfig {
            capacity: 0,
            ..Default::default()
        };
        assert!(configure_table_options(&config).block_cache.is_none());

        let config = BenchConfig {
            capacity: 2 * 1024 * 1024,
            ..Default::default()
        };
        let cache = configure_table_options(&config).block_cache.unwrap();
        assert_eq!(cache.capacity(), 2 * 1024 * 1024);
    }

    #[test]
    fn test_compression_override_requires_flag() {
        let config = BenchConfig {
            compression: CompressionType::None,
            ..Default::default()
        };
        assert_eq!(
            configure_options(&config).compression,
            DbOptions::default().compression
        );

        let config = BenchConfig {
            use_default_compression: false,
            compression: CompressionType::None,
            ..Default::default()
        };
        assert_eq!(configure_options(&config).compression, CompressionType::None);
    }

    #[test]
    fn test_read_write_options_copied() {
        let config = BenchConfig {
            verify_checksums: false,
            fill_cache: false,
            sync: true,
            disable_wal: true,
            compaction_style: CompactionStyle::Fifo,
            ..Default::default()
        };
        let read = configure_read_options(&config);
        assert!(!read.verify_checksums);
        assert!(!read.fill_cache);

        let write = configure_write_options(&config);
        assert!(write.sync);
        assert!(write.disable_wal);

        assert_eq!(configure_options(&config).compaction_style, CompactionStyle::Fifo);
    }
}
