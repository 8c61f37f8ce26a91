//! Run reports: the setup table printed before a run, and the plain-text
//! and JSON reports written after it.

use crate::barrier::BarrierOutcome;
use crate::params::{BenchConfig, CompactionPri, CompactionStyle, PinningTier};
use crate::workload::WorkloadSummary;
use crate::Result;
use chrono::{DateTime, Utc};
use lsmtune_engine::statistics::StatisticsSnapshot;
use lsmtune_engine::LevelSummary;
use serde::Serialize;
use std::fmt::{self, Write as _};
use std::fs;
use std::path::{Path, PathBuf};

/// Tuning parameters of a run together with the sizes derived from them
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SetupSummary {
    pub compaction_style: CompactionStyle,
    pub compaction_pri: CompactionPri,
    pub size_ratio: f64,
    pub buffer_size_in_pages: u64,
    pub entries_per_page: u64,
    pub entry_size: u64,
    pub file_to_memtable_size_ratio: u32,
    pub block_size: u64,
    pub buffer_size: u64,
    pub max_bytes_for_level_base: u64,
    pub block_cache_capacity: u64,
    pub bits_per_key: f64,
    pub level0_file_num_compaction_trigger: usize,
    pub num_levels: usize,
    pub metadata_pinning: PinningTier,
}

impl SetupSummary {
    pub fn from_config(config: &BenchConfig) -> Self {
        Self {
            compaction_style: config.compaction_style,
            compaction_pri: config.compaction_pri,
            size_ratio: config.size_ratio,
            buffer_size_in_pages: config.buffer_size_in_pages,
            entries_per_page: config.entries_per_page,
            entry_size: config.entry_size,
            file_to_memtable_size_ratio: config.file_to_memtable_size_ratio,
            block_size: config.block_size(),
            buffer_size: config.buffer_size(),
            max_bytes_for_level_base: config.max_bytes_for_level_base(),
            block_cache_capacity: config.capacity,
            bits_per_key: config.bits_per_key,
            level0_file_num_compaction_trigger: config.level0_file_num_compaction_trigger,
            num_levels: config.num_levels,
            metadata_pinning: config.metadata_pinning,
        }
    }
}

/// One-row table of the run's tuning parameters, header included
pub fn render_setup_table(config: &BenchConfig) -> String {
    let setup = SetupSummary::from_config(config);
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:>10}{:>10}{:>4}{:>10}{:>10}{:>10}{:>10}{:>12}{:>12}{:>6}",
        "cmpt_sty", "cmpt_pri", "T", "P", "B", "E", "M", "L1_size", "blk_cch", "bpk"
    );
    let _ = writeln!(
        out,
        "{:>10}{:>10}{:>4}{:>10}{:>10}{:>10}{:>10}{:>12}{:>12}{:>6}",
        setup.compaction_style.to_string(),
        setup.compaction_pri.to_string(),
        setup.size_ratio,
        setup.buffer_size_in_pages,
        setup.entries_per_page,
        setup.entry_size,
        setup.buffer_size,
        setup.max_bytes_for_level_base,
        setup.block_cache_capacity,
        setup.bits_per_key
    );
    out
}

/// Wall-clock time spent in each phase, in milliseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RunTimings {
    pub replay_ms: f64,
    pub barrier_ms: f64,
    pub close_ms: f64,
}

/// Everything a finished run reports
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub workload_path: PathBuf,
    pub db_path: PathBuf,
    pub setup: SetupSummary,
    pub workload: WorkloadSummary,
    pub timings: RunTimings,
    pub barrier: BarrierOutcome,
    pub levels: Vec<LevelSummary>,
    /// Present when statistics collection was enabled
    pub statistics: Option<StatisticsSnapshot>,
}

impl RunReport {
    /// Write the plain-text report
    pub fn write_text(&self, path: impl AsRef<Path>) -> Result<()> {
        fs::write(path, self.to_string())?;
        Ok(())
    }

    /// Write the report as pretty-printed JSON
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = &self.setup;
        writeln!(f, "# Run started {}", self.started_at.to_rfc3339())?;
        writeln!(f, "workload: {}", self.workload_path.display())?;
        writeln!(f, "db: {}", self.db_path.display())?;
        writeln!(f)?;

        writeln!(f, "## Setup")?;
        writeln!(f, "compaction_style: {}", s.compaction_style)?;
        writeln!(f, "compaction_pri: {}", s.compaction_pri)?;
        writeln!(f, "size_ratio (T): {}", s.size_ratio)?;
        writeln!(f, "buffer_size_in_pages (P): {}", s.buffer_size_in_pages)?;
        writeln!(f, "entries_per_page (B): {}", s.entries_per_page)?;
        writeln!(f, "entry_size (E): {}", s.entry_size)?;
        writeln!(f, "file_to_memtable_size_ratio (f): {}", s.file_to_memtable_size_ratio)?;
        writeln!(f, "block_size: {}", s.block_size)?;
        writeln!(f, "buffer_size (M): {}", s.buffer_size)?;
        writeln!(f, "max_bytes_for_level_base: {}", s.max_bytes_for_level_base)?;
        writeln!(f, "block_cache_capacity: {}", s.block_cache_capacity)?;
        writeln!(f, "bits_per_key: {}", s.bits_per_key)?;
        writeln!(f, "level0_file_num_compaction_trigger: {}", s.level0_file_num_compaction_trigger)?;
        writeln!(f, "num_levels: {}", s.num_levels)?;
        writeln!(f)?;

        let w = &self.workload;
        writeln!(f, "## Workload")?;
        writeln!(f, "operations: {}", w.operations)?;
        writeln!(f, "inserts: {}", w.inserts)?;
        writeln!(f, "updates: {}", w.updates)?;
        writeln!(f, "deletes: {}", w.deletes)?;
        writeln!(
            f,
            "point_queries: {} (hits {}, misses {})",
            w.point_queries, w.point_hits, w.point_misses
        )?;
        writeln!(f, "range_scans: {} (keys visited {})", w.range_scans, w.scanned_keys)?;
        writeln!(f, "unknown_ops: {}", w.unknown_ops)?;
        writeln!(f, "live_files: {} ({} bytes)", w.live_files, w.live_bytes)?;
        writeln!(f)?;

        writeln!(f, "## Timings")?;
        writeln!(f, "replay_ms: {:.3}", self.timings.replay_ms)?;
        writeln!(
            f,
            "compaction_wait_ms: {:.3} (polls {}, completions {})",
            self.timings.barrier_ms, self.barrier.polls, self.barrier.events
        )?;
        writeln!(f, "close_ms: {:.3}", self.timings.close_ms)?;
        writeln!(f)?;

        writeln!(f, "## Levels")?;
        for level in self.levels.iter().filter(|l| l.files > 0) {
            writeln!(f, "L{}: {} files, {} bytes", level.level, level.files, level.bytes)?;
        }

        if let Some(stats) = &self.statistics {
            writeln!(f)?;
            writeln!(f, "## Statistics")?;
            write!(f, "{}", stats)?;
        }
        Ok(())
    }
}
