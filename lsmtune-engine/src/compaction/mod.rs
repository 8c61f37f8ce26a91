//! Background compaction for the LSM tree
//!
//! [`CompactionPicker`] decides what to compact for each compaction style,
//! and [`CompactionJob`] merges the chosen inputs into new tables. Both run
//! on the engine's background workers.

mod job;
mod picker;

pub use job::{CompactionJob, JobOutput};
pub use picker::CompactionPicker;

use crate::storage::TableHandle;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Why a compaction was scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompactionReason {
    /// Level 0 reached its file count trigger
    LevelL0FilesNum,
    /// A level exceeded its size target
    LevelMaxLevelSize,
    /// Enough sorted runs accumulated (universal)
    UniversalSortedRunNum,
    /// Total size exceeded the FIFO cap
    FifoMaxSize,
}

impl fmt::Display for CompactionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::LevelL0FilesNum => "level_l0_files_num",
            Self::LevelMaxLevelSize => "level_max_level_size",
            Self::UniversalSortedRunNum => "universal_sorted_run_num",
            Self::FifoMaxSize => "fifo_max_size",
        };
        f.write_str(name)
    }
}

/// A unit of compaction work chosen by the picker
pub struct CompactionTask {
    pub reason: CompactionReason,
    /// Level the compaction was triggered on
    pub input_level: usize,
    /// Level receiving the output
    pub output_level: usize,
    /// Inputs ordered newest first; each inner list is one source
    pub inputs: Vec<Vec<Arc<TableHandle>>>,
    /// Tombstones may be dropped because nothing older lies below
    pub bottommost: bool,
    /// Delete the inputs without writing anything (FIFO)
    pub deletion_only: bool,
    /// Split outputs once they reach this size; `None` writes one file
    pub max_output_file_size: Option<u64>,
}

impl CompactionTask {
    /// Every input file
    pub fn input_files(&self) -> impl Iterator<Item = &Arc<TableHandle>> {
        self.inputs.iter().flatten()
    }

    pub fn num_input_files(&self) -> usize {
        self.inputs.iter().map(Vec::len).sum()
    }

    pub fn input_bytes(&self) -> u64 {
        self.input_files().map(|f| f.meta.file_size).sum()
    }
}

impl fmt::Debug for CompactionTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompactionTask")
            .field("reason", &self.reason)
            .field("input_level", &self.input_level)
            .field("output_level", &self.output_level)
            .field(
                "inputs",
                &self
                    .input_files()
                    .map(|h| h.number())
                    .collect::<Vec<_>>(),
            )
            .field("bottommost", &self.bottommost)
            .field("deletion_only", &self.deletion_only)
            .finish()
    }
}

/// Passed to listeners after every finished compaction job
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompactionJobInfo {
    pub job_id: u64,
    pub reason: CompactionReason,
    pub input_level: usize,
    pub output_level: usize,
    pub num_input_files: usize,
    pub num_output_files: usize,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub num_dropped_keys: u64,
    pub elapsed: Duration,
}

/// The three background-work indicators, sampled together
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CompactionCounters {
    /// Compaction jobs currently executing
    pub running: u64,
    /// Estimated bytes still to be rewritten by compaction
    pub pending_bytes: u64,
    /// Whether the picker would schedule another compaction now
    pub pending: bool,
}

impl CompactionCounters {
    /// No background compaction work of any kind remains
    pub fn is_quiescent(&self) -> bool {
        self.running == 0 && self.pending_bytes == 0 && !self.pending
    }
}

impl fmt::Display for CompactionCounters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "running={} pending_bytes={} pending={}",
            self.running, self.pending_bytes, self.pending as u8
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_quiescence() {
        assert!(CompactionCounters::default().is_quiescent());
        for counters in [
            CompactionCounters {
                running: 1,
                ..Default::default()
            },
            CompactionCounters {
                pending_bytes: 10,
                ..Default::default()
            },
            CompactionCounters {
                pending: true,
                ..Default::default()
            },
        ] {
            assert!(!counters.is_quiescent(), "{}", counters);
        }
    }
}
