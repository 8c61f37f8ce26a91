//! Compaction selection for each compaction style

use super::{CompactionReason, CompactionTask};
use crate::options::{CompactionPri, CompactionStyle, DbOptions};
use crate::storage::{TableHandle, Version};
use crate::types::FileNumber;
use std::collections::HashSet;
use std::sync::Arc;

/// Decides what to compact next.
///
/// [`CompactionPicker::pick`] skips work whose files are already being
/// compacted; [`CompactionPicker::needs_compaction`] and
/// [`CompactionPicker::pending_bytes`] look at the shape of the tree only,
/// so they stay non-zero while eligible work is queued behind running jobs.
pub struct CompactionPicker {
    style: CompactionStyle,
    pri: CompactionPri,
    disabled: bool,
    l0_trigger: usize,
    num_levels: usize,
    level_base: u64,
    multiplier: f64,
    target_file_size: u64,
    fifo_max_size: u64,
    /// Largest key of the last file picked per level (round-robin)
    cursors: Vec<Option<String>>,
}

impl CompactionPicker {
    pub fn new(options: &DbOptions) -> Self {
        Self {
            style: options.compaction_style,
            pri: options.compaction_pri,
            disabled: options.disable_auto_compactions,
            l0_trigger: options.level0_file_num_compaction_trigger.max(1),
            num_levels: options.num_levels.max(1),
            level_base: options.max_bytes_for_level_base,
            multiplier: options.max_bytes_for_level_multiplier,
            target_file_size: options.target_file_size_base,
            fifo_max_size: options.fifo_max_table_files_size,
            cursors: vec![None; options.num_levels.max(1)],
        }
    }

    fn automatic(&self) -> bool {
        !self.disabled && self.style != CompactionStyle::None
    }

    /// Size target of a sorted level
    pub fn level_target(&self, level: usize) -> u64 {
        if level <= 1 {
            return self.level_base;
        }
        (self.level_base as f64 * self.multiplier.powi(level as i32 - 1)) as u64
    }

    /// Merging a single run back into L0 would never shrink it
    fn universal_trigger(&self) -> usize {
        self.l0_trigger.max(2)
    }

    fn last_level(&self) -> usize {
        self.num_levels - 1
    }

    /// Whether an automatic compaction is due
    pub fn needs_compaction(&self, version: &Version) -> bool {
        if !self.automatic() {
            return false;
        }
        match self.style {
            CompactionStyle::Level => {
                version.files(0).len() >= self.l0_trigger
                    || (1..self.last_level())
                        .any(|l| version.level_bytes(l) > self.level_target(l))
            }
            CompactionStyle::Universal => version.files(0).len() >= self.universal_trigger(),
            CompactionStyle::Fifo => version.total_bytes() > self.fifo_max_size,
            CompactionStyle::None => false,
        }
    }

    /// Estimated bytes automatic compaction still has to rewrite
    pub fn pending_bytes(&self, version: &Version) -> u64 {
        if !self.automatic() {
            return 0;
        }
        match self.style {
            CompactionStyle::Level => {
                let mut pending = 0u64;
                if version.files(0).len() >= self.l0_trigger {
                    pending += version.level_bytes(0) + version.level_bytes(1);
                }
                for level in 1..self.last_level() {
                    let bytes = version.level_bytes(level);
                    let target = self.level_target(level);
                    if bytes > target {
                        let excess = bytes - target;
                        pending += excess + (excess as f64 * self.multiplier) as u64;
                    }
                }
                pending
            }
            CompactionStyle::Universal => {
                if version.files(0).len() < self.universal_trigger() {
                    return 0;
                }
                let l0 = version.level_bytes(0);
                let bottom = version.level_bytes(self.last_level());
                if self.bottom_joins(l0, bottom) {
                    l0 + bottom
                } else {
                    l0
                }
            }
            CompactionStyle::Fifo => version.total_bytes().saturating_sub(self.fifo_max_size),
            CompactionStyle::None => 0,
        }
    }

    /// Choose the next compaction, skipping files in `busy`
    pub fn pick(&mut self, version: &Version, busy: &HashSet<FileNumber>) -> Option<CompactionTask> {
        if !self.automatic() {
            return None;
        }
        match self.style {
            CompactionStyle::Level => self.pick_level(version, busy),
            CompactionStyle::Universal => self.pick_universal(version, busy),
            CompactionStyle::Fifo => self.pick_fifo(version, busy),
            CompactionStyle::None => None,
        }
    }

    fn pick_level(&mut self, version: &Version, busy: &HashSet<FileNumber>) -> Option<CompactionTask> {
        if self.num_levels < 2 {
            return None;
        }

        // Score every level; L0 by file count, the rest by size
        let mut scored: Vec<(f64, usize)> = Vec::new();
        let l0_files = version.files(0).len();
        if l0_files >= self.l0_trigger {
            scored.push((l0_files as f64 / self.l0_trigger as f64, 0));
        }
        for level in 1..self.last_level() {
            let bytes = version.level_bytes(level);
            let target = self.level_target(level).max(1);
            if bytes > target {
                scored.push((bytes as f64 / target as f64, level));
            }
        }
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));

        for (_, level) in scored {
            let task = if level == 0 {
                self.pick_l0(version, busy)
            } else {
                self.pick_from_level(version, level, busy)
            };
            if task.is_some() {
                return task;
            }
        }
        None
    }

    fn pick_l0(&self, version: &Version, busy: &HashSet<FileNumber>) -> Option<CompactionTask> {
        let l0 = version.files(0);
        if l0.iter().any(|f| busy.contains(&f.number())) {
            return None;
        }
        let (smallest, largest) = key_range(l0.iter())?;
        let l1 = version.overlapping(1, &smallest, &largest);
        if l1.iter().any(|f| busy.contains(&f.number())) {
            return None;
        }

        let (smallest, largest) = key_range(l0.iter().chain(l1.iter()))?;
        let mut inputs: Vec<Vec<Arc<TableHandle>>> = l0.iter().map(|f| vec![Arc::clone(f)]).collect();
        if !l1.is_empty() {
            inputs.push(l1);
        }

        Some(CompactionTask {
            reason: CompactionReason::LevelL0FilesNum,
            input_level: 0,
            output_level: 1,
            inputs,
            bottommost: self.is_bottommost(version, 1, &smallest, &largest),
            deletion_only: false,
            max_output_file_size: Some(self.target_file_size),
        })
    }

    fn pick_from_level(
        &mut self,
        version: &Version,
        level: usize,
        busy: &HashSet<FileNumber>,
    ) -> Option<CompactionTask> {
        let candidates: Vec<(Arc<TableHandle>, Vec<Arc<TableHandle>>)> = version
            .files(level)
            .iter()
            .filter(|f| !busy.contains(&f.number()))
            .map(|f| {
                let overlap =
                    version.overlapping(level + 1, &f.meta.smallest_key, &f.meta.largest_key);
                (Arc::clone(f), overlap)
            })
            .filter(|(_, overlap)| overlap.iter().all(|o| !busy.contains(&o.number())))
            .collect();
        if candidates.is_empty() {
            return None;
        }

        let chosen = match self.pri {
            CompactionPri::MinOverlappingRatio => candidates.into_iter().min_by_key(|(f, overlap)| {
                let overlap_bytes: u64 = overlap.iter().map(|o| o.meta.file_size).sum();
                overlap_bytes.saturating_mul(1024) / f.meta.compensated_size().max(1)
            }),
            CompactionPri::ByCompensatedSize => candidates
                .into_iter()
                .max_by_key(|(f, _)| f.meta.compensated_size()),
            CompactionPri::OldestLargestSeqFirst => {
                candidates.into_iter().min_by_key(|(f, _)| f.meta.max_epoch)
            }
            CompactionPri::OldestSmallestSeqFirst => {
                candidates.into_iter().min_by_key(|(f, _)| f.meta.min_epoch)
            }
            CompactionPri::RoundRobin => {
                let cursor = self.cursors[level].clone();
                let position = cursor.as_ref().and_then(|c| {
                    candidates
                        .iter()
                        .position(|(f, _)| f.meta.smallest_key.as_str() > c.as_str())
                });
                let idx = position.unwrap_or(0);
                candidates.into_iter().nth(idx)
            }
        };
        let (file, overlap) = chosen?;
        if self.pri == CompactionPri::RoundRobin {
            self.cursors[level] = Some(file.meta.largest_key.clone());
        }

        let (smallest, largest) = key_range(std::iter::once(&file).chain(overlap.iter()))?;
        let output_level = level + 1;
        let mut inputs = vec![vec![file]];
        if !overlap.is_empty() {
            inputs.push(overlap);
        }

        Some(CompactionTask {
            reason: CompactionReason::LevelMaxLevelSize,
            input_level: level,
            output_level,
            inputs,
            bottommost: self.is_bottommost(version, output_level, &smallest, &largest),
            deletion_only: false,
            max_output_file_size: Some(self.target_file_size),
        })
    }

    fn bottom_joins(&self, l0_bytes: u64, bottom_bytes: u64) -> bool {
        bottom_bytes as f64 <= l0_bytes as f64 * self.multiplier
    }

    fn pick_universal(&self, version: &Version, busy: &HashSet<FileNumber>) -> Option<CompactionTask> {
        let l0 = version.files(0);
        if l0.len() < self.universal_trigger() {
            return None;
        }
        let last = self.last_level();
        let bottom = if last > 0 { version.files(last) } else { &[][..] };
        if l0.iter().chain(bottom.iter()).any(|f| busy.contains(&f.number())) {
            return None;
        }

        let mut inputs: Vec<Vec<Arc<TableHandle>>> = l0.iter().map(|f| vec![Arc::clone(f)]).collect();
        let joins = last > 0 && self.bottom_joins(version.level_bytes(0), version.level_bytes(last));
        if joins && !bottom.is_empty() {
            inputs.push(bottom.to_vec());
        }

        let (output_level, max_output_file_size) = if joins {
            (last, Some(self.target_file_size))
        } else {
            (0, None)
        };
        Some(CompactionTask {
            reason: CompactionReason::UniversalSortedRunNum,
            input_level: 0,
            output_level,
            inputs,
            bottommost: joins,
            deletion_only: false,
            max_output_file_size,
        })
    }

    fn pick_fifo(&self, version: &Version, busy: &HashSet<FileNumber>) -> Option<CompactionTask> {
        let total = version.total_bytes();
        if total <= self.fifo_max_size {
            return None;
        }
        if version.all_files().any(|f| busy.contains(&f.number())) {
            return None;
        }

        // Oldest data first
        let mut files: Vec<Arc<TableHandle>> = version.all_files().cloned().collect();
        files.sort_by_key(|f| (f.meta.max_epoch, f.number()));

        let mut remaining = total;
        let mut victims = Vec::new();
        for file in files {
            if remaining <= self.fifo_max_size {
                break;
            }
            remaining -= file.meta.file_size;
            victims.push(file);
        }

        Some(CompactionTask {
            reason: CompactionReason::FifoMaxSize,
            input_level: 0,
            output_level: 0,
            inputs: vec![victims],
            bottommost: false,
            deletion_only: true,
            max_output_file_size: None,
        })
    }

    fn is_bottommost(&self, version: &Version, output_level: usize, smallest: &str, largest: &str) -> bool {
        (output_level + 1..version.num_levels())
            .all(|l| version.overlapping(l, smallest, largest).is_empty())
    }
}

fn key_range<'a>(files: impl Iterator<Item = &'a Arc<TableHandle>>) -> Option<(String, String)> {
    let mut range: Option<(String, String)> = None;
    for f in files {
        range = Some(match range {
            None => (f.meta.smallest_key.clone(), f.meta.largest_key.clone()),
            Some((s, l)) => (
                s.min(f.meta.smallest_key.clone()),
                l.max(f.meta.largest_key.clone()),
            ),
        });
    }
    range
}
