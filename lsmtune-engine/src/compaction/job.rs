//! Merge execution for a picked compaction

use super::CompactionTask;
use crate::options::ReadOptions;
use crate::sstable::{BuildOptions, TableBuilder, TableMeta};
use crate::statistics::{Statistics, StatsExt, Ticker};
use crate::storage::{EntryIterator, LevelIterator, MergingIterator};
use crate::types::{table_file_name, Epoch, FileNumber};
use crate::Result;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Tables produced by a finished job
#[derive(Debug, Default)]
pub struct JobOutput {
    pub tables: Vec<TableMeta>,
    pub bytes_read: u64,
    pub bytes_written: u64,
    /// Shadowed versions plus tombstones dropped at the bottom
    pub dropped_keys: u64,
}

/// Rewrites the inputs of one [`CompactionTask`] into new tables
pub struct CompactionJob<'a> {
    task: &'a CompactionTask,
    dir: &'a Path,
    build: BuildOptions,
    statistics: Option<Arc<Statistics>>,
}

impl<'a> CompactionJob<'a> {
    pub fn new(
        task: &'a CompactionTask,
        dir: &'a Path,
        build: BuildOptions,
        statistics: Option<Arc<Statistics>>,
    ) -> Self {
        Self {
            task,
            dir,
            build,
            statistics,
        }
    }

    /// Merge the inputs. Output files are numbered by `next_file_number`;
    /// on failure every output written so far is removed.
    pub fn run(&self, mut next_file_number: impl FnMut() -> FileNumber) -> Result<JobOutput> {
        let mut output = JobOutput {
            bytes_read: self.task.input_bytes(),
            ..Default::default()
        };
        if self.task.deletion_only {
            return Ok(output);
        }

        match self.merge(&mut next_file_number, &mut output) {
            Ok(()) => {
                self.statistics
                    .tick(Ticker::CompactReadBytes, output.bytes_read);
                self.statistics
                    .tick(Ticker::CompactWriteBytes, output.bytes_written);
                self.statistics
                    .tick(Ticker::CompactionKeyDropObsolete, output.dropped_keys);
                Ok(output)
            }
            Err(e) => {
                for table in &output.tables {
                    let _ = std::fs::remove_file(self.dir.join(table_file_name(table.number)));
                }
                Err(e)
            }
        }
    }

    fn merge(
        &self,
        next_file_number: &mut impl FnMut() -> FileNumber,
        output: &mut JobOutput,
    ) -> Result<()> {
        let read = ReadOptions {
            verify_checksums: true,
            fill_cache: false,
        };
        let mut sources: Vec<Box<dyn EntryIterator>> = Vec::with_capacity(self.task.inputs.len());
        for group in &self.task.inputs {
            if let [single] = group.as_slice() {
                sources.push(Box::new(single.reader.iter(read)?));
            } else {
                sources.push(Box::new(LevelIterator::new(group.clone(), read)));
            }
        }
        let mut merged = MergingIterator::new(sources);
        merged.seek_to_first()?;

        let (min_epoch, max_epoch) = self.epoch_range();
        let mut builder: Option<TableBuilder> = None;
        let mut dropped_tombstones = 0u64;

        while let Some(entry) = merged.entry() {
            if self.task.bottommost && entry.value.is_tombstone() {
                dropped_tombstones += 1;
                merged.next()?;
                continue;
            }

            if builder.is_none() {
                let number = next_file_number();
                let path = self.dir.join(table_file_name(number));
                builder = Some(TableBuilder::new(path, number, self.build)?);
            }
            if let Some(b) = builder.as_mut() {
                if let Err(e) = b.add(entry.clone()) {
                    if let Some(b) = builder.take() {
                        let _ = b.abandon();
                    }
                    return Err(e);
                }
            }
            merged.next()?;

            let full = match (self.task.max_output_file_size, builder.as_ref()) {
                (Some(limit), Some(b)) => b.estimated_size() >= limit,
                _ => false,
            };
            if full {
                if let Some(b) = builder.take() {
                    self.finish_output(b, min_epoch, max_epoch, output)?;
                }
            }
        }

        if let Some(b) = builder.take() {
            self.finish_output(b, min_epoch, max_epoch, output)?;
        }
        output.dropped_keys = merged.shadowed() + dropped_tombstones;

        debug!(
            reason = %self.task.reason,
            output_level = self.task.output_level,
            outputs = output.tables.len(),
            dropped = output.dropped_keys,
            "Compaction merge finished"
        );
        Ok(())
    }

    fn finish_output(
        &self,
        builder: TableBuilder,
        min_epoch: Epoch,
        max_epoch: Epoch,
        output: &mut JobOutput,
    ) -> Result<()> {
        let mut meta = builder.finish(min_epoch, max_epoch)?;
        meta.level = self.task.output_level;
        output.bytes_written += meta.file_size;
        output.tables.push(meta);
        Ok(())
    }

    fn epoch_range(&self) -> (Epoch, Epoch) {
        let min = self.task.input_files().map(|f| f.meta.min_epoch).min();
        let max = self.task.input_files().map(|f| f.meta.max_epoch).max();
        (min.unwrap_or(0), max.unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compaction::CompactionReason;
    use crate::options::DbOptions;
    use crate::sstable::{TableContext, TableReader};
    use crate::storage::TableHandle;
    use crate::Entry;
    use tempfile::TempDir;

    fn table(dir: &Path, number: FileNumber, level: usize, entries: Vec<Entry>, epoch: Epoch) -> Arc<TableHandle> {
        let path = dir.join(table_file_name(number));
        let mut builder = TableBuilder::new(&path, number, BuildOptions::default()).unwrap();
        for entry in entries {
            builder.add(entry).unwrap();
        }
        let mut meta = builder.finish(epoch, epoch).unwrap();
        meta.level = level;
        let ctx = Arc::new(TableContext::from_options(&DbOptions::default()));
        TableHandle::new(meta, TableReader::open(&path, number, level, ctx).unwrap())
    }

    fn task(inputs: Vec<Vec<Arc<TableHandle>>>, bottommost: bool, max: Option<u64>) -> CompactionTask {
        CompactionTask {
            reason: CompactionReason::LevelL0FilesNum,
            input_level: 0,
            output_level: 1,
            inputs,
            bottommost,
            deletion_only: false,
            max_output_file_size: max,
        }
    }

    fn read_all(dir: &Path, meta: &TableMeta) -> Vec<Entry> {
        let ctx = Arc::new(TableContext::from_options(&DbOptions::default()));
        let reader = Arc::new(
            TableReader::open(dir.join(table_file_name(meta.number)), meta.number, 1, ctx).unwrap(),
        );
        let mut iter = reader.iter(ReadOptions::default()).unwrap();
        iter.seek_to_first().unwrap();
        let mut out = Vec::new();
        while let Some(entry) = iter.entry() {
            out.push(entry.clone());
            iter.next().unwrap();
        }
        out
    }

    #[test]
    fn test_newest_version_wins() {
        let dir = TempDir::new().unwrap();
        let newer = table(
            dir.path(),
            1,
            0,
            vec![Entry::put("a", "new"), Entry::delete("b")],
            2,
        );
        let older = table(
            dir.path(),
            2,
            0,
            vec![Entry::put("a", "old"), Entry::put("b", "old"), Entry::put("c", "old")],
            1,
        );

        let task = task(vec![vec![newer], vec![older]], false, None);
        let mut next = 10;
        let output = CompactionJob::new(&task, dir.path(), BuildOptions::default(), None)
            .run(|| {
                next += 1;
                next
            })
            .unwrap();

        assert_eq!(output.tables.len(), 1);
        let meta = &output.tables[0];
        assert_eq!(meta.level, 1);
        assert_eq!((meta.min_epoch, meta.max_epoch), (1, 2));
        assert_eq!(output.dropped_keys, 2);
        assert_eq!(
            read_all(dir.path(), meta),
            vec![Entry::put("a", "new"), Entry::delete("b"), Entry::put("c", "old")]
        );
    }

    #[test]
    fn test_bottommost_drops_tombstones_and_splits() {
        let dir = TempDir::new().unwrap();
        let mut entries: Vec<Entry> = (0..200)
            .map(|i| Entry::put(format!("key{:04}", i), "x".repeat(100)))
            .collect();
        entries.push(Entry::delete("zzz"));
        let input = table(dir.path(), 1, 0, entries, 1);

        let stats = Arc::new(Statistics::new());
        let task = task(vec![vec![input]], true, Some(4096));
        let mut next = 1;
        let output = CompactionJob::new(
            &task,
            dir.path(),
            BuildOptions::default(),
            Some(Arc::clone(&stats)),
        )
        .run(|| {
            next += 1;
            next
        })
        .unwrap();

        assert!(output.tables.len() > 1);
        let total: u64 = output.tables.iter().map(|t| t.entry_count).sum();
        assert_eq!(total, 200);
        assert!(output.tables.iter().all(|t| t.tombstone_count == 0));
        assert_eq!(output.dropped_keys, 1);
        for pair in output.tables.windows(2) {
            assert!(pair[0].largest_key < pair[1].smallest_key);
        }
        assert_eq!(stats.ticker_count(Ticker::CompactWriteBytes), output.bytes_written);
        assert_eq!(stats.ticker_count(Ticker::CompactionKeyDropObsolete), 1);
    }
}
