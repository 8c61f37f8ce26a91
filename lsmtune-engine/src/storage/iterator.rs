//! Merged iteration over memtables and tables
//!
//! ```text
//! ┌──────────────────────────── MergingIterator ───────────────────────────┐
//! │  source 0: mutable memtable        (newest)                            │
//! │  source 1..: immutable memtables                                        │
//! │  source ..: one per L0 table                                            │
//! │  source ..: one LevelIterator per sorted level  (oldest)                │
//! │                                                                         │
//! │  heap of (key, source index): smallest key first, then newest source    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each distinct key is yielded once, from the newest source holding it.
//! Tombstones are passed through; [`DbIterator`] hides them from callers.

use super::db::Db;
use super::version::TableHandle;
use crate::memtable::MemTableIterator;
use crate::options::ReadOptions;
use crate::sstable::TableIterator;
use crate::statistics::{HistogramType, StatsExt, Ticker};
use crate::{EngineError, Entry, Result, ValueEntry};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Instant;

/// Forward iterator over sorted entries, tombstones included
pub trait EntryIterator: Send {
    fn seek_to_first(&mut self) -> Result<()>;
    /// Position at the first entry with key >= `key`
    fn seek(&mut self, key: &str) -> Result<()>;
    fn valid(&self) -> bool;
    fn entry(&self) -> Option<&Entry>;
    fn next(&mut self) -> Result<()>;
}

impl EntryIterator for MemTableIterator {
    fn seek_to_first(&mut self) -> Result<()> {
        MemTableIterator::seek_to_first(self);
        Ok(())
    }

    fn seek(&mut self, key: &str) -> Result<()> {
        MemTableIterator::seek(self, key);
        Ok(())
    }

    fn valid(&self) -> bool {
        MemTableIterator::valid(self)
    }

    fn entry(&self) -> Option<&Entry> {
        MemTableIterator::entry(self)
    }

    fn next(&mut self) -> Result<()> {
        MemTableIterator::next(self);
        Ok(())
    }
}

impl EntryIterator for TableIterator {
    fn seek_to_first(&mut self) -> Result<()> {
        TableIterator::seek_to_first(self)
    }

    fn seek(&mut self, key: &str) -> Result<()> {
        TableIterator::seek(self, key)
    }

    fn valid(&self) -> bool {
        TableIterator::valid(self)
    }

    fn entry(&self) -> Option<&Entry> {
        TableIterator::entry(self)
    }

    fn next(&mut self) -> Result<()> {
        TableIterator::next(self)
    }
}

/// Concatenation of the disjoint, sorted files of one level. Tables are
/// opened for iteration only when reached.
pub struct LevelIterator {
    files: Vec<Arc<TableHandle>>,
    read: ReadOptions,
    file_idx: usize,
    current: Option<TableIterator>,
}

impl LevelIterator {
    pub fn new(files: Vec<Arc<TableHandle>>, read: ReadOptions) -> Self {
        Self {
            files,
            read,
            file_idx: 0,
            current: None,
        }
    }

    fn open_file(&mut self, idx: usize) -> Result<()> {
        self.file_idx = idx;
        self.current = match self.files.get(idx) {
            Some(handle) => Some(handle.reader.iter(self.read)?),
            None => None,
        };
        Ok(())
    }

    fn skip_exhausted_files(&mut self) -> Result<()> {
        while let Some(iter) = &self.current {
            if iter.valid() {
                break;
            }
            self.open_file(self.file_idx + 1)?;
            if let Some(iter) = &mut self.current {
                iter.seek_to_first()?;
            }
        }
        Ok(())
    }
}

impl EntryIterator for LevelIterator {
    fn seek_to_first(&mut self) -> Result<()> {
        self.open_file(0)?;
        if let Some(iter) = &mut self.current {
            iter.seek_to_first()?;
        }
        self.skip_exhausted_files()
    }

    fn seek(&mut self, key: &str) -> Result<()> {
        let idx = self
            .files
            .partition_point(|f| f.meta.largest_key.as_str() < key);
        self.open_file(idx)?;
        if let Some(iter) = &mut self.current {
            iter.seek(key)?;
        }
        self.skip_exhausted_files()
    }

    fn valid(&self) -> bool {
        self.current.as_ref().is_some_and(|i| i.valid())
    }

    fn entry(&self) -> Option<&Entry> {
        self.current.as_ref().and_then(|i| i.entry())
    }

    fn next(&mut self) -> Result<()> {
        if let Some(iter) = &mut self.current {
            iter.next()?;
        }
        self.skip_exhausted_files()
    }
}

struct MergeCandidate {
    key: String,
    source_idx: usize,
}

impl PartialEq for MergeCandidate {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.source_idx == other.source_idx
    }
}

impl Eq for MergeCandidate {}

impl PartialOrd for MergeCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MergeCandidate {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: reverse both so the smallest key, then the newest
        // source, is on top
        other
            .key
            .cmp(&self.key)
            .then_with(|| other.source_idx.cmp(&self.source_idx))
    }
}

/// K-way merge of sources ordered newest first
pub struct MergingIterator {
    sources: Vec<Box<dyn EntryIterator>>,
    heap: BinaryHeap<MergeCandidate>,
    shadowed: u64,
}

impl MergingIterator {
    pub fn new(sources: Vec<Box<dyn EntryIterator>>) -> Self {
        Self {
            sources,
            heap: BinaryHeap::new(),
            shadowed: 0,
        }
    }

    /// Older versions skipped because a newer source held the same key
    pub fn shadowed(&self) -> u64 {
        self.shadowed
    }

    pub fn seek_to_first(&mut self) -> Result<()> {
        for source in &mut self.sources {
            source.seek_to_first()?;
        }
        self.rebuild_heap();
        Ok(())
    }

    pub fn seek(&mut self, key: &str) -> Result<()> {
        for source in &mut self.sources {
            source.seek(key)?;
        }
        self.rebuild_heap();
        Ok(())
    }

    pub fn valid(&self) -> bool {
        !self.heap.is_empty()
    }

    pub fn entry(&self) -> Option<&Entry> {
        let top = self.heap.peek()?;
        self.sources[top.source_idx].entry()
    }

    /// Advance past the current key in every source
    pub fn next(&mut self) -> Result<()> {
        let Some(top) = self.heap.pop() else {
            return Ok(());
        };
        self.advance(top.source_idx)?;

        while let Some(candidate) = self.heap.peek() {
            if candidate.key != top.key {
                break;
            }
            let idx = candidate.source_idx;
            self.heap.pop();
            self.shadowed += 1;
            self.advance(idx)?;
        }
        Ok(())
    }

    fn advance(&mut self, idx: usize) -> Result<()> {
        let source = &mut self.sources[idx];
        source.next()?;
        if let Some(entry) = source.entry() {
            self.heap.push(MergeCandidate {
                key: entry.key.clone(),
                source_idx: idx,
            });
        }
        Ok(())
    }

    fn rebuild_heap(&mut self) {
        self.heap.clear();
        for (idx, source) in self.sources.iter().enumerate() {
            if let Some(entry) = source.entry() {
                self.heap.push(MergeCandidate {
                    key: entry.key.clone(),
                    source_idx: idx,
                });
            }
        }
    }
}

/// User-facing cursor over a database snapshot. Deleted keys are hidden.
/// Failures are latched into [`DbIterator::status`] and invalidate the
/// cursor.
pub struct DbIterator {
    db: Db,
    read: ReadOptions,
    merged: MergingIterator,
    status: Option<EngineError>,
}

impl DbIterator {
    pub(crate) fn new(db: Db, read: ReadOptions) -> Result<Self> {
        let merged = db.merged_sources(read)?;
        Ok(Self {
            db,
            read,
            merged,
            status: None,
        })
    }

    /// Rebuild over the database's current state
    pub fn refresh(&mut self) -> Result<()> {
        self.merged = self.db.merged_sources(self.read)?;
        self.status = None;
        Ok(())
    }

    pub fn seek(&mut self, key: &str) {
        let start = Instant::now();
        let result = self
            .merged
            .seek(key)
            .and_then(|_| self.skip_tombstones());
        self.latch(result);

        let stats = self.db.statistics();
        stats.tick(Ticker::NumberDbSeek, 1);
        if self.valid() {
            stats.tick(Ticker::NumberDbSeekFound, 1);
        }
        stats.observe(HistogramType::DbSeek, start.elapsed().as_micros() as u64);
    }

    pub fn seek_to_first(&mut self) {
        let result = self
            .merged
            .seek_to_first()
            .and_then(|_| self.skip_tombstones());
        self.latch(result);
    }

    pub fn valid(&self) -> bool {
        self.status.is_none() && self.merged.valid()
    }

    pub fn next(&mut self) {
        if !self.valid() {
            return;
        }
        let result = self.merged.next().and_then(|_| self.skip_tombstones());
        self.latch(result);
        self.db.statistics().tick(Ticker::NumberDbNext, 1);
    }

    /// Current key; empty when not valid
    pub fn key(&self) -> &str {
        self.current().map(|e| e.key.as_str()).unwrap_or("")
    }

    /// Current value; empty when not valid
    pub fn value(&self) -> &str {
        self.current()
            .and_then(|e| e.value.as_value())
            .unwrap_or("")
    }

    /// First error met while moving, if any
    pub fn status(&self) -> Result<()> {
        match &self.status {
            None => Ok(()),
            Some(e) => Err(EngineError::Internal(format!("Iterator failed: {}", e))),
        }
    }

    fn current(&self) -> Option<&Entry> {
        if self.status.is_some() {
            return None;
        }
        self.merged.entry()
    }

    fn skip_tombstones(&mut self) -> Result<()> {
        while let Some(entry) = self.merged.entry() {
            if !matches!(entry.value, ValueEntry::Tombstone) {
                let bytes = (entry.key.len() + entry.value.size()) as u64;
                self.db.statistics().tick(Ticker::IterBytesRead, bytes);
                break;
            }
            self.merged.next()?;
        }
        Ok(())
    }

    fn latch(&mut self, result: Result<()>) {
        if let Err(e) = result {
            self.status = Some(e);
        }
    }
}
