//! MemTable implementation using a concurrent skip list
//!
//! The MemTable holds recent writes in key order until it is full, then it
//! is frozen and flushed to an L0 table by a background worker.

use crate::types::{Epoch, FileNumber};
use crate::{Entry, ValueEntry};
use crossbeam_skiplist::SkipMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Per-entry bookkeeping charged on top of key and value bytes
const ENTRY_OVERHEAD: usize = 16;

/// MemTable for in-memory writes
pub struct MemTable {
    data: SkipMap<String, ValueEntry>,
    /// Approximate size in bytes
    size_bytes: AtomicUsize,
    /// Generation of this memtable; also the number of its WAL file
    epoch: Epoch,
}

impl MemTable {
    pub fn new(epoch: Epoch) -> Self {
        Self {
            data: SkipMap::new(),
            size_bytes: AtomicUsize::new(0),
            epoch,
        }
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// Number of the WAL file backing this memtable
    pub fn log_number(&self) -> FileNumber {
        self.epoch
    }

    /// Insert or overwrite a value
    pub fn put(&self, key: &str, value: &str) {
        self.apply(key.to_string(), ValueEntry::Value(value.to_string()));
    }

    /// Record a deletion marker
    pub fn delete(&self, key: &str) {
        self.apply(key.to_string(), ValueEntry::Tombstone);
    }

    /// Apply an already-built entry
    pub fn insert(&self, entry: Entry) {
        self.apply(entry.key, entry.value);
    }

    fn apply(&self, key: String, value: ValueEntry) {
        let entry_size = key.len() + value.size() + ENTRY_OVERHEAD;
        self.data.insert(key, value);
        self.size_bytes.fetch_add(entry_size, Ordering::Relaxed);
    }

    /// Latest value or tombstone for `key`
    pub fn get(&self, key: &str) -> Option<ValueEntry> {
        self.data.get(key).map(|e| e.value().clone())
    }

    /// First entry with key >= `key`
    pub fn lower_bound(&self, key: &str) -> Option<Entry> {
        self.data
            .lower_bound(Bound::Included(key))
            .map(|e| Entry {
                key: e.key().clone(),
                value: e.value().clone(),
            })
    }

    /// First entry with key > `key`
    pub fn successor(&self, key: &str) -> Option<Entry> {
        self.data
            .lower_bound(Bound::Excluded(key))
            .map(|e| Entry {
                key: e.key().clone(),
                value: e.value().clone(),
            })
    }

    /// Check if the MemTable should be flushed
    pub fn should_flush(&self, size_limit: u64) -> bool {
        self.size() as u64 >= size_limit
    }

    /// Get the current size in bytes
    pub fn size(&self) -> usize {
        self.size_bytes.load(Ordering::Relaxed)
    }

    /// Snapshot of all entries in key order
    pub fn entries(&self) -> Vec<Entry> {
        self.data
            .iter()
            .map(|e| Entry {
                key: e.key().clone(),
                value: e.value().clone(),
            })
            .collect()
    }

    /// Get entry count
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Forward cursor over a memtable that tolerates concurrent inserts
pub struct MemTableIterator {
    table: Arc<MemTable>,
    current: Option<Entry>,
}

impl MemTableIterator {
    pub fn new(table: Arc<MemTable>) -> Self {
        Self {
            table,
            current: None,
        }
    }

    pub fn seek_to_first(&mut self) {
        self.current = self.table.lower_bound("");
    }

    pub fn seek(&mut self, key: &str) {
        self.current = self.table.lower_bound(key);
    }

    pub fn valid(&self) -> bool {
        self.current.is_some()
    }

    pub fn entry(&self) -> Option<&Entry> {
        self.current.as_ref()
    }

    pub fn next(&mut self) {
        if let Some(current) = self.current.take() {
            self.current = self.table.successor(&current.key);
        }
    }
}
