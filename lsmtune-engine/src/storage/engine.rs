//! Narrow interface between benchmark code and a storage engine
//!
//! A trace replayer only needs [`KvEngine`] and a compaction barrier
//! only needs [`CompactionProbe`], so both can run against
//! simulated engines in tests. [`Db`] implements all of them.

use super::db::Db;
use super::iterator::DbIterator;
use crate::compaction::{CompactionCounters, CompactionJobInfo};
use crate::options::{ReadOptions, WriteOptions};
use crate::Result;
use serde::Serialize;

/// One live table file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LiveFile {
    pub name: String,
    pub level: usize,
    pub size: u64,
    pub entries: u64,
    pub smallest_key: String,
    pub largest_key: String,
}

/// Result of [`KvEngine::live_files`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LiveFiles {
    pub files: Vec<LiveFile>,
    pub total_bytes: u64,
}

/// Point and range operations used to replay a trace
pub trait KvEngine {
    type Cursor: Cursor;

    fn put(&self, key: &str, value: &str, write: &WriteOptions) -> Result<()>;

    fn delete(&self, key: &str, write: &WriteOptions) -> Result<()>;

    fn get(&self, key: &str, read: &ReadOptions) -> Result<Option<String>>;

    fn new_cursor(&self, read: &ReadOptions) -> Result<Self::Cursor>;

    /// List live files; `flush` first persists everything in memory
    fn live_files(&self, flush: bool) -> Result<LiveFiles>;
}

/// Forward cursor. Movement never fails directly; errors surface through
/// [`Cursor::status`].
pub trait Cursor {
    fn seek(&mut self, key: &str);
    fn valid(&self) -> bool;
    fn next(&mut self);
    fn key(&self) -> &str;
    fn value(&self) -> &str;
    /// Re-read the engine's latest state
    fn refresh(&mut self) -> Result<()>;
    fn status(&self) -> Result<()>;
}

/// Introspection of background compaction work
pub trait CompactionProbe: Send + Sync {
    fn compaction_counters(&self) -> CompactionCounters;
}

/// Receives engine events on background threads. Implementations must
/// return quickly and must not call back into the engine.
pub trait EventListener: Send + Sync {
    fn on_compaction_completed(&self, info: &CompactionJobInfo);
}

impl KvEngine for Db {
    type Cursor = DbIterator;

    fn put(&self, key: &str, value: &str, write: &WriteOptions) -> Result<()> {
        Db::put(self, key, value, write)
    }

    fn delete(&self, key: &str, write: &WriteOptions) -> Result<()> {
        Db::delete(self, key, write)
    }

    fn get(&self, key: &str, read: &ReadOptions) -> Result<Option<String>> {
        Db::get(self, key, read)
    }

    fn new_cursor(&self, read: &ReadOptions) -> Result<DbIterator> {
        Db::new_cursor(self, *read)
    }

    fn live_files(&self, flush: bool) -> Result<LiveFiles> {
        Db::live_files(self, flush)
    }
}

impl Cursor for DbIterator {
    fn seek(&mut self, key: &str) {
        DbIterator::seek(self, key)
    }

    fn valid(&self) -> bool {
        DbIterator::valid(self)
    }

    fn next(&mut self) {
        DbIterator::next(self)
    }

    fn key(&self) -> &str {
        DbIterator::key(self)
    }

    fn value(&self) -> &str {
        DbIterator::value(self)
    }

    fn refresh(&mut self) -> Result<()> {
        DbIterator::refresh(self)
    }

    fn status(&self) -> Result<()> {
        DbIterator::status(self)
    }
}

impl CompactionProbe for Db {
    fn compaction_counters(&self) -> CompactionCounters {
        Db::compaction_counters(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn scan<E: KvEngine>(engine: &E, start: &str, end: &str) -> Vec<String> {
        let mut cursor = engine.new_cursor(&ReadOptions::default()).unwrap();
        cursor.refresh().unwrap();
        cursor.seek(start);
        let mut keys = Vec::new();
        while cursor.valid() && cursor.key() < end {
            keys.push(format!("{}={}", cursor.key(), cursor.value()));
            cursor.next();
        }
        cursor.status().unwrap();
        keys
    }

    #[test]
    fn test_db_through_trait() {
        let dir = TempDir::new().unwrap();
        let db = Db::open(
            dir.path(),
            crate::options::DbOptions {
                create_if_missing: true,
                ..Default::default()
            },
        )
        .unwrap();
        let write = WriteOptions::default();
        for key in ["b", "c", "d"] {
            KvEngine::put(&db, key, key, &write).unwrap();
        }
        KvEngine::delete(&db, "c", &write).unwrap();

        assert_eq!(scan(&db, "a", "z"), vec!["b=b", "d=d"]);
        assert_eq!(scan(&db, "b", "d"), vec!["b=b"]);

        let live = KvEngine::live_files(&db, true).unwrap();
        assert_eq!(live.files.len(), 1);
        assert_eq!(live.total_bytes, live.files[0].size);
        assert!(CompactionProbe::compaction_counters(&db).is_quiescent());
    }
}
