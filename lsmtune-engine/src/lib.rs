//! LsmTune Engine - an embedded, tunable LSM key-value store
//!
//! # Architecture
//!
//! - **WAL**: one log per memtable, replayed on open
//! - **MemTable**: in-memory skip list, frozen at the write buffer size
//! - **SSTable**: immutable sorted files with block index and bloom filter
//! - **Compaction**: background merging in level, universal or FIFO style
//!
//! [`Db`] is the engine. Benchmark code drives it through the traits in
//! [`storage`]: [`KvEngine`] and [`Cursor`] for reads and writes,
//! [`CompactionProbe`] and [`EventListener`] for background work.

pub mod cache;
pub mod compaction;
pub mod memtable;
pub mod options;
pub mod sstable;
pub mod statistics;
pub mod storage;
pub mod wal;

mod error;
mod types;

pub use error::{EngineError, Result};
pub use types::*;

pub use compaction::{CompactionCounters, CompactionJobInfo};
pub use options::{DbOptions, ReadOptions, WriteOptions};
pub use storage::{CompactionProbe, Cursor, Db, EventListener, KvEngine, LevelSummary, LiveFiles};
