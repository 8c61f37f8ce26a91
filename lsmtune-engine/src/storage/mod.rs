//! Storage engine - the embedded database and its public traits

mod db;
mod engine;
mod iterator;
mod version;

pub use db::Db;
pub use engine::{CompactionProbe, Cursor, EventListener, KvEngine, LiveFile, LiveFiles};
pub use iterator::{DbIterator, EntryIterator, LevelIterator, MergingIterator};
pub use version::{LevelSummary, ManifestData, TableHandle, Version, VersionEdit};
