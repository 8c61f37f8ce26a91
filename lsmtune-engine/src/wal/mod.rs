//! Write-Ahead Log (WAL) implementation
//!
//! Every memtable has its own log file, named after the memtable's epoch.
//! Writes are appended before they reach the memtable; once the memtable
//! is flushed to an SSTable its log is deleted. Logs left on disk are
//! replayed when the database is opened.

mod reader;
mod record;
mod writer;

pub use reader::WalReader;
pub use record::WalRecord;
pub use writer::WalWriter;
