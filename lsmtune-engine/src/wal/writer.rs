//! WAL writer implementation

use super::WalRecord;
use crate::types::{log_file_name, FileNumber};
use crate::Result;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Appends records to the log file of one memtable
pub struct WalWriter {
    number: FileNumber,
    path: PathBuf,
    file: Mutex<BufWriter<File>>,
    bytes_written: AtomicU64,
}

impl WalWriter {
    /// Create the log file numbered `number` in `dir`
    pub fn create(dir: &Path, number: FileNumber) -> Result<Self> {
        let path = dir.join(log_file_name(number));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            number,
            path,
            file: Mutex::new(BufWriter::new(file)),
            bytes_written: AtomicU64::new(0),
        })
    }

    /// Append a record, handing it to the OS and optionally fsyncing.
    /// Returns the number of bytes written.
    pub fn append(&self, record: &WalRecord, sync: bool) -> Result<u64> {
        let serialized = record.encode()?;
        let mut file = self.file.lock();
        file.write_all(&serialized)?;
        file.flush()?;
        if sync {
            file.get_ref().sync_data()?;
        }

        let len = serialized.len() as u64;
        self.bytes_written.fetch_add(len, Ordering::Relaxed);
        Ok(len)
    }

    /// Force sync to disk
    pub fn sync(&self) -> Result<()> {
        let mut file = self.file.lock();
        file.flush()?;
        file.get_ref().sync_all()?;
        Ok(())
    }

    pub fn number(&self) -> FileNumber {
        self.number
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_wal_writer() {
        let temp_dir = TempDir::new().unwrap();
        let writer = WalWriter::create(temp_dir.path(), 3).unwrap();
        assert!(writer.path().ends_with("000003.log"));

        let written = writer.append(&WalRecord::put("k", "v"), true).unwrap();
        assert!(written > 8);
        writer.append(&WalRecord::delete("k"), false).unwrap();
        writer.sync().unwrap();

        let on_disk = std::fs::metadata(writer.path()).unwrap().len();
        assert_eq!(on_disk, writer.bytes_written());
    }
}
