//! WAL reader for recovery

use super::WalRecord;
use crate::types::FileNumber;
use crate::{EngineError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Reads back the log files left by a previous session
pub struct WalReader {
    dir: PathBuf,
}

impl WalReader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Log files in `dir`, oldest first
    pub fn list_logs(&self) -> Result<Vec<(FileNumber, PathBuf)>> {
        let mut logs = Vec::new();
        if !self.dir.exists() {
            return Ok(logs);
        }

        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if let Some(number) = parse_log_number(&path) {
                logs.push((number, path));
            }
        }
        logs.sort_by_key(|(number, _)| *number);
        Ok(logs)
    }

    /// Read every record of one log. A torn or corrupted tail ends the log
    /// with a warning; everything before it is kept.
    pub fn read_log(&self, path: &Path) -> Result<Vec<WalRecord>> {
        let data = fs::read(path)?;
        let mut records = Vec::new();
        let mut offset = 0;

        while offset < data.len() {
            match WalRecord::decode(&data[offset..]) {
                Ok(Some((record, bytes_read))) => {
                    records.push(record);
                    offset += bytes_read;
                }
                Ok(None) => {
                    warn!(
                        "Incomplete record at offset {} in {:?}, truncating",
                        offset, path
                    );
                    break;
                }
                Err(e @ (EngineError::ChecksumMismatch { .. } | EngineError::Corruption(_))) => {
                    warn!("{} at offset {} in {:?}, truncating", e, offset, path);
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        info!("Recovered {} records from {:?}", records.len(), path);
        Ok(records)
    }
}

fn parse_log_number(path: &Path) -> Option<FileNumber> {
    path.file_name()
        .and_then(|n| n.to_str())
        .and_then(|s| s.strip_suffix(".log"))
        .and_then(|s| s.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wal::WalWriter;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_wal_recovery() {
        let temp_dir = TempDir::new().unwrap();
        {
            let writer = WalWriter::create(temp_dir.path(), 12).unwrap();
            for i in 0..10 {
                writer
                    .append(&WalRecord::put(&format!("key{}", i), "v"), false)
                    .unwrap();
            }
            writer.sync().unwrap();
        }
        WalWriter::create(temp_dir.path(), 4).unwrap();

        let reader = WalReader::new(temp_dir.path());
        let logs = reader.list_logs().unwrap();
        assert_eq!(logs.iter().map(|(n, _)| *n).collect::<Vec<_>>(), vec![4, 12]);

        let records = reader.read_log(&logs[1].1).unwrap();
        assert_eq!(records.len(), 10);
        assert!(reader.read_log(&logs[0].1).unwrap().is_empty());
    }

    #[test]
    fn test_torn_tail_is_truncated() {
        let temp_dir = TempDir::new().unwrap();
        let writer = WalWriter::create(temp_dir.path(), 1).unwrap();
        writer.append(&WalRecord::put("a", "1"), true).unwrap();
        writer.append(&WalRecord::put("b", "2"), true).unwrap();

        let partial = WalRecord::put("c", "3").encode().unwrap();
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(writer.path())
            .unwrap();
        file.write_all(&partial[..partial.len() - 3]).unwrap();

        let records = WalReader::new(temp_dir.path()).read_log(writer.path()).unwrap();
        assert_eq!(records, vec![WalRecord::put("a", "1"), WalRecord::put("b", "2")]);
    }
}
