//! Live file set and its persistent manifest

use crate::sstable::{TableMeta, TableReader};
use crate::types::FileNumber;
use crate::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

pub const MANIFEST_FILE: &str = "MANIFEST";
pub const IDENTITY_FILE: &str = "IDENTITY";
const MANIFEST_TMP: &str = "MANIFEST.tmp";

/// An open live table
pub struct TableHandle {
    pub meta: TableMeta,
    pub reader: Arc<TableReader>,
}

impl TableHandle {
    pub fn new(meta: TableMeta, reader: TableReader) -> Arc<Self> {
        Arc::new(Self {
            meta,
            reader: Arc::new(reader),
        })
    }

    pub fn number(&self) -> FileNumber {
        self.meta.number
    }
}

/// Per-level file count and size
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LevelSummary {
    pub level: usize,
    pub files: usize,
    pub bytes: u64,
}

/// Immutable snapshot of the live tables.
///
/// Level 0 is ordered newest first and its files may overlap. Every other
/// level is sorted by smallest key and its files are disjoint.
#[derive(Clone)]
pub struct Version {
    levels: Vec<Vec<Arc<TableHandle>>>,
}

impl Version {
    pub fn new(num_levels: usize) -> Self {
        Self {
            levels: vec![Vec::new(); num_levels.max(1)],
        }
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    /// Files of `level`; empty past the last level
    pub fn files(&self, level: usize) -> &[Arc<TableHandle>] {
        self.levels.get(level).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn level_bytes(&self, level: usize) -> u64 {
        self.files(level).iter().map(|f| f.meta.file_size).sum()
    }

    pub fn total_bytes(&self) -> u64 {
        (0..self.levels.len()).map(|l| self.level_bytes(l)).sum()
    }

    pub fn num_files(&self) -> usize {
        self.levels.iter().map(Vec::len).sum()
    }

    /// Every live table, level by level
    pub fn all_files(&self) -> impl Iterator<Item = &Arc<TableHandle>> {
        self.levels.iter().flatten()
    }

    /// Deepest level holding any file
    pub fn last_non_empty_level(&self) -> Option<usize> {
        (0..self.levels.len()).rev().find(|&l| !self.levels[l].is_empty())
    }

    /// Files of `level` whose key range intersects `[smallest, largest]`
    pub fn overlapping(&self, level: usize, smallest: &str, largest: &str) -> Vec<Arc<TableHandle>> {
        self.files(level)
            .iter()
            .filter(|f| f.meta.overlaps(smallest, largest))
            .cloned()
            .collect()
    }

    /// The single file of a sorted level that may hold `key`
    pub fn file_for_key(&self, level: usize, key: &str) -> Option<&Arc<TableHandle>> {
        let files = self.files(level);
        let idx = files.partition_point(|f| f.meta.largest_key.as_str() < key);
        files.get(idx).filter(|f| f.meta.may_contain_key(key))
    }

    pub fn summary(&self) -> Vec<LevelSummary> {
        self.levels
            .iter()
            .enumerate()
            .map(|(level, files)| LevelSummary {
                level,
                files: files.len(),
                bytes: files.iter().map(|f| f.meta.file_size).sum(),
            })
            .collect()
    }

    /// New version with `edit` applied
    pub fn apply(&self, edit: &VersionEdit) -> Version {
        let mut levels = self.levels.clone();
        for files in &mut levels {
            files.retain(|f| !edit.deleted.contains(&f.number()));
        }
        for handle in &edit.added {
            let level = handle.meta.level.min(levels.len() - 1);
            levels[level].push(Arc::clone(handle));
        }

        levels[0].sort_by(|a, b| {
            b.meta
                .max_epoch
                .cmp(&a.meta.max_epoch)
                .then(b.number().cmp(&a.number()))
        });
        for files in levels.iter_mut().skip(1) {
            files.sort_by(|a, b| a.meta.smallest_key.cmp(&b.meta.smallest_key));
        }

        Version { levels }
    }

    /// Persistent description of this version
    pub fn manifest(&self, next_file_number: FileNumber) -> ManifestData {
        ManifestData {
            next_file_number,
            num_levels: self.levels.len(),
            files: self.all_files().map(|f| f.meta.clone()).collect(),
        }
    }
}

/// Change between two versions
#[derive(Default)]
pub struct VersionEdit {
    pub added: Vec<Arc<TableHandle>>,
    pub deleted: Vec<FileNumber>,
}

impl VersionEdit {
    pub fn add(&mut self, handle: Arc<TableHandle>) {
        self.added.push(handle);
    }

    pub fn delete(&mut self, number: FileNumber) {
        self.deleted.push(number);
    }
}

/// Contents of the MANIFEST file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestData {
    pub next_file_number: FileNumber,
    pub num_levels: usize,
    pub files: Vec<TableMeta>,
}

impl ManifestData {
    /// Load the manifest in `dir`, if the database exists
    pub fn load(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(MANIFEST_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read(&path)?;
        if data.len() < 4 {
            return Err(EngineError::Corruption("MANIFEST is truncated".into()));
        }
        let (body, tail) = data.split_at(data.len() - 4);
        let expected = u32::from_le_bytes([tail[0], tail[1], tail[2], tail[3]]);
        let actual = crc32fast::hash(body);
        if expected != actual {
            return Err(EngineError::ChecksumMismatch { expected, actual });
        }
        Ok(Some(bincode::deserialize(body)?))
    }

    /// Atomically replace the manifest in `dir`
    pub fn store(&self, dir: &Path) -> Result<()> {
        let mut body = bincode::serialize(self)?;
        let checksum = crc32fast::hash(&body);
        body.extend_from_slice(&checksum.to_le_bytes());

        let tmp = dir.join(MANIFEST_TMP);
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&body)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, dir.join(MANIFEST_FILE))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::DbOptions;
    use crate::sstable::{BuildOptions, TableBuilder, TableContext};
    use crate::types::table_file_name;
    use crate::Entry;
    use tempfile::TempDir;

    fn make_table(dir: &Path, number: FileNumber, level: usize, keys: &[&str], epoch: u64) -> Arc<TableHandle> {
        let path = dir.join(table_file_name(number));
        let mut builder = TableBuilder::new(&path, number, BuildOptions::default()).unwrap();
        for key in keys {
            builder.add(Entry::put(*key, "v")).unwrap();
        }
        let mut meta = builder.finish(epoch, epoch).unwrap();
        meta.level = level;
        let ctx = Arc::new(TableContext::from_options(&DbOptions::default()));
        let reader = TableReader::open(&path, number, level, ctx).unwrap();
        TableHandle::new(meta, reader)
    }

    #[test]
    fn test_apply_orders_levels() {
        let dir = TempDir::new().unwrap();
        let mut edit = VersionEdit::default();
        edit.add(make_table(dir.path(), 1, 0, &["a", "z"], 1));
        edit.add(make_table(dir.path(), 2, 0, &["b", "c"], 2));
        edit.add(make_table(dir.path(), 3, 1, &["m", "n"], 1));
        edit.add(make_table(dir.path(), 4, 1, &["d", "e"], 1));

        let version = Version::new(3).apply(&edit);
        let l0: Vec<_> = version.files(0).iter().map(|f| f.number()).collect();
        assert_eq!(l0, vec![2, 1]);
        let l1: Vec<_> = version.files(1).iter().map(|f| f.number()).collect();
        assert_eq!(l1, vec![4, 3]);

        assert_eq!(version.file_for_key(1, "e").unwrap().number(), 4);
        assert!(version.file_for_key(1, "f").is_none());
        assert_eq!(version.overlapping(1, "a", "d").len(), 1);
        assert_eq!(version.last_non_empty_level(), Some(1));

        let mut removal = VersionEdit::default();
        removal.delete(1);
        let next = version.apply(&removal);
        assert_eq!(next.files(0).len(), 1);
        assert_eq!(version.files(0).len(), 2);
    }

    #[test]
    fn test_manifest_roundtrip() {
        let dir = TempDir::new().unwrap();
        let mut edit = VersionEdit::default();
        edit.add(make_table(dir.path(), 5, 2, &["k"], 3));
        let version = Version::new(4).apply(&edit);

        let data = version.manifest(6);
        data.store(dir.path()).unwrap();
        let loaded = ManifestData::load(dir.path()).unwrap().unwrap();
        assert_eq!(loaded, data);
        assert_eq!(loaded.files[0].level, 2);
        assert!(!dir.path().join(MANIFEST_TMP).exists());

        assert!(ManifestData::load(&dir.path().join("missing")).unwrap().is_none());
    }
}
