//! Core types shared by the engine components

use serde::{Deserialize, Serialize};
use std::fmt;

/// Monotonic number identifying an SSTable or WAL file
pub type FileNumber = u64;

/// Monotonic memtable generation. Newer data always carries a larger epoch.
pub type Epoch = u64;

/// A stored value or a deletion marker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueEntry {
    /// Live value
    Value(String),
    /// Deletion marker shadowing older values
    Tombstone,
}

impl ValueEntry {
    /// Whether this entry is a deletion marker
    pub fn is_tombstone(&self) -> bool {
        matches!(self, ValueEntry::Tombstone)
    }

    /// Live value, if any
    pub fn as_value(&self) -> Option<&str> {
        match self {
            ValueEntry::Value(v) => Some(v),
            ValueEntry::Tombstone => None,
        }
    }

    /// Approximate in-memory size in bytes
    pub fn size(&self) -> usize {
        match self {
            ValueEntry::Value(v) => v.len(),
            ValueEntry::Tombstone => 0,
        }
    }
}

/// A key with its value or tombstone
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub key: String,
    pub value: ValueEntry,
}

impl Entry {
    /// Create a live entry
    pub fn put(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: ValueEntry::Value(value.into()),
        }
    }

    /// Create a tombstone entry
    pub fn delete(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: ValueEntry::Tombstone,
        }
    }

    /// Approximate encoded size in bytes
    pub fn size(&self) -> usize {
        self.key.len() + self.value.size()
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            ValueEntry::Value(v) => write!(f, "{} => {}", self.key, v),
            ValueEntry::Tombstone => write!(f, "{} => <deleted>", self.key),
        }
    }
}

/// Name of an SSTable file for a file number
pub fn table_file_name(number: FileNumber) -> String {
    format!("{:06}.sst", number)
}

/// Name of a WAL file for a file number
pub fn log_file_name(number: FileNumber) -> String {
    format!("{:06}.log", number)
}
