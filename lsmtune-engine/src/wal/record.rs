//! WAL record types and framing

use crate::{EngineError, Entry, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// A single logged mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalRecord {
    Put { key: String, value: String },
    Delete { key: String },
}

impl WalRecord {
    pub fn put(key: &str, value: &str) -> Self {
        WalRecord::Put {
            key: key.to_string(),
            value: value.to_string(),
        }
    }

    pub fn delete(key: &str) -> Self {
        WalRecord::Delete {
            key: key.to_string(),
        }
    }

    /// The memtable entry this record produces on replay
    pub fn into_entry(self) -> Entry {
        match self {
            WalRecord::Put { key, value } => Entry::put(key, value),
            WalRecord::Delete { key } => Entry::delete(key),
        }
    }

    /// Serialize the record with length prefix and CRC checksum
    ///
    /// Format:
    /// - 4 bytes: record length (excluding this field)
    /// - N bytes: bincode payload
    /// - 4 bytes: CRC32 of the payload
    pub fn encode(&self) -> Result<Bytes> {
        let payload = bincode::serialize(self)?;
        let mut buf = BytesMut::with_capacity(payload.len() + 8);
        buf.put_u32_le(payload.len() as u32 + 4);
        buf.put_slice(&payload);
        buf.put_u32_le(crc32fast::hash(&payload));
        Ok(buf.freeze())
    }

    /// Decode one record from the front of `data`.
    ///
    /// Returns `Ok(None)` when `data` holds only part of a record, which is
    /// what a crash during an append leaves behind.
    pub fn decode(data: &[u8]) -> Result<Option<(Self, usize)>> {
        if data.len() < 4 {
            return Ok(None);
        }
        let len = (&data[..4]).get_u32_le() as usize;
        if len < 4 {
            return Err(EngineError::Corruption(format!("Invalid WAL record length {}", len)));
        }
        if data.len() < 4 + len {
            return Ok(None);
        }

        let payload = &data[4..len];
        let expected = (&data[len..len + 4]).get_u32_le();
        let actual = crc32fast::hash(payload);
        if expected != actual {
            return Err(EngineError::ChecksumMismatch { expected, actual });
        }

        let record = bincode::deserialize(payload)?;
        Ok(Some((record, 4 + len)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_serialization() {
        let record = WalRecord::put("key", "value");
        let encoded = record.encode().unwrap();

        let (decoded, len) = WalRecord::decode(&encoded).unwrap().unwrap();
        assert_eq!(len, encoded.len());
        assert_eq!(decoded, record);
        assert_eq!(decoded.into_entry(), Entry::put("key", "value"));
    }

    #[test]
    fn test_partial_record_is_not_an_error() {
        let encoded = WalRecord::delete("gone").encode().unwrap();
        assert!(WalRecord::decode(&encoded[..encoded.len() - 1]).unwrap().is_none());
        assert!(WalRecord::decode(&encoded[..2]).unwrap().is_none());
    }

    #[test]
    fn test_checksum_validation() {
        let mut encoded = WalRecord::put("a", "b").encode().unwrap().to_vec();
        encoded[6] ^= 0xFF;

        let result = WalRecord::decode(&encoded);
        assert!(matches!(result, Err(EngineError::ChecksumMismatch { .. })));
    }
}
