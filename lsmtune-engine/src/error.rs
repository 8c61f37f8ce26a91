//! Error types for the embedded engine

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Engine error types
#[derive(Error, Debug)]
pub enum EngineError {
    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Data corruption detected
    #[error("Corruption: {0}")]
    Corruption(String),

    /// Checksum mismatch
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// Invalid data format
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// Compression/decompression error
    #[error("Compression error: {0}")]
    Compression(String),

    /// Option combination rejected when opening the engine
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid argument passed to an engine call
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation on a closed database
    #[error("Database is closed")]
    Closed,

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Check if error indicates corruption
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            EngineError::Corruption(_) | EngineError::ChecksumMismatch { .. }
        )
    }

    /// Check if error was raised by option validation
    pub fn is_config(&self) -> bool {
        matches!(self, EngineError::Config(_))
    }
}

impl From<bincode::Error> for EngineError {
    fn from(e: bincode::Error) -> Self {
        EngineError::InvalidFormat(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_predicates() {
        assert!(EngineError::ChecksumMismatch {
            expected: 1,
            actual: 2
        }
        .is_corruption());
        assert!(EngineError::Config("num_levels".into()).is_config());
        assert!(!EngineError::Closed.is_config());
    }
}
