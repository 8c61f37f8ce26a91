//! Error types for LsmTune

use lsmtune_engine::EngineError;
use thiserror::Error;

/// Result type alias for LsmTune operations
pub type Result<T> = std::result::Result<T, LsmError>;

/// LsmTune error types
#[derive(Error, Debug)]
pub enum LsmError {
    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Engine call outside of trace replay failed
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Invalid run configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid argument passed to the harness
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Malformed trace input
    #[error("Trace error: {message}\nWorkload line: {line}")]
    Trace { line: u64, message: String },

    /// Engine failure while applying a trace line
    #[error("{source}\nWorkload line: {line}")]
    Workload {
        line: u64,
        #[source]
        source: EngineError,
    },

    /// Report serialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl LsmError {
    /// Wrap an engine error with the trace line that produced it
    pub fn at_line(source: EngineError, line: u64) -> Self {
        LsmError::Workload { line, source }
    }

    /// Check if error indicates corruption
    pub fn is_corruption(&self) -> bool {
        match self {
            LsmError::Engine(e) | LsmError::Workload { source: e, .. } => e.is_corruption(),
            _ => false,
        }
    }

    /// Check if error was raised by option validation, ours or the engine's
    pub fn is_config(&self) -> bool {
        match self {
            LsmError::Config(_) => true,
            LsmError::Engine(e) => e.is_config(),
            _ => false,
        }
    }

    /// Trace line the error is attributed to, if any
    pub fn line(&self) -> Option<u64> {
        match self {
            LsmError::Trace { line, .. } | LsmError::Workload { line, .. } => Some(*line),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workload_error_reports_line() {
        let err = LsmError::at_line(EngineError::Corruption("bad block".into()), 42);
        assert_eq!(err.line(), Some(42));
        assert!(err.is_corruption());

        let text = err.to_string();
        assert!(text.contains("bad block"));
        assert!(text.ends_with("Workload line: 42"));
    }

    #[test]
    fn test_engine_config_error_is_config() {
        let err = LsmError::from(EngineError::Config("num_levels".into()));
        assert!(err.is_config());
        assert_eq!(err.line(), None);
    }
}
