//! Error types for query planning and execution

use thiserror::Error;

/// Main error type for multi-resolution query operations
///
/// A region that degenerates during planning is not an error: the planner
/// reports it as `Ok(None)`. Cancellation is never reported as an error either.
#[derive(Error, Debug)]
pub enum QueryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid dimensions: {0}")]
    InvalidDimensions(String),

    #[error("Invalid bitmask: {0}")]
    InvalidBitmask(String),

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Invalid data type: {0}")]
    InvalidDataType(String),

    #[error("Invalid axis: {0}")]
    InvalidAxis(usize),

    #[error("Unknown field: {0}")]
    UnknownField(String),

    #[error("Unknown timestep: {0}")]
    UnknownTimestep(i64),

    #[error("Read failed: {0}")]
    Read(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Executor is not running")]
    NotRunning,
}

impl QueryError {
    /// Whether this error is a programming or configuration defect rather
    /// than a runtime I/O failure.
    pub fn is_configuration_defect(&self) -> bool {
        matches!(
            self,
            QueryError::InvalidDimensions(_)
                | QueryError::InvalidBitmask(_)
                | QueryError::ShapeMismatch(_)
                | QueryError::InvalidDataType(_)
                | QueryError::InvalidAxis(_)
                | QueryError::UnknownField(_)
                | QueryError::UnknownTimestep(_)
                | QueryError::Configuration(_)
        )
    }
}

/// Specialized Result type for query operations
pub type Result<T> = std::result::Result<T, QueryError>;

impl From<serde_json::Error> for QueryError {
    fn from(err: serde_json::Error) -> Self {
        QueryError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defect_classification() {
        assert!(QueryError::ShapeMismatch("x".into()).is_configuration_defect());
        assert!(QueryError::UnknownField("temp".into()).is_configuration_defect());
        assert!(!QueryError::Read("timeout".into()).is_configuration_defect());
        assert!(!QueryError::NotRunning.is_configuration_defect());
    }
}
