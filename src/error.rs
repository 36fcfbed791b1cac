//! Index error types
//!
//! Defines all error conditions surfaced by the measurement index. Anything
//! that is a normal empty answer (missing tag key, no matching series) is
//! returned in-band, not as an error.

use thiserror::Error;

/// Errors that can occur while planning or scanning the index
#[derive(Error, Debug)]
pub enum IndexError {
    /// A comparison lacks a variable reference on either side, or a
    /// meta-query comparison is malformed
    #[error("invalid expression: {0}")]
    InvalidExpression(String),

    /// The query's interrupt signal fired while scanning
    #[error("query interrupted")]
    QueryInterrupted,

    /// A scan saw more series than the configured limit
    #[error("max-select-series limit exceeded: ({count}/{limit})")]
    MaxSeriesExceeded { count: usize, limit: usize },
}

/// Result type alias for index operations
pub type IndexResult<T> = Result<T, IndexError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = IndexError::InvalidExpression("3 = 4".to_string());
        assert_eq!(err.to_string(), "invalid expression: 3 = 4");

        let err = IndexError::MaxSeriesExceeded {
            count: 6,
            limit: 5,
        };
        assert_eq!(
            err.to_string(),
            "max-select-series limit exceeded: (6/5)"
        );

        assert_eq!(
            IndexError::QueryInterrupted.to_string(),
            "query interrupted"
        );
    }
}
