//! Error types for coalesced and cached operations

use std::fmt::Display;

use thiserror::Error;

/// Ready-made error type for operations run through keyflight.
///
/// The coalescer and the cache never create these themselves; they pass
/// through whatever the supplied operation returns. This enum is the default
/// error parameter so that callers without an error type of their own have
/// something `Clone` to return.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// The underlying operation failed
    #[error("operation failed: {0}")]
    Operation(String),

    /// The requested resource does not exist upstream
    #[error("not found: {0}")]
    NotFound(String),

    /// Upstream connection failed
    #[error("connection error: {0}")]
    Connection(String),

    /// The operation raced a caller-supplied timer and lost
    #[error("operation timed out")]
    Timeout,

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl CacheError {
    /// Wrap any displayable error as an [`CacheError::Operation`]
    pub fn operation(err: impl Display) -> Self {
        CacheError::Operation(err.to_string())
    }

    /// Whether calling again might succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, CacheError::Connection(_) | CacheError::Timeout)
    }
}

/// Result type alias for keyflight operations
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CacheError::NotFound("user:42".to_string());
        assert_eq!(err.to_string(), "not found: user:42");

        let err = CacheError::operation("boom");
        assert_eq!(err.to_string(), "operation failed: boom");

        assert_eq!(CacheError::Timeout.to_string(), "operation timed out");
    }

    #[test]
    fn test_error_clone_eq() {
        let err = CacheError::Connection("refused".to_string());
        assert_eq!(err.clone(), err);
    }

    #[test]
    fn test_transient() {
        assert!(CacheError::Timeout.is_transient());
        assert!(CacheError::Connection("reset".into()).is_transient());
        assert!(!CacheError::NotFound("x".into()).is_transient());
    }
}
