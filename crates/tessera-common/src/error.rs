//! Error types for Tessera
//!
//! This module defines the common error type shared by the placement
//! engine and the rebuild aggregation layer.

use thiserror::Error;

/// Common result type for Tessera operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for Tessera
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("not supported: {0}")]
    Unsupported(String),

    #[error("out of memory: {0}")]
    OutOfMemory(String),

    #[error("resource busy: {0}")]
    Busy(String),

    // Placement errors
    #[error("insufficient targets for placement: have {available}, need {required}")]
    InsufficientTargets { available: usize, required: usize },

    #[error("stale placement map: cached version {cached}, requested {requested}")]
    StaleMap { cached: u32, requested: u32 },
}

impl Error {
    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a not found error
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Create an unsupported capability error
    pub fn unsupported(capability: impl Into<String>) -> Self {
        Self::Unsupported(capability.into())
    }

    /// Create an out of memory error
    pub fn out_of_memory(msg: impl Into<String>) -> Self {
        Self::OutOfMemory(msg.into())
    }

    /// Check if the caller should retry with a fresher pool map
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StaleMap { .. })
    }

    /// Check if this is a not found error
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Stable status code carried in fixed-size status fields.
    ///
    /// Zero is reserved for success, so every error maps to a negative value.
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            Self::InvalidArgument(_) => -1003,
            Self::NotFound(_) => -1005,
            Self::Unsupported(_) => -1009,
            Self::OutOfMemory(_) => -1002,
            Self::Busy(_) => -1012,
            Self::InsufficientTargets { .. } => -1015,
            Self::StaleMap { .. } => -1031,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_retryable() {
        assert!(Error::StaleMap { cached: 1, requested: 2 }.is_retryable());
        assert!(!Error::invalid_argument("bad class").is_retryable());
    }

    #[test]
    fn test_error_not_found() {
        assert!(Error::not_found("pool").is_not_found());
        assert!(!Error::unsupported("print").is_not_found());
    }

    #[test]
    fn test_error_codes_are_negative() {
        let errors = [
            Error::invalid_argument("x"),
            Error::not_found("x"),
            Error::unsupported("x"),
            Error::out_of_memory("x"),
            Error::Busy("x".into()),
            Error::InsufficientTargets {
                available: 1,
                required: 3,
            },
            Error::StaleMap {
                cached: 1,
                requested: 2,
            },
        ];
        for err in &errors {
            assert!(err.code() < 0, "{err} must map to a negative code");
        }
    }
}
