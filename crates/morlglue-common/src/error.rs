//! Error types for MORL-Glue
//!
//! Provides a unified error type for the wire layer and the session layer.
//! Nearly every variant is unrecoverable: the protocol has no resynchronization
//! mechanism, so the server tears the run down when one reaches the top level.

use thiserror::Error;

use crate::types::message::Role;

/// Result type alias using GlueError
pub type Result<T> = std::result::Result<T, GlueError>;

/// Unified error type for MORL-Glue operations
#[derive(Debug, Error)]
pub enum GlueError {
    // Record errors
    #[error("Record integrity error: {0}")]
    Integrity(#[from] IntegrityError),

    #[error(
        "Corrupt datastream: record header claims {ints} ints, {doubles} doubles, {chars} chars"
    )]
    CorruptStream { ints: u32, doubles: u32, chars: u32 },

    // Buffer errors
    #[error("Buffer underrun: {needed} bytes at offset {offset} exceed logical size {size}")]
    BufferUnderrun { offset: u64, needed: u64, size: u32 },

    #[error("Allocation of {requested} bytes failed (capacity was {capacity})")]
    Allocation { requested: u64, capacity: u32 },

    #[error("Payload of {0} bytes does not fit the wire format")]
    PayloadTooLarge(u64),

    // Protocol errors
    #[error("Protocol mismatch: sent tag {expected}, peer answered with tag {actual}")]
    UnexpectedResponse { expected: u32, actual: u32 },

    #[error("Short transfer on {context}: expected {expected} bytes, moved {actual}")]
    ShortTransfer {
        context: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("{0} connection closed")]
    ConnectionClosed(Role),

    // Session errors
    #[error("Reward dimension changed within a run: expected {expected} objectives, got {actual}")]
    RewardDimension { expected: usize, actual: usize },

    // Network errors
    #[error("Could not bind port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("Network error: {0}")]
    Network(#[from] std::io::Error),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

impl GlueError {
    /// Whether this error means the byte stream can no longer be trusted.
    ///
    /// Everything except configuration problems falls in this family.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, GlueError::Config(_))
    }
}

/// Record integrity violations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum IntegrityError {
    #[error("{count} ints exceed the ceiling of {ceiling}")]
    TooManyInts { count: usize, ceiling: u32 },

    #[error("{count} doubles exceed the ceiling of {ceiling}")]
    TooManyDoubles { count: usize, ceiling: u32 },

    #[error("{count} chars exceed the ceiling of {ceiling}")]
    TooManyChars { count: usize, ceiling: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GlueError::CorruptStream {
            ints: 2_000_000,
            doubles: 0,
            chars: 1,
        };
        assert!(err.to_string().contains("2000000 ints"));
    }

    #[test]
    fn test_unexpected_response_display() {
        let err = GlueError::UnexpectedResponse {
            expected: 6,
            actual: 7,
        };
        assert!(err.to_string().contains("sent tag 6"));
        assert!(err.to_string().contains("tag 7"));
    }

    #[test]
    fn test_integrity_wraps() {
        let err: GlueError = IntegrityError::TooManyChars {
            count: 1_000_001,
            ceiling: 1_000_000,
        }
        .into();
        assert!(matches!(err, GlueError::Integrity(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_config_is_not_fatal() {
        assert!(!GlueError::Config("bad port".into()).is_fatal());
        assert!(GlueError::ConnectionClosed(Role::Agent).is_fatal());
    }
}
