//! Error types for the cache layer

use std::time::Duration;

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the cache layer
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Compression Errors
    // =========================================================================
    /// Compression failed
    #[error("Compression with {algorithm} failed: {reason}")]
    Compression { algorithm: String, reason: String },

    /// Decompression failed
    #[error("Decompression with {algorithm} failed: {reason}")]
    Decompression { algorithm: String, reason: String },

    /// Payload exceeds the configured maximum size
    #[error("Payload of {size} bytes exceeds maximum compressible size of {max} bytes")]
    PayloadTooLarge { size: usize, max: usize },

    /// Algorithm is unknown or not available in this build
    #[error("Unsupported compression algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Checksum mismatch after decompression
    #[error("Integrity check failed: expected checksum {expected}, got {actual}")]
    Integrity { expected: String, actual: String },

    /// Declared chunk count differs from the expected one
    #[error("Chunk count mismatch: expected {expected}, header declares {actual}")]
    ChunkMismatch { expected: u32, actual: u32 },

    /// Stored payload could not be parsed
    #[error("Corrupt payload: {0}")]
    CorruptPayload(String),

    // =========================================================================
    // Cluster / Store Errors
    // =========================================================================
    /// Target shard is offline and no failover path exists
    #[error("Shard {shard_id} is unavailable")]
    ShardUnavailable { shard_id: u32 },

    /// Backing-store or data-source call exceeded its deadline
    #[error("Operation '{operation}' timed out after {timeout:?}")]
    Timeout { operation: String, timeout: Duration },

    /// Backing store error
    #[error("Backing store error: {0}")]
    Store(String),

    /// Data source error
    #[error("Data source error: {0}")]
    DataSource(String),

    // =========================================================================
    // Ambient Errors
    // =========================================================================
    /// Value (de)serialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the condition is transient and worth retrying with backoff
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ShardUnavailable { .. } | Error::Timeout { .. } | Error::Store(_)
        )
    }

    /// Whether automatic failover may convert this error into a miss/`false`
    pub fn is_failover_eligible(&self) -> bool {
        matches!(self, Error::ShardUnavailable { .. } | Error::Timeout { .. })
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::ShardUnavailable { shard_id: 1 }.is_retryable());
        assert!(Error::Store("down".into()).is_retryable());
        assert!(Error::Timeout {
            operation: "get".into(),
            timeout: Duration::from_millis(10),
        }
        .is_retryable());
        assert!(!Error::Integrity {
            expected: "a".into(),
            actual: "b".into(),
        }
        .is_retryable());
    }

    #[test]
    fn test_failover_eligibility() {
        assert!(Error::ShardUnavailable { shard_id: 0 }.is_failover_eligible());
        assert!(!Error::Store("x".into()).is_failover_eligible());
        assert!(!Error::ChunkMismatch {
            expected: 2,
            actual: 3
        }
        .is_failover_eligible());
    }

    #[test]
    fn test_display() {
        let err = Error::ChunkMismatch {
            expected: 2,
            actual: 5,
        };
        assert_eq!(
            err.to_string(),
            "Chunk count mismatch: expected 2, header declares 5"
        );
    }
}
