//! Protocol Error Types

use thiserror::Error;

/// Errors from the shared-memory transport layer
///
/// RegionNotFound is a *normal* condition for consumers (the producer
/// simply isn't running yet) and callers are expected to poll rather
/// than log it per attempt.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("shared region not found")]
    RegionNotFound,

    #[error("shared region too small: {actual} bytes mapped, {needed} needed")]
    RegionTooSmall { actual: usize, needed: usize },

    #[error("protocol version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("bad ring geometry: {0}")]
    BadGeometry(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("platform error: {0}")]
    Platform(String),
}

impl ProtocolError {
    /// Whether retrying the same attach later can possibly succeed.
    ///
    /// Version and geometry mismatches are latched by consumers; a
    /// missing region is polled for.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProtocolError::RegionNotFound | ProtocolError::Platform(_)
        )
    }
}

/// Result type alias for protocol operations
pub type ProtocolResult<T> = Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProtocolError::VersionMismatch {
            expected: 1,
            found: 2,
        };
        assert!(err.to_string().contains("expected 1"));
        assert!(err.to_string().contains("found 2"));

        let err = ProtocolError::RegionTooSmall {
            actual: 64,
            needed: 128,
        };
        assert!(err.to_string().contains("64"));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(ProtocolError::RegionNotFound.is_retryable());
        assert!(!ProtocolError::VersionMismatch {
            expected: 1,
            found: 2
        }
        .is_retryable());
        assert!(!ProtocolError::BadGeometry("zero frames".into()).is_retryable());
    }
}
