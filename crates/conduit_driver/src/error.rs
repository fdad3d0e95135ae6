//! Driver Error Types

use thiserror::Error;

/// Errors from the capture backend
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("Transport error: {0}")]
    Protocol(#[from] conduit_protocol::ProtocolError),

    #[error("Unsupported capture format: {0}")]
    UnsupportedFormat(String),

    #[error("Capture service already running")]
    AlreadyRunning,

    #[error("Capture thread failed to start: {0}")]
    ThreadSpawn(String),
}

/// Result type alias for driver operations
pub type DriverResult<T> = Result<T, DriverError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DriverError::UnsupportedFormat("96000 Hz".into());
        assert!(err.to_string().contains("96000"));
    }

    #[test]
    fn test_error_from_protocol() {
        let err: DriverError = conduit_protocol::ProtocolError::RegionNotFound.into();
        assert!(matches!(err, DriverError::Protocol(_)));
    }
}
