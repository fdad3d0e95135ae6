//! Host Error Types

use thiserror::Error;

/// Errors from the producer side of the transport
#[derive(Error, Debug)]
pub enum HostError {
    #[error("Stream configuration error: {0}")]
    ConfigError(String),

    #[error("Transport error: {0}")]
    Protocol(#[from] conduit_protocol::ProtocolError),

    #[error("No monitor output device available")]
    NoDevice,

    #[error("Failed to build audio stream: {0}")]
    StreamBuildError(String),

    #[error("Failed to play audio stream: {0}")]
    StreamPlayError(String),
}

/// Result type alias for host operations
pub type HostResult<T> = Result<T, HostError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = HostError::ConfigError("bad buffer".into());
        assert!(err.to_string().contains("bad buffer"));
    }

    #[test]
    fn test_error_from_protocol() {
        let proto = conduit_protocol::ProtocolError::RegionNotFound;
        let host: HostError = proto.into();
        assert!(matches!(host, HostError::Protocol(_)));
    }
}
