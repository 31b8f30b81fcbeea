//! Client error types.

use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] framewire_protocol::ProtocolError),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("read timeout")]
    Timeout,

    #[error("message exceeds read buffer capacity ({0} bytes)")]
    BufferFull(usize),
}

impl ClientError {
    /// Returns whether retrying the operation on a fresh connection could
    /// succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::Io(_) | ClientError::Timeout | ClientError::ConnectionClosed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ClientError::Timeout.is_retryable());
        assert!(ClientError::ConnectionClosed.is_retryable());
        assert!(!ClientError::BufferFull(64).is_retryable());
        assert!(!ClientError::Protocol(
            framewire_protocol::ProtocolError::InvalidLength(2)
        )
        .is_retryable());
    }
}
