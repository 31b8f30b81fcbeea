//! Protocol error types.

use thiserror::Error;

/// Errors that can occur while framing or translating messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("invalid frame length prefix: {0} (below header size)")]
    InvalidLength(u16),

    #[error("unknown message id: {0}")]
    UnknownMessageId(u16),

    #[error("malformed body for message id {message_id}: {reason}")]
    MalformedBody { message_id: u16, reason: String },
}

impl ProtocolError {
    /// Returns whether decoding can continue with the next buffered frame.
    ///
    /// Frame boundaries stay intact for codec-level failures (the framing
    /// layer already consumed the frame), so the read cursor never
    /// desynchronizes. Framing-level failures mean the byte stream itself
    /// cannot be trusted.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ProtocolError::UnknownMessageId(_) | ProtocolError::MalformedBody { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_errors() {
        assert!(ProtocolError::UnknownMessageId(7).is_recoverable());
        assert!(ProtocolError::MalformedBody {
            message_id: 3,
            reason: "truncated".to_string(),
        }
        .is_recoverable());

        assert!(!ProtocolError::InvalidLength(1).is_recoverable());
        assert!(!ProtocolError::FrameTooLarge { size: 70000, max: 65535 }.is_recoverable());
    }

    #[test]
    fn test_error_display() {
        let err = ProtocolError::UnknownMessageId(42);
        assert!(err.to_string().contains("42"));

        let err = ProtocolError::FrameTooLarge { size: 100, max: 50 };
        assert!(err.to_string().contains("100"));

        let err = ProtocolError::InvalidLength(2);
        assert!(err.to_string().contains("2"));
    }
}
