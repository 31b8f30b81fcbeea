//! Server error types.

use thiserror::Error;

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] framewire_protocol::ProtocolError),

    #[error("config error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("message exceeds receive buffer capacity ({0} bytes)")]
    ReceiveBufferFull(usize),
}
