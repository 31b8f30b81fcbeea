//! # framewire-protocol
//!
//! Wire protocol implementation for framewire.
//!
//! This crate provides:
//! - A fixed-capacity byte buffer with read/write cursors and compaction
//! - Length-prefixed binary framing (little-endian length + message id + body)
//! - The [`MessageCodec`] trait injected by applications to translate between
//!   raw frame bodies and message objects
//! - Protocol error types and constants

pub mod buffer;
pub mod codec;
pub mod error;
pub mod frame;

pub use buffer::ByteBuffer;
pub use codec::{encode_message, MessageCodec};
pub use error::ProtocolError;
pub use frame::Frame;

/// Size of the frame header in bytes: u16 total length + u16 message id.
pub const FRAME_HEADER_SIZE: usize = 4;

/// Maximum encoded frame size. The length prefix is a u16 and counts itself,
/// so no frame can exceed this on the wire.
pub const MAX_FRAME_SIZE: usize = u16::MAX as usize;

/// Default port for framewire servers.
pub const DEFAULT_PORT: u16 = 8888;

/// Reserved message id for the zero-body liveness ping.
pub const MSG_PING: u16 = 1;

/// Reserved message id for the zero-body liveness pong.
pub const MSG_PONG: u16 = 2;
