//! Length-prefixed binary framing.
//!
//! Frame layout (little-endian, 4 byte header + body):
//!
//! ```text
//! +--------------+------------+------------------------+
//! | total_length | message_id | body                   |
//! |   2 bytes    |  2 bytes   | total_length - 4 bytes |
//! +--------------+------------+------------------------+
//! ```
//!
//! `total_length` counts itself, the message id, and the body.

use crate::buffer::ByteBuffer;
use crate::error::ProtocolError;
use crate::{FRAME_HEADER_SIZE, MAX_FRAME_SIZE};
use bytes::{BufMut, Bytes, BytesMut};

/// One protocol unit: a message id plus its raw body bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Application message id. Ids 1 and 2 are reserved for ping/pong.
    pub message_id: u16,
    /// Raw body bytes, interpreted by the injected message codec.
    pub body: Bytes,
}

impl Frame {
    /// Creates a frame with the given id and body.
    pub fn new(message_id: u16, body: Bytes) -> Self {
        Self { message_id, body }
    }

    /// Returns the size of this frame on the wire.
    pub fn encoded_len(&self) -> usize {
        FRAME_HEADER_SIZE + self.body.len()
    }

    /// Encodes the frame into its wire representation.
    pub fn encode(&self) -> Result<BytesMut, ProtocolError> {
        let total = self.encoded_len();
        if total > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: total,
                max: MAX_FRAME_SIZE,
            });
        }

        let mut buf = BytesMut::with_capacity(total);
        buf.put_u16_le(total as u16);
        buf.put_u16_le(self.message_id);
        buf.put_slice(&self.body);
        Ok(buf)
    }

    /// Decodes one complete frame from the buffer.
    ///
    /// Returns `Ok(Some(frame))` if a complete frame was consumed,
    /// `Ok(None)` if more bytes are needed (nothing is consumed, the length
    /// prefix stays buffered for the next read), or `Err` if the declared
    /// length cannot hold the header itself.
    pub fn decode(buf: &mut ByteBuffer) -> Result<Option<Self>, ProtocolError> {
        // Length prefix not fully received yet.
        let Some(total) = buf.peek_u16_le(0) else {
            return Ok(None);
        };
        let total = total as usize;

        if total < FRAME_HEADER_SIZE {
            return Err(ProtocolError::InvalidLength(total as u16));
        }

        // Wait for the rest of the frame; the prefix stays unconsumed.
        if buf.len() < total {
            return Ok(None);
        }

        buf.advance_read(2);
        let readable = buf.readable();
        let message_id = u16::from_le_bytes([readable[0], readable[1]]);
        buf.advance_read(2);

        let body_len = total - FRAME_HEADER_SIZE;
        let body = Bytes::copy_from_slice(&buf.readable()[..body_len]);
        buf.advance_read(body_len);

        Ok(Some(Self { message_id, body }))
    }
}
