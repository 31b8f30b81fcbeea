//! Application message codec trait.
//!
//! The transport is payload-agnostic: it carries (message id, body bytes)
//! frames and delegates translation to an injected [`MessageCodec`]. The
//! server and client are generic over the codec, so one deployment can speak
//! protobuf while another speaks JSON without touching the transport.

use crate::error::ProtocolError;
use crate::frame::Frame;
use bytes::{Bytes, BytesMut};

/// Translates between application message objects and raw frame bodies.
pub trait MessageCodec: Send + Sync + 'static {
    /// The application message type carried over the wire.
    type Message: Send + Sync + 'static;

    /// Encodes a message into its id and body bytes.
    fn encode(&self, message: &Self::Message) -> Result<(u16, Bytes), ProtocolError>;

    /// Decodes a message from its id and body bytes.
    ///
    /// Returns [`ProtocolError::UnknownMessageId`] for ids the codec does not
    /// recognize and [`ProtocolError::MalformedBody`] when the body cannot be
    /// parsed; both leave frame boundaries intact for the caller.
    fn decode(&self, message_id: u16, body: &[u8]) -> Result<Self::Message, ProtocolError>;
}

/// Encodes a message straight to its wire frame bytes.
pub fn encode_message<C: MessageCodec>(
    codec: &C,
    message: &C::Message,
) -> Result<BytesMut, ProtocolError> {
    let (message_id, body) = codec.encode(message)?;
    Frame::new(message_id, body).encode()
}
