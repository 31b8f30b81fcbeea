//! Async TCP client.
//!
//! The client splits the stream: reads go through a [`ByteBuffer`] that
//! reassembles length-prefixed frames across arbitrary TCP segmentation,
//! writes go straight to the socket under a writer lock.

use crate::error::ClientError;
use bytes::Bytes;
use framewire_protocol::{
    encode_message, ByteBuffer, Frame, MessageCodec, MSG_PING, MSG_PONG,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

/// Default read buffer size (8 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server address.
    pub addr: SocketAddr,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Timeout for a single receive call.
    pub read_timeout: Duration,
    /// Read buffer capacity; bounds the largest receivable message.
    pub read_buffer_size: usize,
}

impl ClientConfig {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }
}

struct ReadState {
    reader: OwnedReadHalf,
    buffer: ByteBuffer,
    scratch: Vec<u8>,
}

/// TCP message client, generic over the injected message codec.
pub struct Client<C: MessageCodec> {
    config: ClientConfig,
    codec: Arc<C>,
    read: Mutex<ReadState>,
    writer: Mutex<OwnedWriteHalf>,
}

impl<C: MessageCodec> Client<C> {
    /// Connects to the server.
    pub async fn connect(config: ClientConfig, codec: C) -> Result<Self, ClientError> {
        let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(config.addr))
            .await
            .map_err(|_| ClientError::Timeout)??;
        stream.set_nodelay(true).ok();
        tracing::debug!("Connected to {}", config.addr);

        let (reader, writer) = stream.into_split();
        let read = ReadState {
            reader,
            buffer: ByteBuffer::new(config.read_buffer_size),
            scratch: vec![0u8; config.read_buffer_size],
        };

        Ok(Self {
            config,
            codec: Arc::new(codec),
            read: Mutex::new(read),
            writer: Mutex::new(writer),
        })
    }

    /// Returns the client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Encodes and sends a message.
    pub async fn send(&self, message: &C::Message) -> Result<(), ClientError> {
        let bytes = encode_message(self.codec.as_ref(), message)?;
        self.write_all(&bytes).await
    }

    /// Sends a raw frame.
    pub async fn send_frame(&self, frame: &Frame) -> Result<(), ClientError> {
        let bytes = frame.encode()?;
        self.write_all(&bytes).await
    }

    async fn write_all(&self, bytes: &[u8]) -> Result<(), ClientError> {
        let mut writer = self.writer.lock().await;
        writer.write_all(bytes).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Receives the next application message, decoding it through the codec.
    /// Ping and pong frames are consumed silently.
    pub async fn recv(&self) -> Result<C::Message, ClientError> {
        loop {
            let frame = self.recv_frame().await?;
            match frame.message_id {
                MSG_PING | MSG_PONG => {
                    tracing::debug!("skipping liveness frame (id {})", frame.message_id);
                }
                id => return Ok(self.codec.decode(id, &frame.body)?),
            }
        }
    }

    /// Receives the next raw frame, liveness frames included.
    pub async fn recv_frame(&self) -> Result<Frame, ClientError> {
        let mut state = self.read.lock().await;
        tokio::time::timeout(self.config.read_timeout, read_frame(&mut state))
            .await
            .map_err(|_| ClientError::Timeout)?
    }

    /// Sends a ping and waits for the matching pong. Frames arriving in
    /// between are discarded.
    pub async fn ping(&self) -> Result<(), ClientError> {
        self.send_frame(&Frame::new(MSG_PING, Bytes::new())).await?;
        loop {
            let frame = self.recv_frame().await?;
            if frame.message_id == MSG_PONG {
                return Ok(());
            }
            tracing::debug!(
                "discarding frame (id {}) while waiting for pong",
                frame.message_id
            );
        }
    }

    /// Shuts the write side down, signalling EOF to the server.
    pub async fn close(&self) -> Result<(), ClientError> {
        self.writer.lock().await.shutdown().await?;
        Ok(())
    }
}

/// Reads socket bytes until the buffer holds one complete frame.
async fn read_frame(state: &mut ReadState) -> Result<Frame, ClientError> {
    loop {
        if let Some(frame) = Frame::decode(&mut state.buffer)? {
            state.buffer.compact();
            return Ok(frame);
        }

        if state.buffer.remaining() == 0 {
            state.buffer.compact();
        }
        let want = state.buffer.remaining();
        if want == 0 {
            return Err(ClientError::BufferFull(state.buffer.capacity()));
        }

        let n = state.reader.read(&mut state.scratch[..want]).await?;
        if n == 0 {
            return Err(ClientError::ConnectionClosed);
        }
        state.buffer.write(&state.scratch[..n]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use framewire_protocol::ProtocolError;
    use tokio::net::TcpListener;

    struct TextCodec;

    impl MessageCodec for TextCodec {
        type Message = String;

        fn encode(&self, message: &String) -> Result<(u16, Bytes), ProtocolError> {
            Ok((7, Bytes::from(message.clone().into_bytes())))
        }

        fn decode(&self, message_id: u16, body: &[u8]) -> Result<String, ProtocolError> {
            String::from_utf8(body.to_vec()).map_err(|_| ProtocolError::MalformedBody {
                message_id,
                reason: "invalid utf-8".to_string(),
            })
        }
    }

    async fn connect_to(addr: SocketAddr) -> Client<TextCodec> {
        let config = ClientConfig::new(addr).with_read_timeout(Duration::from_secs(2));
        Client::connect(config, TextCodec).await.unwrap()
    }

    /// Accepts one connection and echoes every frame back verbatim,
    /// one byte at a time to exercise reassembly on the client side.
    async fn echo_once(listener: TcpListener) {
        let (mut stream, _) = listener.accept().await.unwrap();
        loop {
            let mut header = [0u8; 4];
            if stream.read_exact(&mut header).await.is_err() {
                return;
            }
            let total = u16::from_le_bytes([header[0], header[1]]) as usize;
            let mut body = vec![0u8; total - 4];
            stream.read_exact(&mut body).await.unwrap();

            for byte in header.iter().chain(body.iter()) {
                stream.write_all(&[*byte]).await.unwrap();
                stream.flush().await.unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_send_recv_roundtrip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(echo_once(listener));

        let client = connect_to(addr).await;
        client.send(&"hello framewire".to_string()).await.unwrap();
        assert_eq!(client.recv().await.unwrap(), "hello framewire");

        client.send(&"second".to_string()).await.unwrap();
        client.send(&"third".to_string()).await.unwrap();
        assert_eq!(client.recv().await.unwrap(), "second");
        assert_eq!(client.recv().await.unwrap(), "third");
    }

    #[tokio::test]
    async fn test_ping_pong() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut frame = [0u8; 4];
            stream.read_exact(&mut frame).await.unwrap();
            assert_eq!(frame, [0x04, 0x00, 0x01, 0x00]);
            stream.write_all(&[0x04, 0x00, 0x02, 0x00]).await.unwrap();
        });

        let client = connect_to(addr).await;
        client.ping().await.unwrap();
    }

    #[tokio::test]
    async fn test_recv_times_out_on_silent_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
        });

        let config = ClientConfig::new(addr).with_read_timeout(Duration::from_millis(100));
        let client = Client::connect(config, TextCodec).await.unwrap();
        assert!(matches!(client.recv().await, Err(ClientError::Timeout)));
    }

    #[tokio::test]
    async fn test_recv_reports_closed_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
        });

        let client = connect_to(addr).await;
        assert!(matches!(
            client.recv().await,
            Err(ClientError::ConnectionClosed)
        ));
    }
}
