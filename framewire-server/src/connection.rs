//! Per-connection state and the handler-facing sender capability.

use crate::error::ServerError;
use framewire_protocol::{encode_message, ByteBuffer, MessageCodec};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWrite;
use tokio::sync::Notify;

/// Identifies a live connection in the server's connection map.
pub type ConnectionId = u64;

pub(crate) type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// A frame queued for transmission: its wire bytes plus a progress cursor.
///
/// Lives in the connection's outbound FIFO from enqueue until every byte has
/// been written; FIFO order is the delivery order contract.
#[derive(Debug)]
pub(crate) struct PendingSend {
    bytes: Bytes,
    cursor: usize,
}

impl PendingSend {
    pub(crate) fn new(bytes: Bytes) -> Self {
        Self { bytes, cursor: 0 }
    }

    /// Returns the not-yet-written tail of the frame.
    pub(crate) fn remaining_bytes(&self) -> Bytes {
        self.bytes.slice(self.cursor..)
    }

    /// Advances the cursor by the number of bytes a write completed.
    pub(crate) fn advance(&mut self, n: usize) {
        self.cursor = (self.cursor + n).min(self.bytes.len());
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.cursor >= self.bytes.len()
    }
}

/// State for one client socket.
///
/// The receive buffer is mutated only by the connection's read task; the
/// outbound FIFO is the one resource shared with the writer task and is
/// guarded by a single lock so enqueue and the emptiness check are atomic.
pub struct Connection {
    id: ConnectionId,
    peer_addr: SocketAddr,
    pub(crate) recv: Mutex<ByteBuffer>,
    pub(crate) send_queue: Mutex<VecDeque<PendingSend>>,
    pub(crate) writer: tokio::sync::Mutex<BoxedWriter>,
    last_heartbeat: Mutex<Instant>,
    closed: AtomicBool,
    pub(crate) close_notify: Notify,
}

impl Connection {
    pub(crate) fn new(
        id: ConnectionId,
        peer_addr: SocketAddr,
        writer: BoxedWriter,
        recv_capacity: usize,
    ) -> Self {
        Self {
            id,
            peer_addr,
            recv: Mutex::new(ByteBuffer::new(recv_capacity)),
            send_queue: Mutex::new(VecDeque::new()),
            writer: tokio::sync::Mutex::new(writer),
            last_heartbeat: Mutex::new(Instant::now()),
            closed: AtomicBool::new(false),
            close_notify: Notify::new(),
        }
    }

    /// Returns the connection id.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns the peer's socket address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Returns whether the connection has been torn down.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Marks the connection closed. Returns `true` only for the first caller;
    /// concurrent closers (a read error racing the heartbeat sweep) see `false`
    /// and must not tear down again.
    pub(crate) fn mark_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::SeqCst)
    }

    /// Asks the connection's read task to shut the connection down. The
    /// notify permit is stored, so the request is not lost if the task is
    /// mid-read.
    pub(crate) fn request_close(&self) {
        self.close_notify.notify_one();
    }

    /// Records liveness now. Called on accept and on every ping received.
    pub fn touch_heartbeat(&self) {
        *self.last_heartbeat.lock() = Instant::now();
    }

    /// Returns the time since the last heartbeat.
    pub fn idle_for(&self) -> Duration {
        self.last_heartbeat.lock().elapsed()
    }

    /// Returns the number of frames awaiting transmission.
    pub fn queued_sends(&self) -> usize {
        self.send_queue.lock().len()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Narrow sender capability handed to message handlers.
///
/// Handlers can reply on the originating connection without holding a
/// reference back to the server.
pub struct ConnectionHandle<C: MessageCodec> {
    pub(crate) connection: Arc<Connection>,
    pub(crate) codec: Arc<C>,
}

impl<C: MessageCodec> Clone for ConnectionHandle<C> {
    fn clone(&self) -> Self {
        Self {
            connection: self.connection.clone(),
            codec: self.codec.clone(),
        }
    }
}

impl<C: MessageCodec> ConnectionHandle<C> {
    /// Returns the connection id.
    pub fn id(&self) -> ConnectionId {
        self.connection.id()
    }

    /// Returns the peer's socket address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.connection.peer_addr()
    }

    /// Enqueues a message for ordered asynchronous delivery on this
    /// connection.
    pub fn send(&self, message: &C::Message) -> Result<(), ServerError> {
        let frame_bytes = encode_message(self.codec.as_ref(), message)?;
        crate::pipeline::enqueue(&self.connection, frame_bytes.freeze())
    }

    /// Requests that the connection be closed. Teardown (pre-close hook,
    /// socket shutdown, map removal) runs on the connection's read task.
    pub fn close(&self) {
        self.connection.request_close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_send_cursor() {
        let mut pending = PendingSend::new(Bytes::from_static(b"abcdef"));
        assert!(!pending.is_complete());
        assert_eq!(pending.remaining_bytes().as_ref(), b"abcdef");

        pending.advance(4);
        assert_eq!(pending.remaining_bytes().as_ref(), b"ef");
        assert!(!pending.is_complete());

        pending.advance(2);
        assert!(pending.is_complete());
        assert!(pending.remaining_bytes().is_empty());
    }

    #[test]
    fn test_pending_send_advance_clamps() {
        let mut pending = PendingSend::new(Bytes::from_static(b"ab"));
        pending.advance(10);
        assert!(pending.is_complete());
    }

    #[tokio::test]
    async fn test_mark_closed_once() {
        let (_, tx) = tokio::io::duplex(64);
        let conn = Connection::new(1, "127.0.0.1:0".parse().unwrap(), Box::new(tx), 64);

        assert!(!conn.is_closed());
        assert!(conn.mark_closed());
        assert!(!conn.mark_closed());
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn test_heartbeat_touch() {
        let (_, tx) = tokio::io::duplex(64);
        let conn = Connection::new(1, "127.0.0.1:0".parse().unwrap(), Box::new(tx), 64);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(conn.idle_for() >= Duration::from_millis(20));

        conn.touch_heartbeat();
        assert!(conn.idle_for() < Duration::from_millis(20));
    }
}
