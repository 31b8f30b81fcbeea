//! Ordered send pipeline.
//!
//! Each connection has one outbound FIFO. A `send` appends under the queue
//! lock and observes the resulting length in the same critical section: only
//! the send that finds the queue previously empty starts a writer task, so at
//! most one writer ever runs per connection and frames reach the wire as the
//! exact concatenation of their bytes in call order.

use crate::connection::{Connection, PendingSend};
use crate::error::ServerError;
use bytes::Bytes;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

/// Appends a frame to the connection's outbound FIFO, starting the writer
/// task if none is in flight.
pub(crate) fn enqueue(conn: &Arc<Connection>, frame_bytes: Bytes) -> Result<(), ServerError> {
    if conn.is_closed() {
        return Err(ServerError::ConnectionClosed);
    }

    let start_writer = {
        let mut queue = conn.send_queue.lock();
        queue.push_back(PendingSend::new(frame_bytes));
        queue.len() == 1
    };

    if start_writer {
        tokio::spawn(drain(conn.clone()));
    }
    Ok(())
}

/// Writes queued frames until the FIFO drains.
///
/// The head frame stays queued until fully written, so a concurrent `send`
/// always observes a non-empty queue while a write is in flight. Writes may
/// complete partially; the head's cursor tracks progress across completions.
async fn drain(conn: Arc<Connection>) {
    loop {
        if conn.is_closed() {
            tracing::debug!(
                "[{}] connection closed, dropping {} queued send(s)",
                conn.peer_addr(),
                conn.queued_sends()
            );
            return;
        }

        // Snapshot the head's remaining bytes; cloning Bytes is cheap and the
        // queue lock must not be held across the write await.
        let chunk = {
            let queue = conn.send_queue.lock();
            match queue.front() {
                Some(head) => head.remaining_bytes(),
                None => return,
            }
        };

        let written = {
            let mut writer = conn.writer.lock().await;
            writer.write(&chunk).await
        };

        match written {
            Ok(0) => {
                tracing::debug!("[{}] write returned 0, peer gone", conn.peer_addr());
                conn.request_close();
                return;
            }
            Ok(n) => {
                let mut queue = conn.send_queue.lock();
                let head = queue
                    .front_mut()
                    .expect("head stays queued while its write is in flight");
                head.advance(n);
                if head.is_complete() {
                    queue.pop_front();
                    if queue.is_empty() {
                        // No write in flight until the next send.
                        return;
                    }
                }
            }
            Err(e) => {
                tracing::debug!("[{}] write failed: {}", conn.peer_addr(), e);
                conn.request_close();
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use framewire_protocol::Frame;
    use std::io;
    use std::pin::Pin;
    use std::sync::Mutex;
    use std::task::{Context, Poll};
    use std::time::Duration;
    use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};

    fn test_conn(writer: crate::connection::BoxedWriter) -> Arc<Connection> {
        Arc::new(Connection::new(
            1,
            "127.0.0.1:0".parse().unwrap(),
            writer,
            1024,
        ))
    }

    fn frame_bytes(id: u16, body: &'static [u8]) -> Bytes {
        Frame::new(id, Bytes::from_static(body))
            .encode()
            .unwrap()
            .freeze()
    }

    async fn read_exactly<R: AsyncRead + Unpin>(rx: &mut R, n: usize) -> Vec<u8> {
        let mut out = vec![0u8; n];
        rx.read_exact(&mut out).await.unwrap();
        out
    }

    #[tokio::test]
    async fn test_single_send_reaches_wire() {
        let (mut rx, tx) = tokio::io::duplex(1024);
        let conn = test_conn(Box::new(tx));

        let bytes = frame_bytes(1, b"hello");
        enqueue(&conn, bytes.clone()).unwrap();

        let observed = read_exactly(&mut rx, bytes.len()).await;
        assert_eq!(observed, bytes.as_ref());
    }

    #[tokio::test]
    async fn test_many_sends_concatenate_in_call_order() {
        // Tiny duplex buffer forces the writer through many partial writes.
        let (mut rx, tx) = tokio::io::duplex(7);
        let conn = test_conn(Box::new(tx));

        let mut expected = Vec::new();
        for i in 0u16..20 {
            let frame = Frame::new(i + 10, Bytes::from(vec![i as u8; 33]));
            let bytes = frame.encode().unwrap().freeze();
            expected.extend_from_slice(&bytes);
            enqueue(&conn, bytes).unwrap();
        }

        let observed = read_exactly(&mut rx, expected.len()).await;
        assert_eq!(observed, expected);
        assert_eq!(conn.queued_sends(), 0);
    }

    /// Writer that accepts at most `max_per_write` bytes per call, recording
    /// everything it was given.
    struct TrickleWriter {
        sink: Arc<Mutex<Vec<u8>>>,
        max_per_write: usize,
    }

    impl AsyncWrite for TrickleWriter {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            let n = buf.len().min(self.max_per_write);
            self.sink.lock().unwrap().extend_from_slice(&buf[..n]);
            Poll::Ready(Ok(n))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_partial_writes_advance_cursor() {
        let sink = Arc::new(Mutex::new(Vec::new()));
        let writer = TrickleWriter {
            sink: sink.clone(),
            max_per_write: 3,
        };
        let conn = test_conn(Box::new(writer));

        let first = frame_bytes(5, b"0123456789");
        let second = frame_bytes(6, b"abcdefghij");
        enqueue(&conn, first.clone()).unwrap();
        enqueue(&conn, second.clone()).unwrap();

        // Wait for the writer task to drain the queue.
        for _ in 0..100 {
            if conn.queued_sends() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let mut expected = first.to_vec();
        expected.extend_from_slice(&second);
        assert_eq!(*sink.lock().unwrap(), expected);
    }

    #[tokio::test]
    async fn test_enqueue_on_closed_connection_fails() {
        let (_rx, tx) = tokio::io::duplex(64);
        let conn = test_conn(Box::new(tx));
        conn.mark_closed();

        let result = enqueue(&conn, frame_bytes(1, b"x"));
        assert!(matches!(result, Err(ServerError::ConnectionClosed)));
    }
}
