//! TCP server implementation.
//!
//! One task runs the accept/sweep loop; each connection gets a read task that
//! reassembles frames and dispatches decoded messages sequentially. Writes go
//! through the ordered send pipeline in [`crate::pipeline`].

use crate::config::NetworkConfig;
use crate::connection::{Connection, ConnectionHandle, ConnectionId};
use crate::error::ServerError;
use crate::pipeline;
use crate::registry::{Handler, HandlerRegistry};
use bytes::Bytes;
use dashmap::DashMap;
use framewire_protocol::{
    encode_message, Frame, MessageCodec, ProtocolError, MSG_PING, MSG_PONG,
};
use parking_lot::RwLock;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Poll interval for the accept/sweep loop.
    pub poll_interval: Duration,
    /// Connections idle longer than this are closed by the sweep. Detection
    /// latency is bounded by `heartbeat_timeout + poll_interval`.
    pub heartbeat_timeout: Duration,
    /// Per-connection receive buffer capacity, fixed at accept.
    pub recv_buffer_capacity: usize,
    /// Maximum concurrent connections.
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: format!("127.0.0.1:{}", framewire_protocol::DEFAULT_PORT)
                .parse()
                .unwrap(),
            poll_interval: Duration::from_millis(1000),
            heartbeat_timeout: Duration::from_secs(30),
            recv_buffer_capacity: 8 * 1024,
            max_connections: 1000,
        }
    }
}

impl ServerConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Default::default()
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = timeout;
        self
    }

    pub fn with_recv_buffer_capacity(mut self, capacity: usize) -> Self {
        self.recv_buffer_capacity = capacity;
        self
    }

    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }
}

impl From<&NetworkConfig> for ServerConfig {
    fn from(network: &NetworkConfig) -> Self {
        Self {
            bind_addr: network.bind_addr,
            poll_interval: network.poll_interval(),
            heartbeat_timeout: network.heartbeat_timeout(),
            recv_buffer_capacity: network.recv_buffer_bytes,
            max_connections: network.max_connections,
        }
    }
}

/// Server statistics.
#[derive(Debug, Default)]
pub struct ServerStats {
    pub connections_total: AtomicU64,
    pub connections_active: AtomicU64,
    pub frames_received: AtomicU64,
    pub errors_total: AtomicU64,
}

/// Extension point invoked once per connection just before teardown.
pub type CloseHook = Arc<dyn Fn(&Connection) + Send + Sync>;

/// State shared between the accept/sweep loop and connection tasks.
struct ServerContext<C: MessageCodec> {
    codec: Arc<C>,
    registry: Arc<HandlerRegistry<C>>,
    connections: Arc<DashMap<ConnectionId, Arc<Connection>>>,
    stats: Arc<ServerStats>,
    on_close: Arc<RwLock<Option<CloseHook>>>,
}

impl<C: MessageCodec> Clone for ServerContext<C> {
    fn clone(&self) -> Self {
        Self {
            codec: self.codec.clone(),
            registry: self.registry.clone(),
            connections: self.connections.clone(),
            stats: self.stats.clone(),
            on_close: self.on_close.clone(),
        }
    }
}

/// TCP message server, generic over the injected message codec.
pub struct Server<C: MessageCodec> {
    config: ServerConfig,
    ctx: ServerContext<C>,
    shutdown: broadcast::Sender<()>,
    running: AtomicBool,
    next_id: AtomicU64,
}

impl<C: MessageCodec> Server<C> {
    /// Creates a new server.
    pub fn new(config: ServerConfig, codec: C) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            ctx: ServerContext {
                codec: Arc::new(codec),
                registry: Arc::new(HandlerRegistry::new()),
                connections: Arc::new(DashMap::new()),
                stats: Arc::new(ServerStats::default()),
                on_close: Arc::new(RwLock::new(None)),
            },
            shutdown: shutdown_tx,
            running: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
        }
    }

    /// Returns the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Registers a handler for a message id. Handlers for one id run in
    /// registration order; registering the same handler twice is a no-op.
    pub fn register(&self, message_id: u16, handler: Handler<C>) {
        self.ctx.registry.register(message_id, handler);
    }

    /// Removes a previously registered handler. No-op if absent.
    pub fn unregister(&self, message_id: u16, handler: &Handler<C>) {
        self.ctx.registry.unregister(message_id, handler);
    }

    /// Sets the hook invoked once per connection just before teardown.
    pub fn set_close_hook(&self, hook: CloseHook) {
        *self.ctx.on_close.write() = Some(hook);
    }

    /// Looks up a live connection by id.
    pub fn connection(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.ctx.connections.get(&id).map(|entry| entry.value().clone())
    }

    /// Returns the number of live connections.
    pub fn connection_count(&self) -> usize {
        self.ctx.connections.len()
    }

    /// Returns a sender capability for the connection.
    pub fn handle(&self, connection: &Arc<Connection>) -> ConnectionHandle<C> {
        ConnectionHandle {
            connection: connection.clone(),
            codec: self.ctx.codec.clone(),
        }
    }

    /// Enqueues a message for ordered asynchronous delivery.
    pub fn send(&self, connection: &Arc<Connection>, message: &C::Message) -> Result<(), ServerError> {
        let frame_bytes = encode_message(self.ctx.codec.as_ref(), message)?;
        pipeline::enqueue(connection, frame_bytes.freeze())
    }

    /// Closes a connection. Safe to call more than once.
    pub fn close(&self, connection: &Arc<Connection>) {
        close_connection(&self.ctx, connection);
    }

    /// Returns server statistics.
    pub fn stats(&self) -> &ServerStats {
        &self.ctx.stats
    }

    /// Initiates server shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    /// Returns whether the serve loop is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Binds and serves forever. Bind failure is the only fatal startup
    /// condition.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serves on an already-bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        self.running.store(true, Ordering::SeqCst);
        tracing::info!("Server listening on {}", listener.local_addr()?);

        let mut shutdown_rx = self.shutdown.subscribe();
        let mut poll = tokio::time::interval(self.config.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                result = listener.accept() => match result {
                    Ok((stream, addr)) => self.accept_connection(stream, addr),
                    Err(e) => {
                        // Accept failures never stop the loop.
                        tracing::error!("Accept error: {}", e);
                        self.ctx.stats.errors_total.fetch_add(1, Ordering::Relaxed);
                    }
                },
                _ = poll.tick() => self.sweep_heartbeats(),
                _ = shutdown_rx.recv() => {
                    tracing::info!("Server shutting down");
                    break;
                }
            }
        }

        let live: Vec<_> = self
            .ctx
            .connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for conn in live {
            close_connection(&self.ctx, &conn);
        }
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn accept_connection(&self, stream: TcpStream, addr: SocketAddr) {
        if self.ctx.connections.len() >= self.config.max_connections {
            tracing::warn!("Connection limit reached, rejecting {}", addr);
            return;
        }

        stream.set_nodelay(true).ok();
        let (read_half, write_half) = stream.into_split();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let conn = Arc::new(Connection::new(
            id,
            addr,
            Box::new(write_half),
            self.config.recv_buffer_capacity,
        ));

        self.ctx.connections.insert(id, conn.clone());
        self.ctx.stats.connections_total.fetch_add(1, Ordering::Relaxed);
        self.ctx.stats.connections_active.fetch_add(1, Ordering::Relaxed);
        tracing::info!("Client connected: {} (id={})", addr, id);

        tokio::spawn(read_loop(self.ctx.clone(), conn, read_half));
    }

    /// Closes every connection whose heartbeat is older than the timeout.
    /// Runs once per poll tick.
    fn sweep_heartbeats(&self) {
        let timeout = self.config.heartbeat_timeout;
        let stale: Vec<Arc<Connection>> = self
            .ctx
            .connections
            .iter()
            .filter(|entry| entry.value().idle_for() > timeout)
            .map(|entry| entry.value().clone())
            .collect();

        for conn in stale {
            tracing::info!(
                "[{}] heartbeat timeout after {:?}, closing",
                conn.peer_addr(),
                timeout
            );
            close_connection(&self.ctx, &conn);
        }
    }
}

/// Reads socket bytes into the connection buffer and runs the decode/dispatch
/// cycle until the peer goes away or close is requested.
async fn read_loop<C: MessageCodec>(
    ctx: ServerContext<C>,
    conn: Arc<Connection>,
    mut reader: OwnedReadHalf,
) {
    let capacity = conn.recv.lock().capacity();
    let mut scratch = vec![0u8; capacity];

    loop {
        // Make room at the write cursor, compacting first. If compaction
        // frees nothing, the buffered message exceeds capacity.
        let want = {
            let mut recv = conn.recv.lock();
            if recv.remaining() == 0 {
                recv.compact();
            }
            recv.remaining()
        };
        if want == 0 {
            let err = ServerError::ReceiveBufferFull(capacity);
            tracing::warn!("[{}] {}, closing", conn.peer_addr(), err);
            ctx.stats.errors_total.fetch_add(1, Ordering::Relaxed);
            close_connection(&ctx, &conn);
            return;
        }

        let n = tokio::select! {
            biased;

            _ = conn.close_notify.notified() => {
                close_connection(&ctx, &conn);
                return;
            }

            result = reader.read(&mut scratch[..want]) => match result {
                Ok(0) => {
                    tracing::info!("[{}] connection closed by peer", conn.peer_addr());
                    close_connection(&ctx, &conn);
                    return;
                }
                Ok(n) => n,
                Err(e) => {
                    tracing::debug!("[{}] read error: {}", conn.peer_addr(), e);
                    ctx.stats.errors_total.fetch_add(1, Ordering::Relaxed);
                    close_connection(&ctx, &conn);
                    return;
                }
            }
        };

        if let Err(e) = process_frames(&ctx, &conn, &scratch[..n]) {
            tracing::warn!("[{}] protocol violation: {}, closing", conn.peer_addr(), e);
            ctx.stats.errors_total.fetch_add(1, Ordering::Relaxed);
            close_connection(&ctx, &conn);
            return;
        }
    }
}

/// Appends freshly-read bytes to the connection buffer, decodes every
/// complete frame in an explicit loop, dispatches each, and compacts the
/// buffer at the end of the pass.
fn process_frames<C: MessageCodec>(
    ctx: &ServerContext<C>,
    conn: &Arc<Connection>,
    bytes: &[u8],
) -> Result<(), ProtocolError> {
    let (frames, result) = {
        let mut recv = conn.recv.lock();
        let copied = recv.write(bytes);
        debug_assert_eq!(copied, bytes.len(), "read was capped at remaining space");

        let mut frames = Vec::new();
        let result = loop {
            match Frame::decode(&mut recv) {
                Ok(Some(frame)) => frames.push(frame),
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            }
        };
        recv.compact();
        (frames, result)
    };

    let handle = ConnectionHandle {
        connection: conn.clone(),
        codec: ctx.codec.clone(),
    };

    for frame in frames {
        ctx.stats.frames_received.fetch_add(1, Ordering::Relaxed);

        // Built-in liveness: ping refreshes the heartbeat and elicits a pong
        // before any registered handlers see the frame.
        if frame.message_id == MSG_PING {
            conn.touch_heartbeat();
            tracing::debug!("[{}] ping", conn.peer_addr());
            let pong = Frame::new(MSG_PONG, Bytes::new()).encode()?.freeze();
            if let Err(e) = pipeline::enqueue(conn, pong) {
                tracing::debug!("[{}] pong not sent: {}", conn.peer_addr(), e);
            }
            continue;
        }

        match ctx.codec.decode(frame.message_id, &frame.body) {
            Ok(message) => ctx.registry.dispatch(&handle, frame.message_id, &message),
            Err(e) if e.is_recoverable() => {
                // The framing layer already consumed the frame, so skipping
                // it keeps the read cursor in sync with the frames behind it.
                tracing::warn!(
                    "[{}] dropping frame (id {}): {}",
                    conn.peer_addr(),
                    frame.message_id,
                    e
                );
            }
            Err(e) => return Err(e),
        }
    }

    result
}

/// Tears a connection down: pre-close hook, socket shutdown, removal from the
/// live map. A read error and the heartbeat sweep may both land here for the
/// same connection; only the first caller acts.
fn close_connection<C: MessageCodec>(ctx: &ServerContext<C>, conn: &Arc<Connection>) {
    if !conn.mark_closed() {
        return;
    }

    let hook = ctx.on_close.read().clone();
    if let Some(hook) = hook {
        hook(conn);
    }

    // Wake the read task if it is parked on the socket.
    conn.request_close();

    // Shut the writer down off-thread; an in-flight write may hold the lock.
    let writer_conn = conn.clone();
    tokio::spawn(async move {
        use tokio::io::AsyncWriteExt;
        let _ = writer_conn.writer.lock().await.shutdown().await;
    });

    ctx.connections.remove(&conn.id());
    ctx.stats.connections_active.fetch_sub(1, Ordering::Relaxed);
    tracing::info!("Client disconnected: {} (id={})", conn.peer_addr(), conn.id());
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopCodec;

    impl MessageCodec for NoopCodec {
        type Message = ();

        fn encode(&self, _message: &()) -> Result<(u16, Bytes), ProtocolError> {
            Ok((100, Bytes::new()))
        }

        fn decode(&self, message_id: u16, _body: &[u8]) -> Result<(), ProtocolError> {
            if message_id == 100 {
                Ok(())
            } else {
                Err(ProtocolError::UnknownMessageId(message_id))
            }
        }
    }

    fn quick_config() -> ServerConfig {
        ServerConfig::new("127.0.0.1:0".parse().unwrap())
            .with_poll_interval(Duration::from_millis(20))
            .with_heartbeat_timeout(Duration::from_millis(150))
    }

    #[test]
    fn test_server_config_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr.port(), 8888);
        assert_eq!(config.poll_interval, Duration::from_millis(1000));
        assert_eq!(config.heartbeat_timeout, Duration::from_secs(30));
        assert_eq!(config.recv_buffer_capacity, 8192);
    }

    #[test]
    fn test_server_config_from_network_config() {
        let network = NetworkConfig::default();
        let config = ServerConfig::from(&network);
        assert_eq!(config.bind_addr, network.bind_addr);
        assert_eq!(config.poll_interval, Duration::from_millis(1000));
        assert_eq!(config.recv_buffer_capacity, 8192);
    }

    #[tokio::test]
    async fn test_accept_and_shutdown() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Arc::new(Server::new(quick_config(), NoopCodec));

        let serving = server.clone();
        let task = tokio::spawn(async move { serving.serve(listener).await });

        let _client = TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(server.is_running());
        assert_eq!(server.connection_count(), 1);
        assert_eq!(server.stats().connections_total.load(Ordering::Relaxed), 1);

        server.shutdown();
        task.await.unwrap().unwrap();
        assert!(!server.is_running());
        assert_eq!(server.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_sweep_closes_idle_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Arc::new(Server::new(quick_config(), NoopCodec));

        let serving = server.clone();
        tokio::spawn(async move { serving.serve(listener).await });

        let mut client = TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(server.connection_count(), 1);

        // Idle past heartbeat_timeout + poll_interval: the sweep closes it
        // and the client observes EOF.
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(server.connection_count(), 0);

        let mut buf = [0u8; 1];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(n, 0);

        server.shutdown();
    }

    #[tokio::test]
    async fn test_close_hook_runs_once() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Arc::new(Server::new(quick_config(), NoopCodec));

        let hook_calls = Arc::new(AtomicU64::new(0));
        {
            let hook_calls = hook_calls.clone();
            server.set_close_hook(Arc::new(move |_conn| {
                hook_calls.fetch_add(1, Ordering::SeqCst);
            }));
        }

        let serving = server.clone();
        tokio::spawn(async move { serving.serve(listener).await });

        let _client = TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let conn = server.connection(1).unwrap();
        // Close twice from this side, then let the sweep race a third time.
        server.close(&conn);
        server.close(&conn);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(hook_calls.load(Ordering::SeqCst), 1);
        assert_eq!(server.connection_count(), 0);

        server.shutdown();
    }
}
