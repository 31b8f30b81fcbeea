//! framewire - demo message server
//!
//! A small game-style server: clients send JSON-encoded `Move` messages, the
//! server nudges the coordinates and sends the move back. Ping/pong liveness
//! is built into the transport.

use bytes::Bytes;
use framewire_protocol::{MessageCodec, ProtocolError};
use framewire_server::{Config, Server, ServerConfig};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Message id for [`Move`].
const MSG_MOVE: u16 = 3;

/// A player movement update.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Move {
    x: i32,
    y: i32,
}

/// JSON codec for the demo message set.
struct DemoCodec;

impl MessageCodec for DemoCodec {
    type Message = Move;

    fn encode(&self, message: &Move) -> Result<(u16, Bytes), ProtocolError> {
        let body = serde_json::to_vec(message).map_err(|e| ProtocolError::MalformedBody {
            message_id: MSG_MOVE,
            reason: e.to_string(),
        })?;
        Ok((MSG_MOVE, Bytes::from(body)))
    }

    fn decode(&self, message_id: u16, body: &[u8]) -> Result<Move, ProtocolError> {
        if message_id != MSG_MOVE {
            return Err(ProtocolError::UnknownMessageId(message_id));
        }
        serde_json::from_slice(body).map_err(|e| ProtocolError::MalformedBody {
            message_id,
            reason: e.to_string(),
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration (from file if FRAMEWIRE_CONFIG is set, then env overrides)
    let config = match Config::load() {
        Ok(c) => {
            if let Ok(path) = std::env::var("FRAMEWIRE_CONFIG") {
                tracing::info!("Loaded config from {}", path);
            }
            c
        }
        Err(e) => {
            // If a config file was explicitly specified, fail on error
            if std::env::var("FRAMEWIRE_CONFIG").is_ok() {
                tracing::error!("Failed to load config: {}", e);
                return Err(e.into());
            }
            tracing::info!("Using default configuration");
            Config::default()
        }
    };

    tracing::info!("Starting framewire server");
    tracing::info!("  Bind address: {}", config.network.bind_addr);
    tracing::info!("  Poll interval: {:?}", config.network.poll_interval());
    tracing::info!("  Heartbeat timeout: {:?}", config.network.heartbeat_timeout());
    tracing::info!("  Receive buffer: {} bytes", config.network.recv_buffer_bytes);
    tracing::info!("  Max connections: {}", config.network.max_connections);

    let server = Arc::new(Server::new(
        ServerConfig::from(&config.network),
        DemoCodec,
    ));

    server.register(
        MSG_MOVE,
        Arc::new(|handle, message: &Move| {
            tracing::info!("[{}] move {} {}", handle.peer_addr(), message.x, message.y);
            let reply = Move {
                x: message.x + 100,
                y: 9_999_999,
            };
            if let Err(e) = handle.send(&reply) {
                tracing::warn!("[{}] reply not sent: {}", handle.peer_addr(), e);
            }
        }),
    );

    server.run().await?;
    Ok(())
}
