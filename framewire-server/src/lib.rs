//! # framewire-server
//!
//! TCP server for framewire.
//!
//! This crate provides:
//! - An accept/sweep loop multiplexing new connections, a poll tick, and shutdown
//! - Per-connection frame reassembly from arbitrary TCP chunking
//! - A message-id handler registry with ordered multicast dispatch
//! - An ordered send pipeline guaranteeing in-order, fully-flushed delivery
//! - Heartbeat tracking with built-in ping/pong liveness
//! - YAML + environment configuration

pub mod config;
pub mod connection;
pub mod error;
pub mod registry;
pub mod server;

pub(crate) mod pipeline;

pub use config::{Config, ConfigError, NetworkConfig};
pub use connection::{Connection, ConnectionHandle, ConnectionId};
pub use error::ServerError;
pub use registry::{Handler, HandlerRegistry};
pub use server::{CloseHook, Server, ServerConfig, ServerStats};
