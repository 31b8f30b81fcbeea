//! # framewire-client
//!
//! Client library for framewire.
//!
//! This crate provides:
//! - Async TCP client speaking the length-prefixed frame protocol
//! - Typed send/receive through an injected [`MessageCodec`]
//! - Built-in ping/pong liveness probe
//!
//! [`MessageCodec`]: framewire_protocol::MessageCodec

pub mod client;
pub mod error;

pub use client::{Client, ClientConfig};
pub use error::ClientError;
