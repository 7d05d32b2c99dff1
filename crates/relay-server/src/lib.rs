//! # relay-server
//!
//! Real-time push distribution over two transport contracts:
//!
//! - **Broadcast** (`GET /ws`): every inbound chat message is fanned out to
//!   all connected clients by the [`hub::BroadcastHub`].
//! - **Stream** (`GET /sse-stream`, `GET /stream-ws`): each connection gets
//!   its own generated event sequence, driven by the
//!   [`stream::StreamSessionManager`].
//!
//! Both share one [`registry::ConnectionRegistry`].

#![deny(unsafe_code)]

pub mod config;
pub mod connection;
pub mod generator;
pub mod health;
pub mod hub;
pub mod metrics;
pub mod registry;
pub mod server;
pub mod shutdown;
pub mod sse;
pub mod stream;
pub mod websocket;

pub use config::ServerConfig;
pub use server::RelayServer;
