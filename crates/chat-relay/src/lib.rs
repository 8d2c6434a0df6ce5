//! Chat channel connection management.
//!
//! This crate provides:
//! - An abstract `Transport` over the duplex frame channel
//! - A WebSocket transport and an in-memory loopback transport
//! - Local structural validation of the auth credential before any network
//!   round trip
//! - The session state machine with health classification
//! - Automatic reconnection with bounded exponential backoff

mod config;
mod credential;
mod error;
mod manager;
mod session;
mod transport;
mod ws;

pub use config::RelayConfig;
pub use credential::{validate_token, TokenClaims};
pub use error::{RelayError, RelayResult};
pub use manager::{backoff_delay, ConnectionManager, FrameLink};
pub use session::{ConnectionHealth, ConnectionState, Session};
pub use transport::{InMemoryTransport, ServerSide, Transport, TransportChannel};
pub use ws::WsTransport;
