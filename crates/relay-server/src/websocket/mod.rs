//! Tutor WebSocket connections.

pub mod connection;
pub mod handshake;
pub mod session;
