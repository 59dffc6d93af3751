//! # relay-server
//!
//! One relay process instance:
//!
//! - Tutor `WebSocket` listener: handshake validation, heartbeat, outbound queue
//! - Instance-local tutor registry
//! - Connection bridge: ties each socket's lifecycle to relay handlers
//! - Control-plane HTTP API: `/message`, `/disconnect`, `/tutors`, `/health`, `/metrics`
//! - Graceful shutdown via `CancellationToken`
//!
//! ## Crate Position
//!
//! Depends on relay-core, relay-settings and relay-pubsub. Depended on by relay-agent.

#![deny(unsafe_code)]

pub mod bridge;
pub mod control;
pub mod health;
pub mod metrics;
pub mod registry;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use server::{RelayServer, ServerError, ServerHandle};
