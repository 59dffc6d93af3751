//! # relay-pubsub
//!
//! Cross-instance message plumbing:
//!
//! - [`transport::ChannelTransport`]: publish/subscribe facade over a shared store
//! - [`memory::MemoryHub`]: in-process store, one [`memory::MemoryTransport`] per instance
//! - `redis::RedisTransport` (feature `redis`): Redis `PUBLISH`/`SUBSCRIBE`
//! - [`relay::Relay`]: encodes outbound envelopes and routes inbound ones to
//!   handlers keyed by `(topic, type)`
//!
//! ## Crate Position
//!
//! Depends on relay-core. Depended on by relay-server.

#![deny(unsafe_code)]

pub mod memory;
pub mod metrics;
#[cfg(feature = "redis")]
pub mod redis;
pub mod relay;
pub mod transport;

pub use memory::{MemoryHub, MemoryTransport};
pub use relay::{HandlerGuard, PublishPolicy, Relay, RelayError};
pub use transport::{ChannelTransport, InboundMessage, TransportError};
