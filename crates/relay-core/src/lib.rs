//! # relay-core
//!
//! Foundation types shared by every relay crate:
//!
//! - **Identifiers**: [`ids::Uid`] (validated recipient id), [`ids::ConnectionId`],
//!   [`ids::InstanceId`]
//! - **Topics**: [`topic::Topic`] derivation for per-recipient and broadcast channels
//! - **Envelope**: [`envelope::Envelope`] codec for the `{type, payload: {data}}` wire shape
//! - **Logging**: [`logging::init_subscriber`] for the global `tracing` subscriber
//!
//! ## Crate Position
//!
//! Foundation crate. Depended on by all other relay crates.

#![deny(unsafe_code)]

pub mod envelope;
pub mod ids;
pub mod logging;
pub mod topic;

pub use envelope::{DISCONNECT, Envelope, EnvelopeError, MESSAGE};
pub use ids::{ConnectionId, InstanceId, Uid, UidError};
pub use logging::{LogFormat, init_subscriber};
pub use topic::Topic;
