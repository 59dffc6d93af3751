//! Channel transport abstraction.
//!
//! One adapter per process instance: a publish side and a subscribe side
//! over the same shared store. Every message published to a topic any
//! adapter subscribes to is delivered to that adapter's inbound stream,
//! including messages the adapter published itself.

use async_trait::async_trait;
use bytes::Bytes;
use relay_core::Topic;
use tokio::sync::mpsc;

/// Errors surfaced by a transport adapter.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection to the shared store is down.
    #[error("transport disconnected")]
    Disconnected,
    /// The store rejected or failed the command.
    #[error("transport backend error: {0}")]
    Backend(String),
}

/// A message delivered on a subscribed topic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundMessage {
    /// Channel name the message arrived on.
    pub topic: String,
    /// Raw envelope bytes.
    pub payload: Bytes,
}

impl InboundMessage {
    /// Build an inbound message for `topic`.
    pub fn new(topic: &Topic, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.as_str().to_string(),
            payload: payload.into(),
        }
    }
}

/// Receiving half of an adapter's inbound stream.
pub type InboundReceiver = mpsc::UnboundedReceiver<InboundMessage>;

/// Publish/subscribe facade over a shared store.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    /// Publish `payload` on `topic`. Returns the number of subscribed
    /// receivers the store reported (zero still counts as accepted).
    async fn publish(&self, topic: &Topic, payload: Bytes) -> Result<usize, TransportError>;

    /// Start receiving messages for `topic`. Idempotent.
    async fn subscribe(&self, topic: &Topic) -> Result<(), TransportError>;

    /// Stop receiving messages for `topic`. No-op when not subscribed.
    async fn unsubscribe(&self, topic: &Topic) -> Result<(), TransportError>;

    /// Take the inbound stream. Returns `None` after the first call.
    fn take_inbound(&self) -> Option<InboundReceiver>;

    /// Short backend name for logs.
    fn backend(&self) -> &'static str;
}
