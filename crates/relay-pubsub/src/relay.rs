//! Topic/type demultiplexing relay.
//!
//! The relay owns the `(topic, type) -> handler` table for one instance.
//! A single dispatch task drains the transport's inbound stream, decodes
//! each envelope once and runs every matching handler in turn, so handler
//! invocations never overlap. Handlers are snapshotted under the table lock
//! and invoked after it is released; a handler may therefore drop guards
//! (including its own) without deadlocking.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use relay_core::{Topic, Uid, envelope};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};

use crate::metrics as names;
use crate::transport::{ChannelTransport, InboundMessage, TransportError};

/// Errors from relay subscription management.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The transport failed the command.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// [`Relay::start`] was called more than once.
    #[error("relay dispatch loop already started")]
    AlreadyStarted,
}

/// Handler callback. Receives the envelope's opaque `data`.
pub type Callback = Arc<dyn Fn(&Value) + Send + Sync>;

/// How hard to try before reporting a publish as failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PublishPolicy {
    /// Total attempts, including the first. Treated as at least one.
    pub attempts: u32,
    /// Pause between attempts.
    pub backoff: Duration,
}

impl Default for PublishPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(50),
        }
    }
}

struct HandlerEntry {
    id: u64,
    topic: Topic,
    kind: String,
    callback: Callback,
}

/// Per-instance relay over a [`ChannelTransport`].
pub struct Relay {
    transport: Arc<dyn ChannelTransport>,
    handlers: Mutex<Vec<HandlerEntry>>,
    next_handler_id: AtomicU64,
    policy: PublishPolicy,
}

impl Relay {
    /// Create a relay. Nothing is subscribed until [`Relay::start`].
    pub fn new(transport: Arc<dyn ChannelTransport>, policy: PublishPolicy) -> Arc<Self> {
        Arc::new(Self {
            transport,
            handlers: Mutex::new(Vec::new()),
            next_handler_id: AtomicU64::new(1),
            policy,
        })
    }

    /// Backend name of the underlying transport.
    pub fn backend(&self) -> &'static str {
        self.transport.backend()
    }

    /// Subscribe the broadcast topic and spawn the dispatch loop.
    ///
    /// The loop stops when `cancel` fires, the inbound stream ends, or the
    /// relay is dropped.
    pub async fn start(
        self: &Arc<Self>,
        cancel: CancellationToken,
    ) -> Result<JoinHandle<()>, RelayError> {
        self.transport.subscribe(&Topic::broadcast()).await?;
        let mut inbound = self
            .transport
            .take_inbound()
            .ok_or(RelayError::AlreadyStarted)?;

        let relay = Arc::downgrade(self);
        debug!(backend = self.backend(), "relay dispatch loop starting");
        Ok(tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    msg = inbound.recv() => {
                        let Some(msg) = msg else {
                            warn!("transport inbound stream closed");
                            break;
                        };
                        let Some(relay) = relay.upgrade() else { break };
                        let _ = relay.dispatch(&msg);
                    }
                }
            }
            debug!("relay dispatch loop stopped");
        }))
    }

    /// Start receiving messages addressed to `uid`. Idempotent.
    pub async fn subscribe_recipient(&self, uid: &Uid) -> Result<(), RelayError> {
        let topic = Topic::for_recipient(uid);
        self.transport.subscribe(&topic).await?;
        debug!(%uid, %topic, "subscribed recipient");
        Ok(())
    }

    /// Stop receiving messages addressed to `uid`. No-op for unknown uids.
    pub async fn unsubscribe_recipient(&self, uid: &Uid) -> Result<(), RelayError> {
        let topic = Topic::for_recipient(uid);
        self.transport.unsubscribe(&topic).await?;
        debug!(%uid, %topic, "unsubscribed recipient");
        Ok(())
    }

    /// Publish `data` as a `kind` event to `uid`'s topic.
    ///
    /// Returns `true` iff the transport accepted the message, even when no
    /// instance is subscribed.
    #[instrument(skip_all, fields(uid = %uid, kind = kind))]
    pub async fn publish(&self, uid: &Uid, kind: &str, data: &Value) -> bool {
        self.publish_to(&Topic::for_recipient(uid), kind, data, "recipient")
            .await
    }

    /// Publish `data` as a `kind` event on the broadcast topic.
    #[instrument(skip_all, fields(kind = kind))]
    pub async fn broadcast(&self, kind: &str, data: &Value) -> bool {
        self.publish_to(&Topic::broadcast(), kind, data, "broadcast")
            .await
    }

    async fn publish_to(&self, topic: &Topic, kind: &str, data: &Value, scope: &'static str) -> bool {
        let payload = match envelope::encode(kind, data) {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) => {
                warn!(%topic, kind, error = %e, "failed to encode envelope");
                metrics::counter!(names::RELAY_PUBLISH_FAILURES_TOTAL, "scope" => scope)
                    .increment(1);
                return false;
            }
        };

        let attempts = self.policy.attempts.max(1);
        for attempt in 1..=attempts {
            match self.transport.publish(topic, payload.clone()).await {
                Ok(receivers) => {
                    debug!(%topic, kind, receivers, attempt, "published");
                    metrics::counter!(names::RELAY_PUBLISH_TOTAL, "scope" => scope).increment(1);
                    return true;
                }
                Err(e) if attempt < attempts => {
                    warn!(%topic, kind, attempt, error = %e, "publish failed, retrying");
                    metrics::counter!(names::RELAY_PUBLISH_RETRIES_TOTAL).increment(1);
                    tokio::time::sleep(self.policy.backoff).await;
                }
                Err(e) => {
                    warn!(%topic, kind, attempts, error = %e, "publish failed");
                }
            }
        }
        metrics::counter!(names::RELAY_PUBLISH_FAILURES_TOTAL, "scope" => scope).increment(1);
        false
    }

    /// Register a handler for `kind` events addressed to `uid`.
    ///
    /// Registrations are independent: several handlers may share a key.
    /// Dropping the returned guard removes the handler.
    pub fn on_message(
        self: &Arc<Self>,
        uid: &Uid,
        kind: &str,
        callback: impl Fn(&Value) + Send + Sync + 'static,
    ) -> HandlerGuard {
        self.register(Topic::for_recipient(uid), kind, Arc::new(callback))
    }

    /// Register a handler for `kind` events on the broadcast topic.
    pub fn on_broadcast_message(
        self: &Arc<Self>,
        kind: &str,
        callback: impl Fn(&Value) + Send + Sync + 'static,
    ) -> HandlerGuard {
        self.register(Topic::broadcast(), kind, Arc::new(callback))
    }

    fn register(self: &Arc<Self>, topic: Topic, kind: &str, callback: Callback) -> HandlerGuard {
        let id = self.next_handler_id.fetch_add(1, Ordering::Relaxed);
        let count = {
            let mut handlers = self.handlers.lock();
            handlers.push(HandlerEntry {
                id,
                topic,
                kind: kind.to_string(),
                callback,
            });
            handlers.len()
        };
        record_handler_count(count);
        HandlerGuard {
            relay: Arc::downgrade(self),
            id,
        }
    }

    fn remove_handler(&self, id: u64) {
        let count = {
            let mut handlers = self.handlers.lock();
            handlers.retain(|h| h.id != id);
            handlers.len()
        };
        record_handler_count(count);
    }

    /// Number of registered handlers.
    pub fn handler_count(&self) -> usize {
        self.handlers.lock().len()
    }

    /// Route one inbound message to its handlers. Returns how many ran.
    ///
    /// Malformed envelopes are logged, counted and dropped.
    pub fn dispatch(&self, msg: &InboundMessage) -> usize {
        let envelope = match envelope::decode(&msg.payload) {
            Ok(env) => env,
            Err(e) => {
                warn!(topic = %msg.topic, error = %e, "dropping undecodable envelope");
                metrics::counter!(names::RELAY_DECODE_FAILURES_TOTAL).increment(1);
                return 0;
            }
        };

        let callbacks: Vec<Callback> = self
            .handlers
            .lock()
            .iter()
            .filter(|h| h.topic.as_str() == msg.topic && h.kind == envelope.kind)
            .map(|h| Arc::clone(&h.callback))
            .collect();

        if callbacks.is_empty() {
            trace!(topic = %msg.topic, kind = %envelope.kind, "no handler");
            return 0;
        }
        for callback in &callbacks {
            callback(envelope.data());
        }
        metrics::counter!(names::RELAY_DISPATCH_TOTAL).increment(callbacks.len() as u64);
        callbacks.len()
    }
}

#[allow(clippy::cast_precision_loss)]
fn record_handler_count(count: usize) {
    metrics::gauge!(names::RELAY_HANDLERS).set(count as f64);
}

/// Keeps a handler registered. Dropping it unregisters the handler.
#[must_use = "dropping the guard unregisters the handler"]
pub struct HandlerGuard {
    relay: Weak<Relay>,
    id: u64,
}

impl Drop for HandlerGuard {
    fn drop(&mut self) {
        if let Some(relay) = self.relay.upgrade() {
            relay.remove_handler(self.id);
        }
    }
}

impl std::fmt::Debug for HandlerGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerGuard").field("id", &self.id).finish()
    }
}
