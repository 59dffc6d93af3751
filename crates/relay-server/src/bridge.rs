//! Binds one live connection's lifecycle to the relay and the registry.
//!
//! ```text
//! Connecting --activate--> Active --deactivate--> Disconnected
//!      \                                             ^
//!       `------------ subscription failed ----------'
//! ```
//!
//! While `Active`, the bridge holds two handler guards on the relay:
//! `(uid, "message")` forwards data to the socket and `(uid, "disconnect")`
//! forces the connection closed. Handlers are registered before the topic
//! is subscribed so nothing delivered on it goes unhandled.

use std::sync::Arc;

use parking_lot::Mutex;
use relay_core::{DISCONNECT, MESSAGE};
use relay_pubsub::{HandlerGuard, Relay, RelayError};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::metrics as names;
use crate::registry::{TutorProfile, TutorRegistry};
use crate::websocket::connection::LiveConnection;

/// Lifecycle state of a [`ConnectionBridge`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BridgeState {
    /// Handshake accepted, not yet registered.
    Connecting,
    /// Registered, subscribed and receiving.
    Active,
    /// Torn down. Terminal.
    Disconnected,
}

/// Push `data` to `connection` as a `"message"` event.
pub fn forward(connection: &LiveConnection, data: &Value) -> bool {
    if connection.emit(MESSAGE, data) {
        metrics::counter!(names::DELIVERIES_TOTAL).increment(1);
        true
    } else {
        warn!(uid = %connection.uid, connection_id = %connection.id, "socket queue full or closed, dropping message");
        metrics::counter!(names::DELIVERY_DROPS_TOTAL).increment(1);
        false
    }
}

/// Push `data` as a final `"message"` event, then release the registry entry
/// and close the connection.
///
/// If the push fails nothing else happens: the entry stays registered and
/// the connection stays open.
pub fn force_close(registry: &TutorRegistry, connection: &LiveConnection, data: &Value) -> bool {
    if !connection.emit(MESSAGE, data) {
        warn!(uid = %connection.uid, connection_id = %connection.id, "forced disconnect aborted, push failed");
        metrics::counter!(names::FORCED_DISCONNECTS_ABORTED_TOTAL).increment(1);
        return false;
    }
    let _ = registry.release(&connection.uid, &connection.id);
    connection.close();
    info!(uid = %connection.uid, connection_id = %connection.id, "forced disconnect");
    metrics::counter!(names::FORCED_DISCONNECTS_TOTAL).increment(1);
    true
}

/// Connection lifecycle owner for one tutor socket.
pub struct ConnectionBridge {
    relay: Arc<Relay>,
    registry: Arc<TutorRegistry>,
    profile: TutorProfile,
    connection: Arc<LiveConnection>,
    state: Mutex<BridgeState>,
    guards: Mutex<Vec<HandlerGuard>>,
}

impl ConnectionBridge {
    /// Create a bridge in the `Connecting` state.
    pub fn new(
        relay: Arc<Relay>,
        registry: Arc<TutorRegistry>,
        profile: TutorProfile,
        connection: Arc<LiveConnection>,
    ) -> Self {
        Self {
            relay,
            registry,
            profile,
            connection,
            state: Mutex::new(BridgeState::Connecting),
            guards: Mutex::new(Vec::new()),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> BridgeState {
        *self.state.lock()
    }

    /// The bridged connection.
    pub fn connection(&self) -> &Arc<LiveConnection> {
        &self.connection
    }

    /// `Connecting -> Active`.
    ///
    /// On subscription failure the registry entry and handlers are rolled
    /// back and the bridge ends `Disconnected`. Calling this in any state
    /// other than `Connecting` is a no-op.
    pub async fn activate(&self) -> Result<(), RelayError> {
        if self.state() != BridgeState::Connecting {
            return Ok(());
        }
        let uid = &self.profile.uid;

        if let Some(displaced) = self
            .registry
            .add(self.profile.clone(), Arc::clone(&self.connection))
        {
            info!(
                %uid,
                displaced = %displaced.connection.id,
                connection_id = %self.connection.id,
                "tutor reconnected, closing previous connection"
            );
            displaced.connection.close();
        }

        let conn = Arc::clone(&self.connection);
        let on_message = self.relay.on_message(uid, MESSAGE, move |data| {
            let _ = forward(&conn, data);
        });
        let conn = Arc::clone(&self.connection);
        let registry = Arc::clone(&self.registry);
        let on_disconnect = self.relay.on_message(uid, DISCONNECT, move |data| {
            let _ = force_close(&registry, &conn, data);
        });
        *self.guards.lock() = vec![on_message, on_disconnect];

        let lock = self.registry.subscription_lock(uid);
        let subscribed = {
            let _held = lock.lock().await;
            self.relay.subscribe_recipient(uid).await
        };
        drop(lock);
        if let Err(e) = subscribed {
            warn!(%uid, connection_id = %self.connection.id, error = %e, "subscription failed, rolling back");
            drop(std::mem::take(&mut *self.guards.lock()));
            let _ = self.registry.release(uid, &self.connection.id);
            self.registry.prune_subscription_lock(uid);
            *self.state.lock() = BridgeState::Disconnected;
            return Err(e);
        }

        *self.state.lock() = BridgeState::Active;
        debug!(%uid, connection_id = %self.connection.id, "bridge active");
        Ok(())
    }

    /// `-> Disconnected`. Idempotent.
    ///
    /// Drops the handlers, releases the registry entry if this connection
    /// still owns it, and unsubscribes unless another local connection now
    /// holds the uid. The check and the unsubscribe run under the uid's
    /// subscription lock, which a successor's `activate` also takes before
    /// subscribing.
    pub async fn deactivate(&self) {
        {
            let mut state = self.state.lock();
            if *state == BridgeState::Disconnected {
                return;
            }
            *state = BridgeState::Disconnected;
        }
        let uid = &self.profile.uid;

        drop(std::mem::take(&mut *self.guards.lock()));
        let released = self.registry.release(uid, &self.connection.id);
        let lock = self.registry.subscription_lock(uid);
        {
            let _held = lock.lock().await;
            if !self.registry.has(uid) {
                if let Err(e) = self.relay.unsubscribe_recipient(uid).await {
                    warn!(%uid, error = %e, "unsubscribe failed");
                }
            }
        }
        drop(lock);
        self.registry.prune_subscription_lock(uid);
        self.connection.close();
        debug!(%uid, connection_id = %self.connection.id, released, "bridge disconnected");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use relay_core::{Topic, Uid};
    use relay_pubsub::transport::InboundReceiver;
    use relay_pubsub::{
        ChannelTransport, InboundMessage, MemoryHub, MemoryTransport, PublishPolicy,
        TransportError,
    };
    use serde_json::json;
    use tokio::sync::{Notify, mpsc};

    struct Fixture {
        hub: MemoryHub,
        relay: Arc<Relay>,
        registry: Arc<TutorRegistry>,
    }

    /// Memory adapter whose `unsubscribe` parks until released.
    struct GatedTransport {
        inner: MemoryTransport,
        entered: Arc<Notify>,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl ChannelTransport for GatedTransport {
        async fn publish(&self, topic: &Topic, payload: Bytes) -> Result<usize, TransportError> {
            self.inner.publish(topic, payload).await
        }

        async fn subscribe(&self, topic: &Topic) -> Result<(), TransportError> {
            self.inner.subscribe(topic).await
        }

        async fn unsubscribe(&self, topic: &Topic) -> Result<(), TransportError> {
            self.entered.notify_one();
            self.release.notified().await;
            self.inner.unsubscribe(topic).await
        }

        fn take_inbound(&self) -> Option<InboundReceiver> {
            self.inner.take_inbound()
        }

        fn backend(&self) -> &'static str {
            "gated"
        }
    }

    impl Fixture {
        fn new() -> Self {
            let hub = MemoryHub::new();
            let transport = Arc::new(MemoryTransport::connect(&hub));
            Self::with_transport(hub, transport)
        }

        fn with_transport(hub: MemoryHub, transport: Arc<dyn ChannelTransport>) -> Self {
            let policy = PublishPolicy {
                attempts: 1,
                backoff: Duration::ZERO,
            };
            let relay = Relay::new(transport, policy);
            Self {
                hub,
                relay,
                registry: Arc::new(TutorRegistry::new()),
            }
        }

        fn bridge(&self, uid: &str, queue: usize) -> (ConnectionBridge, mpsc::Receiver<Arc<String>>) {
            let (tx, rx) = mpsc::channel(queue);
            let uid = Uid::parse(uid).unwrap();
            let connection = Arc::new(LiveConnection::new(uid.clone(), tx));
            let profile = TutorProfile {
                uid,
                display_name: None,
                avatar_ref: None,
            };
            let bridge = ConnectionBridge::new(
                Arc::clone(&self.relay),
                Arc::clone(&self.registry),
                profile,
                connection,
            );
            (bridge, rx)
        }

        fn deliver(&self, uid: &str, kind: &str, data: &Value) -> usize {
            let topic = Topic::for_recipient(&Uid::parse(uid).unwrap());
            let payload = relay_core::envelope::encode(kind, data).unwrap();
            self.relay.dispatch(&InboundMessage::new(&topic, payload))
        }

        fn topic(uid: &str) -> Topic {
            Topic::for_recipient(&Uid::parse(uid).unwrap())
        }
    }

    #[tokio::test]
    async fn activate_registers_handlers_and_subscribes() {
        let fx = Fixture::new();
        let (bridge, mut rx) = fx.bridge("t1", 4);
        bridge.activate().await.unwrap();

        assert_eq!(bridge.state(), BridgeState::Active);
        assert!(fx.registry.has(&Uid::parse("t1").unwrap()));
        assert_eq!(fx.relay.handler_count(), 2);
        assert_eq!(fx.hub.subscriber_count(&Fixture::topic("t1")), 1);

        assert_eq!(fx.deliver("t1", "message", &json!("hi")), 1);
        assert_eq!(&*rx.recv().await.unwrap(), r#"{"event":"message","data":"hi"}"#);
    }

    #[tokio::test]
    async fn connect_disconnect_cycle_restores_handler_table() {
        let fx = Fixture::new();
        let baseline = fx.relay.handler_count();
        let (bridge, _rx) = fx.bridge("t1", 4);
        bridge.activate().await.unwrap();
        bridge.deactivate().await;
        bridge.deactivate().await;

        assert_eq!(bridge.state(), BridgeState::Disconnected);
        assert_eq!(fx.relay.handler_count(), baseline);
        assert!(fx.registry.is_empty());
        assert_eq!(fx.hub.subscriber_count(&Fixture::topic("t1")), 0);
        assert!(bridge.connection().is_closed());
    }

    #[tokio::test]
    async fn failed_subscription_rolls_back() {
        let fx = Fixture::new();
        fx.hub.set_offline(true);
        let (bridge, _rx) = fx.bridge("t1", 4);
        assert!(bridge.activate().await.is_err());

        assert_eq!(bridge.state(), BridgeState::Disconnected);
        assert!(!fx.registry.has(&Uid::parse("t1").unwrap()));
        assert_eq!(fx.relay.handler_count(), 0);
    }

    #[tokio::test]
    async fn force_close_pushes_then_releases() {
        let fx = Fixture::new();
        let (bridge, mut rx) = fx.bridge("t1", 4);
        bridge.activate().await.unwrap();

        assert_eq!(fx.deliver("t1", "disconnect", &json!({"reason": "kicked"})), 1);
        assert_eq!(
            &*rx.recv().await.unwrap(),
            r#"{"event":"message","data":{"reason":"kicked"}}"#
        );
        assert!(!fx.registry.has(&Uid::parse("t1").unwrap()));
        assert!(bridge.connection().is_closed());

        // Session teardown completes the transition.
        bridge.deactivate().await;
        assert_eq!(fx.hub.subscriber_count(&Fixture::topic("t1")), 0);
        assert_eq!(fx.relay.handler_count(), 0);
    }

    #[tokio::test]
    async fn failed_force_close_push_leaves_connection_registered() {
        let fx = Fixture::new();
        let (bridge, _rx) = fx.bridge("t1", 1);
        bridge.activate().await.unwrap();
        assert!(bridge.connection().send(Arc::new("filler".into())));

        assert_eq!(fx.deliver("t1", "disconnect", &Value::Null), 1);
        assert!(fx.registry.has(&Uid::parse("t1").unwrap()));
        assert!(!bridge.connection().is_closed());
        assert_eq!(bridge.state(), BridgeState::Active);
    }

    #[tokio::test]
    async fn reconnect_displaces_previous_connection() {
        let fx = Fixture::new();
        let uid = Uid::parse("t1").unwrap();
        let (old, _old_rx) = fx.bridge("t1", 4);
        let (new, mut new_rx) = fx.bridge("t1", 4);
        old.activate().await.unwrap();
        new.activate().await.unwrap();

        assert!(old.connection().is_closed());
        assert_eq!(fx.registry.connection(&uid).unwrap().id, new.connection().id);

        // The stale session tears down without touching its successor.
        old.deactivate().await;
        assert!(fx.registry.has(&uid));
        assert_eq!(fx.hub.subscriber_count(&Fixture::topic("t1")), 1);
        assert_eq!(fx.relay.handler_count(), 2);

        assert_eq!(fx.deliver("t1", "message", &json!(7)), 1);
        assert_eq!(&*new_rx.recv().await.unwrap(), r#"{"event":"message","data":7}"#);
    }

    #[tokio::test]
    async fn other_recipients_are_unaffected() {
        let fx = Fixture::new();
        let (a, mut a_rx) = fx.bridge("a", 4);
        let (b, _b_rx) = fx.bridge("b", 4);
        a.activate().await.unwrap();
        b.activate().await.unwrap();

        let _ = fx.deliver("b", "disconnect", &Value::Null);
        assert!(b.connection().is_closed());
        assert!(!a.connection().is_closed());
        assert_eq!(fx.deliver("a", "message", &json!(1)), 1);
        assert!(a_rx.recv().await.is_some());
    }
    #[tokio::test]
    async fn stale_teardown_does_not_unsubscribe_successor() {
        let hub = MemoryHub::new();
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let transport = GatedTransport {
            inner: MemoryTransport::connect(&hub),
            entered: Arc::clone(&entered),
            release: Arc::clone(&release),
        };
        let fx = Fixture::with_transport(hub, Arc::new(transport));
        let uid = Uid::parse("t1").unwrap();

        let (old, _old_rx) = fx.bridge("t1", 4);
        let (new, mut new_rx) = fx.bridge("t1", 4);
        old.activate().await.unwrap();

        // Old teardown decides to unsubscribe and parks inside the transport.
        let teardown = tokio::spawn(async move {
            old.deactivate().await;
            old
        });
        entered.notified().await;
        assert!(!fx.registry.has(&uid));

        // Successor registers meanwhile; its subscribe waits for the teardown.
        let activation = tokio::spawn(async move {
            new.activate().await.unwrap();
            new
        });
        for _ in 0..20 {
            if fx.registry.has(&uid) {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(fx.registry.has(&uid));

        release.notify_one();
        let _old = teardown.await.unwrap();
        let new = activation.await.unwrap();

        assert_eq!(new.state(), BridgeState::Active);
        assert!(fx.registry.has(&uid));
        assert_eq!(fx.hub.subscriber_count(&Fixture::topic("t1")), 1);
        assert_eq!(fx.deliver("t1", "message", &json!("still here")), 1);
        assert_eq!(
            &*new_rx.recv().await.unwrap(),
            r#"{"event":"message","data":"still here"}"#
        );
    }
}
