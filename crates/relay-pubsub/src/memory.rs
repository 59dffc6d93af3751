//! In-process pub/sub store.
//!
//! A [`MemoryHub`] plays the role of the shared store; each
//! [`MemoryTransport`] connected to it stands in for one relay instance.
//! Publishing reports the number of adapters subscribed to the topic, the
//! same count Redis `PUBLISH` returns.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use relay_core::Topic;
use tokio::sync::mpsc;
use tracing::debug;

use crate::transport::{ChannelTransport, InboundMessage, InboundReceiver, TransportError};

struct Slot {
    topics: HashSet<String>,
    tx: mpsc::UnboundedSender<InboundMessage>,
}

#[derive(Default)]
struct HubInner {
    adapters: Mutex<HashMap<u64, Slot>>,
    next_id: AtomicU64,
    offline: AtomicBool,
}

/// Shared in-process store. Cheap to clone.
#[derive(Clone, Default)]
pub struct MemoryHub {
    inner: Arc<HubInner>,
}

impl MemoryHub {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate losing (or regaining) the store. While offline every
    /// adapter call fails with [`TransportError::Disconnected`].
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of adapters subscribed to `topic`.
    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        self.inner
            .adapters
            .lock()
            .values()
            .filter(|slot| slot.topics.contains(topic.as_str()))
            .count()
    }

    /// Number of connected adapters.
    pub fn adapter_count(&self) -> usize {
        self.inner.adapters.lock().len()
    }

    fn check_online(&self) -> Result<(), TransportError> {
        if self.inner.offline.load(Ordering::SeqCst) {
            Err(TransportError::Disconnected)
        } else {
            Ok(())
        }
    }
}

/// One instance's adapter on a [`MemoryHub`].
pub struct MemoryTransport {
    id: u64,
    hub: MemoryHub,
    inbound: Mutex<Option<InboundReceiver>>,
}

impl MemoryTransport {
    /// Attach a new adapter to `hub`.
    pub fn connect(hub: &MemoryHub) -> Self {
        let id = hub.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = hub.inner.adapters.lock().insert(
            id,
            Slot {
                topics: HashSet::new(),
                tx,
            },
        );
        Self {
            id,
            hub: hub.clone(),
            inbound: Mutex::new(Some(rx)),
        }
    }

    /// Topics this adapter is currently subscribed to.
    pub fn subscriptions(&self) -> Vec<String> {
        self.hub
            .inner
            .adapters
            .lock()
            .get(&self.id)
            .map(|slot| slot.topics.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        let _ = self.hub.inner.adapters.lock().remove(&self.id);
    }
}

#[async_trait]
impl ChannelTransport for MemoryTransport {
    async fn publish(&self, topic: &Topic, payload: Bytes) -> Result<usize, TransportError> {
        self.hub.check_online()?;
        let adapters = self.hub.inner.adapters.lock();
        let mut delivered = 0;
        for slot in adapters.values() {
            if slot.topics.contains(topic.as_str())
                && slot
                    .tx
                    .send(InboundMessage::new(topic, payload.clone()))
                    .is_ok()
            {
                delivered += 1;
            }
        }
        debug!(%topic, delivered, "memory publish");
        Ok(delivered)
    }

    async fn subscribe(&self, topic: &Topic) -> Result<(), TransportError> {
        self.hub.check_online()?;
        if let Some(slot) = self.hub.inner.adapters.lock().get_mut(&self.id) {
            let _ = slot.topics.insert(topic.as_str().to_string());
        }
        Ok(())
    }

    async fn unsubscribe(&self, topic: &Topic) -> Result<(), TransportError> {
        self.hub.check_online()?;
        if let Some(slot) = self.hub.inner.adapters.lock().get_mut(&self.id) {
            let _ = slot.topics.remove(topic.as_str());
        }
        Ok(())
    }

    fn take_inbound(&self) -> Option<InboundReceiver> {
        self.inbound.lock().take()
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
