//! Redis transport.
//!
//! `PUBLISH` runs on a multiplexed connection shared by all callers.
//! `SUBSCRIBE`/`UNSUBSCRIBE` run on a dedicated pub/sub connection whose
//! message stream is forwarded into the adapter's inbound channel.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use ::redis::AsyncCommands;
use ::redis::aio::{MultiplexedConnection, PubSubSink};
use relay_core::Topic;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::transport::{ChannelTransport, InboundMessage, InboundReceiver, TransportError};

impl From<::redis::RedisError> for TransportError {
    fn from(err: ::redis::RedisError) -> Self {
        if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
            Self::Disconnected
        } else {
            Self::Backend(err.to_string())
        }
    }
}

/// Adapter over a Redis server.
pub struct RedisTransport {
    publisher: MultiplexedConnection,
    sink: PubSubSink,
    inbound: Mutex<Option<InboundReceiver>>,
    forwarder: JoinHandle<()>,
}

impl RedisTransport {
    /// Open both connections to `url`.
    pub async fn connect(url: &str) -> Result<Self, TransportError> {
        let client = ::redis::Client::open(url)?;
        let publisher = client.get_multiplexed_async_connection().await?;
        let (sink, mut stream) = client.get_async_pubsub().await?.split();

        let (tx, rx) = mpsc::unbounded_channel();
        let forwarder = tokio::spawn(async move {
            while let Some(msg) = stream.next().await {
                let inbound = InboundMessage {
                    topic: msg.get_channel_name().to_string(),
                    payload: Bytes::copy_from_slice(msg.get_payload_bytes()),
                };
                if tx.send(inbound).is_err() {
                    return;
                }
            }
            warn!("redis pub/sub stream ended");
        });

        info!(url, "redis transport connected");
        Ok(Self {
            publisher,
            sink,
            inbound: Mutex::new(Some(rx)),
            forwarder,
        })
    }
}

impl Drop for RedisTransport {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}

#[async_trait]
impl ChannelTransport for RedisTransport {
    async fn publish(&self, topic: &Topic, payload: Bytes) -> Result<usize, TransportError> {
        let mut conn = self.publisher.clone();
        let receivers: i64 = conn.publish(topic.as_str(), payload.as_ref()).await?;
        Ok(usize::try_from(receivers).unwrap_or(0))
    }

    async fn subscribe(&self, topic: &Topic) -> Result<(), TransportError> {
        let mut sink = self.sink.clone();
        sink.subscribe(topic.as_str()).await?;
        Ok(())
    }

    async fn unsubscribe(&self, topic: &Topic) -> Result<(), TransportError> {
        let mut sink = self.sink.clone();
        sink.unsubscribe(topic.as_str()).await?;
        Ok(())
    }

    fn take_inbound(&self) -> Option<InboundReceiver> {
        self.inbound.lock().take()
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use assert_matches::assert_matches;
    use relay_core::Uid;
    use tokio::time::{sleep, timeout};

    /// Server used by the live tests. Unset means they return early.
    const REDIS_URL_VAR: &str = "RELAY_TEST_REDIS_URL";

    #[test]
    fn refused_connection_maps_to_disconnected() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = TransportError::from(::redis::RedisError::from(io));
        assert_matches!(err, TransportError::Disconnected);
    }

    #[test]
    fn command_failure_maps_to_backend() {
        let err = TransportError::from(::redis::RedisError::from((
            ::redis::ErrorKind::TypeError,
            "bad reply",
        )));
        assert_matches!(err, TransportError::Backend(ref msg) if msg.contains("bad reply"));
    }

    #[tokio::test]
    async fn malformed_url_fails_to_connect() {
        assert!(RedisTransport::connect("not a url").await.is_err());
    }

    #[tokio::test]
    async fn publish_subscribe_roundtrip() {
        let Ok(url) = std::env::var(REDIS_URL_VAR) else {
            return;
        };
        let transport = RedisTransport::connect(&url).await.unwrap();
        assert_eq!(transport.backend(), "redis");
        let mut inbound = transport.take_inbound().unwrap();
        assert!(transport.take_inbound().is_none());

        let uid = Uid::parse(format!("roundtrip-{}", std::process::id())).unwrap();
        let topic = Topic::for_recipient(&uid);
        transport.subscribe(&topic).await.unwrap();

        let payload = Bytes::from_static(br#"{"type":"message","payload":{"data":1}}"#);
        timeout(Duration::from_secs(5), async {
            while transport.publish(&topic, payload.clone()).await.unwrap() == 0 {
                sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();

        let msg = timeout(Duration::from_secs(5), inbound.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg.topic, topic.as_str());
        assert_eq!(msg.payload, payload);

        transport.unsubscribe(&topic).await.unwrap();
        timeout(Duration::from_secs(5), async {
            while transport.publish(&topic, payload.clone()).await.unwrap() != 0 {
                sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();
    }
}
