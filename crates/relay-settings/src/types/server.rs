//! Listener and live-connection settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// One TCP listener.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListenerSettings {
    /// Port to bind. `0` picks an ephemeral port.
    pub port: u16,
}

impl ListenerSettings {
    /// Listener on `port`.
    pub fn on(port: u16) -> Self {
        Self { port }
    }
}

impl Default for ListenerSettings {
    fn default() -> Self {
        Self { port: 0 }
    }
}

/// Limits and liveness timing for tutor WebSocket connections.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionSettings {
    /// Outbound frames buffered per connection before pushes start failing.
    pub send_queue: usize,
    /// Interval between server pings, in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Silence after which a connection is considered dead, in milliseconds.
    pub heartbeat_timeout_ms: u64,
    /// Largest accepted inbound frame, in bytes.
    pub max_message_size: usize,
    /// Concurrent connections accepted by one instance.
    pub max_connections: usize,
}

impl ConnectionSettings {
    /// Ping interval as a [`Duration`].
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Liveness timeout as a [`Duration`].
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            send_queue: 256,
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 90_000,
            max_message_size: 1024 * 1024,
            max_connections: 10_000,
        }
    }
}
