//! Shared transport and publish retry settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Which pub/sub backend carries envelopes between instances.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Process-local hub. Only instances in the same process see each other.
    #[default]
    Memory,
    /// Redis `PUBLISH`/`SUBSCRIBE`.
    Redis,
}

impl TransportKind {
    /// Parse a backend name, case-insensitively.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Some(Self::Memory),
            "redis" => Some(Self::Redis),
            _ => None,
        }
    }
}

/// Backend selection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransportSettings {
    /// Backend kind.
    pub kind: TransportKind,
    /// Connection URL used when `kind` is `redis`.
    pub redis_url: String,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            kind: TransportKind::Memory,
            redis_url: "redis://127.0.0.1:6379".to_string(),
        }
    }
}

/// Publish retry policy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PublishSettings {
    /// Total publish attempts, including the first.
    pub publish_attempts: u32,
    /// Pause between attempts, in milliseconds.
    pub retry_backoff_ms: u64,
}

impl PublishSettings {
    /// Backoff as a [`Duration`].
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl Default for PublishSettings {
    fn default() -> Self {
        Self {
            publish_attempts: 3,
            retry_backoff_ms: 50,
        }
    }
}
