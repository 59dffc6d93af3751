//! Settings types.
//!
//! All structs use `#[serde(rename_all = "camelCase", default)]` so a partial
//! JSON file only needs to name the keys it changes.

mod server;
mod transport;

pub use server::{ConnectionSettings, ListenerSettings};
pub use transport::{PublishSettings, TransportKind, TransportSettings};

use std::fmt;
use std::str::FromStr;

use relay_core::LogFormat;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::{Result, SettingsError};

/// Deployment environment.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Developer machine.
    #[default]
    Local,
    /// Shared development deployment.
    Development,
    /// Production deployment.
    Production,
}

impl Environment {
    /// Lowercase name as used in `RELAY_ENV`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Development => "development",
            Self::Production => "production",
        }
    }
}

impl FromStr for Environment {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "local" => Ok(Self::Local),
            "development" => Ok(Self::Development),
            "production" => Ok(Self::Production),
            other => Err(SettingsError::InvalidEnvironment(other.to_string())),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log output settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default `tracing` filter directive. `RUST_LOG` wins when set.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Root settings for one relay process.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// Environment these settings were resolved for. Not read from files.
    #[serde(skip)]
    pub environment: Environment,
    /// Bind address for both listeners.
    pub host: String,
    /// Tutor WebSocket listener.
    pub socket: ListenerSettings,
    /// Control-plane HTTP listener.
    pub rest: ListenerSettings,
    /// Pub/sub backend.
    pub transport: TransportSettings,
    /// Per-connection limits.
    pub connection: ConnectionSettings,
    /// Publish retry policy.
    pub relay: PublishSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self::for_environment(Environment::Local)
    }
}

impl RelaySettings {
    /// Compiled defaults for `env`.
    pub fn for_environment(env: Environment) -> Self {
        let logging = match env {
            Environment::Production => LoggingSettings {
                level: "info".to_string(),
                format: LogFormat::Json,
            },
            Environment::Local | Environment::Development => LoggingSettings::default(),
        };
        Self {
            environment: env,
            host: "0.0.0.0".to_string(),
            socket: ListenerSettings::on(8000),
            rest: ListenerSettings::on(9000),
            transport: TransportSettings::default(),
            connection: ConnectionSettings::default(),
            relay: PublishSettings::default(),
            logging,
        }
    }

    /// Repair nonsensical values in place, warning for each one.
    ///
    /// Fails only when two listeners would bind the same fixed port.
    pub fn validate(&mut self) -> Result<()> {
        if self.socket.port != 0 && self.socket.port == self.rest.port {
            return Err(SettingsError::InvalidValue(format!(
                "socket and rest listeners share port {}",
                self.socket.port
            )));
        }

        let defaults = ConnectionSettings::default();
        let conn = &mut self.connection;
        if conn.send_queue == 0 {
            warn!(default = defaults.send_queue, "connection.sendQueue is 0, using default");
            conn.send_queue = defaults.send_queue;
        }
        if conn.max_connections == 0 {
            warn!(default = defaults.max_connections, "connection.maxConnections is 0, using default");
            conn.max_connections = defaults.max_connections;
        }
        if conn.max_message_size == 0 {
            warn!(default = defaults.max_message_size, "connection.maxMessageSize is 0, using default");
            conn.max_message_size = defaults.max_message_size;
        }
        if conn.heartbeat_interval_ms == 0 {
            warn!(default = defaults.heartbeat_interval_ms, "connection.heartbeatIntervalMs is 0, using default");
            conn.heartbeat_interval_ms = defaults.heartbeat_interval_ms;
        }
        if conn.heartbeat_timeout_ms < conn.heartbeat_interval_ms {
            let clamped = conn.heartbeat_interval_ms.saturating_mul(3);
            warn!(
                timeout_ms = conn.heartbeat_timeout_ms,
                interval_ms = conn.heartbeat_interval_ms,
                clamped_ms = clamped,
                "heartbeat timeout below interval, clamping"
            );
            conn.heartbeat_timeout_ms = clamped;
        }

        if self.relay.publish_attempts == 0 {
            warn!("relay.publishAttempts is 0, clamping to 1");
            self.relay.publish_attempts = 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn environment_parse() {
        assert_eq!("local".parse::<Environment>().unwrap(), Environment::Local);
        assert_eq!(
            "production".parse::<Environment>().unwrap(),
            Environment::Production
        );
        assert_matches!(
            "staging".parse::<Environment>(),
            Err(SettingsError::InvalidEnvironment(e)) if e == "staging"
        );
        // Names are exact.
        assert!("Local".parse::<Environment>().is_err());
    }

    #[test]
    fn defaults_per_environment() {
        let local = RelaySettings::for_environment(Environment::Local);
        assert_eq!(local.socket.port, 8000);
        assert_eq!(local.rest.port, 9000);
        assert_eq!(local.host, "0.0.0.0");
        assert_eq!(local.transport.kind, TransportKind::Memory);
        assert_eq!(local.logging.level, "info");
        assert_eq!(local.logging.format, LogFormat::Pretty);

        let prod = RelaySettings::for_environment(Environment::Production);
        assert_eq!(prod.environment, Environment::Production);
        assert_eq!(prod.logging.format, LogFormat::Json);
        assert_eq!(prod.socket.port, 8000);
    }

    #[test]
    fn serialized_defaults_shape() {
        let json = serde_json::to_value(RelaySettings::for_environment(Environment::Development))
            .unwrap();
        insta::assert_json_snapshot!(json, @r#"
        {
          "connection": {
            "heartbeatIntervalMs": 30000,
            "heartbeatTimeoutMs": 90000,
            "maxConnections": 10000,
            "maxMessageSize": 1048576,
            "sendQueue": 256
          },
          "host": "0.0.0.0",
          "logging": {
            "format": "pretty",
            "level": "info"
          },
          "relay": {
            "publishAttempts": 3,
            "retryBackoffMs": 50
          },
          "rest": {
            "port": 9000
          },
          "socket": {
            "port": 8000
          },
          "transport": {
            "kind": "memory",
            "redisUrl": "redis://127.0.0.1:6379"
          }
        }
        "#);
    }

    #[test]
    fn validate_clamps_values() {
        let mut s = RelaySettings::default();
        s.relay.publish_attempts = 0;
        s.connection.send_queue = 0;
        s.connection.heartbeat_interval_ms = 1000;
        s.connection.heartbeat_timeout_ms = 10;
        s.validate().unwrap();
        assert_eq!(s.relay.publish_attempts, 1);
        assert_eq!(s.connection.send_queue, 256);
        assert_eq!(s.connection.heartbeat_timeout_ms, 3000);
    }

    #[test]
    fn validate_rejects_shared_port() {
        let mut s = RelaySettings::default();
        s.rest.port = s.socket.port;
        assert_matches!(s.validate(), Err(SettingsError::InvalidValue(_)));
    }

    #[test]
    fn validate_allows_two_ephemeral_ports() {
        let mut s = RelaySettings::default();
        s.socket.port = 0;
        s.rest.port = 0;
        assert!(s.validate().is_ok());
    }
}
