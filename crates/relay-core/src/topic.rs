//! Topic naming on the shared pub/sub transport.
//!
//! Every recipient owns `relay.<uid>`; broadcasts travel on `relay.common`.
//! Because [`Uid`] rejects the broadcast name, the two families never meet.

use std::fmt;

use crate::ids::Uid;

/// Prefix shared by every relay topic.
pub const TOPIC_PREFIX: &str = "relay.";

/// Name component of the broadcast topic.
pub const BROADCAST_NAME: &str = "common";

/// A named channel on the shared transport.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Topic(String);

impl Topic {
    /// The per-recipient topic for `uid`.
    pub fn for_recipient(uid: &Uid) -> Self {
        Self(format!("{TOPIC_PREFIX}{uid}"))
    }

    /// The single well-known broadcast topic.
    pub fn broadcast() -> Self {
        Self(format!("{TOPIC_PREFIX}{BROADCAST_NAME}"))
    }

    /// Whether this is the broadcast topic.
    pub fn is_broadcast(&self) -> bool {
        self.0
            .strip_prefix(TOPIC_PREFIX)
            .is_some_and(|rest| rest == BROADCAST_NAME)
    }

    /// Channel name as sent to the transport.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Topic {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
