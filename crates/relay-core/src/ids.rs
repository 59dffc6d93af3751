//! Identifier newtypes.
//!
//! [`Uid`] is supplied by the connecting tutor and validated on construction.
//! [`ConnectionId`] and [`InstanceId`] are generated locally as UUID v7
//! strings (time-ordered) via [`uuid::Uuid::now_v7`].

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::topic::BROADCAST_NAME;

/// Errors produced when a recipient identifier is rejected.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum UidError {
    /// The identifier was empty or whitespace.
    #[error("uid must not be empty")]
    Empty,
    /// The identifier collides with the broadcast channel name.
    #[error("uid '{0}' is reserved")]
    Reserved(String),
}

/// Opaque recipient identifier.
///
/// Unique per tutor and stable for the lifetime of a live connection. The
/// broadcast channel name is reserved so that recipient topics can never
/// alias the broadcast topic.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Uid(String);

impl Uid {
    /// Validate and wrap a recipient identifier.
    pub fn parse(value: impl Into<String>) -> Result<Self, UidError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(UidError::Empty);
        }
        if value == BROADCAST_NAME {
            return Err(UidError::Reserved(value));
        }
        Ok(Self(value))
    }

    /// Return the inner string as a slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Uid {
    type Error = UidError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<Uid> for String {
    fn from(uid: Uid) -> Self {
        uid.0
    }
}

impl AsRef<str> for Uid {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new random ID (UUID v7, time-ordered).
            #[must_use]
            pub fn new() -> Self {
                Self(format!(concat!($prefix, "_{}"), Uuid::now_v7()))
            }

            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

branded_id! {
    /// Identifier of one live connection. A reconnecting tutor gets a new one.
    ConnectionId, "conn"
}

branded_id! {
    /// Identifier of one relay process instance, used in logs and `/health`.
    InstanceId, "relay"
}
