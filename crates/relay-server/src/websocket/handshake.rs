//! Handshake query parsing for `GET /ws`.

use relay_core::{Uid, UidError};
use serde::Deserialize;

use crate::registry::TutorProfile;

/// Query string sent by a connecting tutor.
///
/// `displayName` and `avatarRef` also accept the short names `name` and
/// `avatar`.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeQuery {
    /// Recipient identifier. Required.
    pub uid: Option<String>,
    /// Display name shown in `/tutors`.
    #[serde(alias = "name")]
    pub display_name: Option<String>,
    /// Avatar reference shown in `/tutors`.
    #[serde(alias = "avatar")]
    pub avatar_ref: Option<String>,
}

impl HandshakeQuery {
    /// Validate the query into a tutor profile.
    pub fn into_profile(self) -> Result<TutorProfile, UidError> {
        let uid = Uid::parse(self.uid.unwrap_or_default())?;
        Ok(TutorProfile {
            uid,
            display_name: self.display_name,
            avatar_ref: self.avatar_ref,
        })
    }
}
