//! Instance-local table of connected tutors.
//!
//! An entry exists only while a live connection for that uid is open on
//! this instance. Presence here says nothing about other instances.

use std::sync::Arc;

use dashmap::DashMap;
use relay_core::{ConnectionId, Uid};
use serde::Serialize;
use tracing::debug;

use crate::websocket::connection::LiveConnection;

/// Profile supplied in the connection handshake.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TutorProfile {
    /// Recipient identifier.
    pub uid: Uid,
    /// Display name, if given.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Avatar reference, if given.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_ref: Option<String>,
}

/// A registered tutor and the connection that owns the entry.
#[derive(Clone, Debug)]
pub struct RegistryEntry {
    /// Handshake profile.
    pub profile: TutorProfile,
    /// Owning live connection.
    pub connection: Arc<LiveConnection>,
}

/// Tutors with a live connection on this instance.
#[derive(Debug, Default)]
pub struct TutorRegistry {
    entries: DashMap<Uid, RegistryEntry>,
    subscription_locks: DashMap<Uid, Arc<tokio::sync::Mutex<()>>>,
}

impl TutorRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `uid` has a live connection on this instance.
    pub fn has(&self, uid: &Uid) -> bool {
        self.entries.contains_key(uid)
    }

    /// Register `connection` for `profile.uid`, replacing any existing entry.
    /// Returns the displaced entry.
    pub fn add(&self, profile: TutorProfile, connection: Arc<LiveConnection>) -> Option<RegistryEntry> {
        let uid = profile.uid.clone();
        let displaced = self
            .entries
            .insert(uid.clone(), RegistryEntry { profile, connection });
        debug!(%uid, replaced = displaced.is_some(), "tutor registered");
        displaced
    }

    /// Remove the entry for `uid`, whoever owns it.
    pub fn remove(&self, uid: &Uid) -> Option<RegistryEntry> {
        self.entries.remove(uid).map(|(_, entry)| entry)
    }

    /// Remove the entry for `uid` only if `connection_id` still owns it.
    pub fn release(&self, uid: &Uid, connection_id: &ConnectionId) -> bool {
        let released = self
            .entries
            .remove_if(uid, |_, entry| entry.connection.id == *connection_id)
            .is_some();
        if released {
            debug!(%uid, %connection_id, "tutor released");
        }
        released
    }

    /// Lock serializing topic subscribe/unsubscribe decisions for `uid`.
    ///
    /// Hold it across the `has` check and the transport call so a teardown
    /// cannot unsubscribe a topic a successor connection just subscribed.
    pub fn subscription_lock(&self, uid: &Uid) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(&self.subscription_locks.entry(uid.clone()).or_default())
    }

    /// Forget the subscription lock for `uid` once nobody else holds it.
    pub fn prune_subscription_lock(&self, uid: &Uid) {
        let _ = self
            .subscription_locks
            .remove_if(uid, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// The live connection for `uid`, if any.
    #[cfg(test)]
    pub fn connection(&self, uid: &Uid) -> Option<Arc<LiveConnection>> {
        self.entries.get(uid).map(|e| Arc::clone(&e.connection))
    }

    /// Profiles of every registered tutor, ordered by uid.
    pub fn profiles(&self) -> Vec<TutorProfile> {
        let mut profiles: Vec<_> = self.entries.iter().map(|e| e.profile.clone()).collect();
        profiles.sort_by(|a, b| a.uid.cmp(&b.uid));
        profiles
    }

    /// Every registered live connection.
    pub fn connections(&self) -> Vec<Arc<LiveConnection>> {
        self.entries
            .iter()
            .map(|e| Arc::clone(&e.connection))
            .collect()
    }

    /// Number of registered tutors.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no tutor is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
