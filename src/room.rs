//! Room state
//!
//! Everything one session knows about its room. Owned by the session
//! behind a lock; callers get `RoomSnapshot` copies.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::cache::MessageCache;
use crate::error::ProtocolError;
use crate::identity::IdentityRegistry;
use crate::presence::Presence;
use crate::types::RoomName;

/// Handshake / lifecycle position of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Idle,
    Connecting,
    Joining,
    Authenticating,
    SyncingPresence,
    Ready,
    Disconnecting,
    Reconnecting,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Moderator {
    pub name: String,
    /// Permission bit set as sent by the server
    pub permissions: u32,
}

/// Parse `name,perm;name,perm`
pub fn parse_moderators(list: &str) -> Result<Vec<Moderator>, ProtocolError> {
    list.split(';')
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (name, perm) = entry.split_once(',').unwrap_or((entry, "0"));
            let permissions = perm.parse().map_err(|_| ProtocolError::InvalidField {
                command: "mods",
                field: "permissions",
                value: entry.to_string(),
            })?;
            Ok(Moderator {
                name: name.to_lowercase(),
                permissions,
            })
        })
        .collect()
}

/// Mutable state of one joined room
#[derive(Debug)]
pub struct RoomState {
    pub name: RoomName,
    pub hostname: String,
    pub session_id: String,
    pub owner: String,
    /// Login status letter from the join ack
    pub session_status: String,
    /// Address reported in the join ack
    pub server_ip: String,
    pub server_id: String,
    /// Server clock, epoch seconds
    pub server_time: f64,
    /// Raw `serverTime` text, kept for anonymous tag derivation
    pub server_time_raw: String,
    pub participant_count: u32,
    pub unregistered_count: u32,
    pub moderators: BTreeMap<String, Moderator>,
    pub presence: Presence,
    /// Set once the first participant list is applied
    pub presence_synced: bool,
    pub cache: MessageCache,
    pub identities: IdentityRegistry,
    pub connection_state: ConnectionState,
}

impl RoomState {
    pub fn new(name: RoomName, hostname: String, cache_capacity: usize) -> Self {
        Self {
            name,
            hostname,
            session_id: String::new(),
            owner: String::new(),
            session_status: String::new(),
            server_ip: String::new(),
            server_id: String::new(),
            server_time: 0.0,
            server_time_raw: String::new(),
            participant_count: 0,
            unregistered_count: 0,
            moderators: BTreeMap::new(),
            presence: Presence::new(),
            presence_synced: false,
            cache: MessageCache::new(cache_capacity),
            identities: IdentityRegistry::new(),
            connection_state: ConnectionState::Idle,
        }
    }

    /// Drop everything tied to the current connection
    ///
    /// Published messages survive so ids stay resolvable across reconnects.
    pub fn reset(&mut self) {
        self.session_id.clear();
        self.owner.clear();
        self.session_status.clear();
        self.server_ip.clear();
        self.server_id.clear();
        self.server_time = 0.0;
        self.server_time_raw.clear();
        self.participant_count = 0;
        self.unregistered_count = 0;
        self.moderators.clear();
        self.presence.clear();
        self.presence_synced = false;
        self.cache.clear_pending();
        self.identities.prune();
    }

    pub fn set_moderators(&mut self, moderators: Vec<Moderator>) {
        self.moderators = moderators
            .into_iter()
            .map(|m| (m.name.clone(), m))
            .collect();
    }

    pub fn is_moderator(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        self.owner == name || self.moderators.contains_key(&name)
    }

    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            name: self.name.clone(),
            hostname: self.hostname.clone(),
            session_id: self.session_id.clone(),
            owner: self.owner.clone(),
            server_ip: self.server_ip.clone(),
            server_id: self.server_id.clone(),
            server_time: self.server_time,
            participant_count: self.participant_count,
            member_count: self.presence.len(),
            moderators: self.moderators.values().cloned().collect(),
            connection_state: self.connection_state,
        }
    }
}

/// Read-only copy of room state for callers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoomSnapshot {
    pub name: RoomName,
    pub hostname: String,
    pub session_id: String,
    pub owner: String,
    pub server_ip: String,
    pub server_id: String,
    pub server_time: f64,
    pub participant_count: u32,
    pub member_count: usize,
    pub moderators: Vec<Moderator>,
    pub connection_state: ConnectionState,
}
