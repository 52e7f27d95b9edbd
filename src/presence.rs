//! Room presence
//!
//! One identity may be connected several times (tabs, devices). Membership
//! is keyed by lowercase name; an identity is a member exactly while it has
//! at least one connection id.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::identity::Identity;

#[derive(Debug, Clone)]
pub enum PresenceChange {
    Joined(Arc<Identity>),
    Left(Arc<Identity>),
}

#[derive(Debug)]
struct Member {
    identity: Arc<Identity>,
    connections: HashSet<String>,
}

#[derive(Debug, Default)]
pub struct Presence {
    members: HashMap<String, Member>,
    /// connection id → member name
    connections: HashMap<String, String>,
}

impl Presence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection for `identity`
    ///
    /// Reports `Joined` when this is the identity's first connection. A
    /// connection id already held by another identity is moved, which may
    /// report `Left` for that identity first.
    pub fn join(&mut self, identity: &Arc<Identity>, connection_id: &str) -> Vec<PresenceChange> {
        let name = identity.name();
        let mut changes = Vec::new();

        if let Some(owner) = self.connections.get(connection_id) {
            if *owner == name {
                return changes;
            }
            let owner = owner.clone();
            if let Some(left) = self.drop_connection(&owner, connection_id) {
                changes.push(PresenceChange::Left(left));
            }
        }

        self.connections
            .insert(connection_id.to_string(), name.clone());
        let member = self.members.entry(name).or_insert_with(|| Member {
            identity: Arc::clone(identity),
            connections: HashSet::new(),
        });
        let first = member.connections.is_empty();
        member.connections.insert(connection_id.to_string());
        if first {
            changes.push(PresenceChange::Joined(Arc::clone(&member.identity)));
        }
        changes
    }

    /// Remove a connection
    ///
    /// The connection's recorded owner takes precedence over `name`.
    /// Returns the identity if that was its last connection.
    pub fn leave(&mut self, name: &str, connection_id: &str) -> Option<Arc<Identity>> {
        let owner = self
            .connections
            .get(connection_id)
            .cloned()
            .unwrap_or_else(|| name.to_lowercase());
        self.drop_connection(&owner, connection_id)
    }

    fn drop_connection(&mut self, name: &str, connection_id: &str) -> Option<Arc<Identity>> {
        let member = self.members.get_mut(name)?;
        if !member.connections.remove(connection_id) {
            return None;
        }
        self.connections.remove(connection_id);
        if member.connections.is_empty() {
            return self.members.remove(name).map(|m| m.identity);
        }
        None
    }

    /// Identity currently holding a connection id
    pub fn owner_of(&self, connection_id: &str) -> Option<Arc<Identity>> {
        let name = self.connections.get(connection_id)?;
        self.members.get(name).map(|m| Arc::clone(&m.identity))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.members.contains_key(&name.to_lowercase())
    }

    pub fn get(&self, name: &str) -> Option<Arc<Identity>> {
        self.members
            .get(&name.to_lowercase())
            .map(|m| Arc::clone(&m.identity))
    }

    pub fn connection_count(&self, name: &str) -> usize {
        self.members
            .get(&name.to_lowercase())
            .map_or(0, |m| m.connections.len())
    }

    pub fn members(&self) -> Vec<Arc<Identity>> {
        self.members.values().map(|m| Arc::clone(&m.identity)).collect()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn clear(&mut self) {
        self.members.clear();
        self.connections.clear();
    }
}
