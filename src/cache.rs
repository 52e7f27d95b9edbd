//! Message reconciliation cache
//!
//! The server sends a message's content (`b`) and its final id (`u`) as two
//! separate frames that may arrive in either order. The cache pairs them by
//! pending id and publishes the message once both halves are in.
//!
//! Published messages are kept in publish order and evicted oldest-first
//! once `capacity` is exceeded.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use tracing::debug;

use crate::message::Message;

#[derive(Debug)]
pub struct MessageCache {
    capacity: usize,
    /// Content waiting for its id
    pending_content: HashMap<String, Message>,
    /// Id waiting for its content: pending id → final id
    pending_ids: HashMap<String, String>,
    published: HashMap<String, Arc<Message>>,
    /// Final ids in publish order. Removed ids stay here until skipped.
    order: VecDeque<String>,
    /// Removed ids whose slot is still in `order`
    tombstones: HashSet<String>,
}

impl MessageCache {
    /// Create a cache holding at most `capacity` published messages
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            pending_content: HashMap::new(),
            pending_ids: HashMap::new(),
            published: HashMap::new(),
            order: VecDeque::new(),
            tombstones: HashSet::new(),
        }
    }

    /// Content frame arrived
    ///
    /// Returns the published message if its id was already known.
    pub fn submit(&mut self, message: Message) -> Option<Arc<Message>> {
        match self.pending_ids.remove(&message.pending_id) {
            Some(final_id) => Some(self.promote(message, final_id)),
            None => {
                self.pending_content.insert(message.pending_id.clone(), message);
                None
            }
        }
    }

    /// Id frame arrived
    ///
    /// Returns the published message if its content was already known.
    pub fn publish(&mut self, pending_id: &str, final_id: &str) -> Option<Arc<Message>> {
        match self.pending_content.remove(pending_id) {
            Some(message) => Some(self.promote(message, final_id.to_string())),
            None => {
                self.pending_ids
                    .insert(pending_id.to_string(), final_id.to_string());
                None
            }
        }
    }

    fn promote(&mut self, mut message: Message, final_id: String) -> Arc<Message> {
        message.final_id = Some(final_id.clone());
        let message = Arc::new(message);

        if self
            .published
            .insert(final_id.clone(), Arc::clone(&message))
            .is_none()
        {
            // A re-published id must not keep its old slot.
            if self.tombstones.remove(&final_id) {
                self.order.retain(|id| *id != final_id);
            }
            self.order.push_back(final_id);
        }

        while self.published.len() > self.capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            if self.published.remove(&oldest).is_some() {
                debug!(message_id = %oldest, "evicted from message cache");
            } else {
                self.tombstones.remove(&oldest);
            }
        }

        if self.order.len() > self.capacity * 2 {
            let published = &self.published;
            self.order.retain(|id| published.contains_key(id));
            self.tombstones.clear();
        }

        message
    }

    pub fn get(&self, final_id: &str) -> Option<Arc<Message>> {
        self.published.get(final_id).cloned()
    }

    /// Drop a published message (server-side deletion)
    pub fn remove(&mut self, final_id: &str) -> Option<Arc<Message>> {
        let removed = self.published.remove(final_id)?;
        self.tombstones.insert(final_id.to_string());
        self.trim_back();
        Some(removed)
    }

    pub fn most_recent(&self) -> Option<Arc<Message>> {
        self.order.back().and_then(|id| self.published.get(id)).cloned()
    }

    /// Keep the newest live id at the back so `most_recent` is a lookup
    fn trim_back(&mut self) {
        while let Some(id) = self.order.back() {
            if self.published.contains_key(id) {
                break;
            }
            if let Some(id) = self.order.pop_back() {
                self.tombstones.remove(&id);
            }
        }
    }

    /// Forget half-received messages (on reconnect)
    pub fn clear_pending(&mut self) {
        self.pending_content.clear();
        self.pending_ids.clear();
    }

    /// Number of published messages
    pub fn len(&self) -> usize {
        self.published.len()
    }

    pub fn is_empty(&self) -> bool {
        self.published.is_empty()
    }

    pub fn pending_len(&self) -> usize {
        self.pending_content.len() + self.pending_ids.len()
    }
}
