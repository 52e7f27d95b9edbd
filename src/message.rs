//! Chat message records
//!
//! A `Message` is built when a `b` content frame arrives. Its final id is
//! attached later by the reconciliation cache when the matching `u` frame
//! shows up.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::command::MessageContent;
use crate::error::ProtocolError;
use crate::identity::{anon_name, Identity, IdentityKind, IdentityRegistry, DEFAULT_ANON_TAG};
use crate::markup::parse_markup;
use crate::style::Style;
use crate::types::RoomName;

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    /// Provisional id from the content frame
    pub pending_id: String,
    /// Server id, set on publication
    pub final_id: Option<String>,
    pub identity: Arc<Identity>,
    pub room: RoomName,
    pub created_at: DateTime<Utc>,
    pub body: String,
    pub style: Style,
    /// Sender connection id, used by `delallmsg` and `block`
    pub unique_id: String,
    /// Sender IP, only visible to moderators
    pub origin_ip: String,
    #[serde(skip)]
    pub raw: String,
}

impl Message {
    /// Build a message from a decoded `b` frame
    ///
    /// The sender is looked up (or created) in `registry`: a registered
    /// name wins, then a temporary name, then the anonymous name derived
    /// from the body's `<n####/>` tag and the sender's session id.
    pub fn decode(
        room: &RoomName,
        content: &MessageContent,
        registry: &mut IdentityRegistry,
    ) -> Result<Self, ProtocolError> {
        let parsed = parse_markup(&content.raw)?;

        let identity = if !content.name.is_empty() {
            registry.resolve(&content.name, IdentityKind::Registered)
        } else if !content.temp_name.is_empty() {
            registry.resolve(&content.temp_name, IdentityKind::Temporary)
        } else {
            let tag = parsed.anon_tag.as_deref().unwrap_or(DEFAULT_ANON_TAG);
            let name = anon_name(tag, &content.session_id)?;
            registry.resolve(&name, IdentityKind::Anonymous)
        };
        identity.set_origin_ip(&content.ip);

        let created_at = timestamp_from_secs(&content.created_at).ok_or_else(|| {
            ProtocolError::InvalidField {
                command: "b",
                field: "created_at",
                value: content.created_at.clone(),
            }
        })?;

        Ok(Self {
            pending_id: content.pending_id.clone(),
            final_id: None,
            identity,
            room: room.clone(),
            created_at,
            body: parsed.body,
            style: parsed.style,
            unique_id: content.unique_id.clone(),
            origin_ip: content.ip.clone(),
            raw: content.raw.clone(),
        })
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.identity.name(), self.body)
    }
}

/// Server timestamps are fractional epoch seconds
pub(crate) fn timestamp_from_secs(value: &str) -> Option<DateTime<Utc>> {
    let secs: f64 = value.trim().parse().ok()?;
    if !secs.is_finite() {
        return None;
    }
    DateTime::<Utc>::from_timestamp_millis((secs * 1000.0).round() as i64)
}
