//! Events surfaced to the caller
//!
//! Serde's tagged enum gives each event a `type` field when printed as
//! JSON.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::AuthError;
use crate::identity::Identity;
use crate::message::Message;
use crate::room::Moderator;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoomEvent {
    /// Handshake finished, session is ready
    Connect,
    /// Connection lost or closed
    Disconnect,
    Message { message: Arc<Message> },
    Join { identity: Arc<Identity> },
    Leave { identity: Arc<Identity> },
    ModUpdate { moderators: Vec<Moderator> },
    Ban { ban: Ban },
    Unban { ban: Ban },
    /// `message` is `None` when the id was not cached
    MessageDelete {
        message_id: String,
        message: Option<Arc<Message>>,
    },
    SpamBanWarning,
    SpamBan,
    FloodBanWarning,
    FloodBan { seconds_remaining: u32 },
    FloodBanTimeout { seconds_remaining: u32 },
    Error { code: ErrorCode, message: String },
}

/// A block record from `blocked` / `unblocked`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ban {
    pub unique_id: String,
    pub ip: String,
    pub name: String,
    pub session_id: String,
    pub server_time: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Server throttled a request (`climited`)
    RateLimited,
    /// `badalias`
    NameRejected,
    /// `badlogin`
    LoginRejected,
}

impl From<&AuthError> for RoomEvent {
    fn from(err: &AuthError) -> Self {
        let code = match err {
            AuthError::BadLogin => ErrorCode::LoginRejected,
            AuthError::BadAlias => ErrorCode::NameRejected,
        };
        RoomEvent::Error {
            code,
            message: err.to_string(),
        }
    }
}

/// Ordered event emitter
///
/// Sends wait for channel space, so a slow consumer slows the reader task
/// down instead of losing events. Keep draining the receiver.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<RoomEvent>,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<RoomEvent>) -> Self {
        Self { tx }
    }

    pub async fn emit(&self, event: RoomEvent) {
        if self.tx.send(event).await.is_err() {
            debug!("event channel closed, receiver dropped");
        }
    }

    /// Emit a batch in order
    pub async fn emit_all(&self, events: Vec<RoomEvent>) {
        for event in events {
            self.emit(event).await;
        }
    }
}
