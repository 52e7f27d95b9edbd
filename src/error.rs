//! Error types for the client
//!
//! One enum per failure class, plus `RoomError` for what reaches the caller.
//! Uses thiserror for ergonomic error definitions.

use std::fmt;

use thiserror::Error;

/// Malformed frame or command (non-fatal, logged and dropped)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// First field did not name a known command
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// A positional argument could not be parsed
    #[error("invalid `{field}` in `{command}`: {value:?}")]
    InvalidField {
        command: &'static str,
        field: &'static str,
        value: String,
    },

    /// Message body markup could not be decoded
    #[error("malformed markup: {0}")]
    Markup(String),

    /// Anonymous tag or session id is not all digits
    #[error("cannot derive anonymous name from tag {tag:?} and session {session:?}")]
    AnonymousTag { tag: String, session: String },
}

/// Handshake step, used to report which wait failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStep {
    Connect,
    Join,
    Authenticate,
    SyncPresence,
}

impl fmt::Display for HandshakeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HandshakeStep::Connect => "connect",
            HandshakeStep::Join => "join",
            HandshakeStep::Authenticate => "authenticate",
            HandshakeStep::SyncPresence => "presence sync",
        };
        f.write_str(name)
    }
}

/// Recoverable handshake failure (triggers reset and reconnect)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandshakeError {
    #[error("{0} step timed out")]
    Timeout(HandshakeStep),

    #[error("transport closed during {0} step")]
    TransportClosed(HandshakeStep),
}

/// Credential rejection (fatal to the current join attempt)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// `badlogin`: wrong name or password
    #[error("login rejected by server")]
    BadLogin,

    /// `badalias`: temporary name refused
    #[error("temporary name rejected by server")]
    BadAlias,
}

/// Underlying stream failure
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Writer task is gone (connection closed or never opened)
    #[error("connection closed")]
    Closed,
}

/// Room name hashed to no shard bucket (configuration-level fault)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShardError {
    #[error("no shard matches room name {0:?}")]
    NoMatchingShard(String),
}

/// Profile collaborator failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProfileError {
    #[error("profile unavailable: {0}")]
    Unavailable(String),
}

/// Errors surfaced to the caller of `Room` operations
#[derive(Debug, Error)]
pub enum RoomError {
    #[error("shard resolution failed: {0}")]
    Shard(#[from] ShardError),

    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Operation needs a ready session
    #[error("room is not connected")]
    NotConnected,

    /// `connect` called while another attempt is in flight
    #[error("a connect attempt is already in flight")]
    AlreadyConnecting,

    /// `disconnect` was requested while connecting
    #[error("connect cancelled by disconnect")]
    Cancelled,
}

impl RoomError {
    /// Whether the reconnect scheduler may retry after this error
    pub fn is_recoverable(&self) -> bool {
        matches!(self, RoomError::Handshake(_) | RoomError::Transport(_))
    }
}
