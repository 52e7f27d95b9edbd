//! Chatango Group Chat Client Library
//!
//! A protocol engine for Chatango group rooms over raw TCP, built on tokio.
//!
//! # Features
//! - Shard resolution (room name → chat server hostname)
//! - Null-terminated frame transport with keepalive
//! - Anonymous, temporary and registered identities
//! - Message markup decoding and encoding
//! - Message id reconciliation (content and id frames in any order)
//! - Presence tracking with multiple connections per identity
//! - Moderation: delete, delete-all, ban, unban
//! - Automatic reconnect
//!
//! # Architecture
//! One `Room` per room + identity pairing:
//! - A reader task turns frames into `Command`s and runs their handlers
//!   against the room state
//! - A writer task drains the outbound channel and sends keepalives
//! - The caller receives `RoomEvent`s over an `mpsc` channel
//!
//! # Example
//! ```ignore
//! use chatango_client::{Identity, Room, RoomConfig, RoomEvent};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let identity = Identity::temporary("visitor");
//!     let (room, mut events) = Room::new("khouwe", identity, RoomConfig::default())?;
//!     room.connect().await?;
//!     room.send_message("hello")?;
//!
//!     while let Some(event) = events.recv().await {
//!         if let RoomEvent::Message { message } = event {
//!             println!("{}", message);
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod command;
pub mod config;
pub mod error;
pub mod event;
pub mod frame;
mod handler;
pub mod identity;
pub mod markup;
pub mod message;
pub mod presence;
pub mod room;
pub mod session;
pub mod shard;
pub mod signal;
pub mod style;
pub mod transport;
pub mod types;

// Re-export main types for convenience
pub use config::RoomConfig;
pub use error::{AuthError, HandshakeError, ProtocolError, RoomError, ShardError, TransportError};
pub use event::{Ban, ErrorCode, RoomEvent};
pub use identity::{Identity, IdentityKind, ProfileSource};
pub use message::Message;
pub use room::{ConnectionState, Moderator, RoomSnapshot};
pub use session::Room;
pub use style::{FontFamily, Style};
pub use transport::{BoxedStream, Connector, TcpConnector};
pub use types::{RoomName, SessionKey};
