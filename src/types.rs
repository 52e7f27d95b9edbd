//! Basic type definitions for the client
//!
//! Provides newtype wrappers for type safety:
//! - `SessionKey`: UUID-based local identifier for one `Room` instance
//! - `RoomName`: lowercase room name as the server knows it

use serde::Serialize;
use uuid::Uuid;

/// Local identifier for one room session (newtype pattern)
///
/// Never sent on the wire. Used to tell concurrent sessions apart in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SessionKey(pub Uuid);

impl SessionKey {
    /// Create a new random session key
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionKey {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Room name (lowercase)
///
/// Chatango room names are case-insensitive; the server and the shard
/// table both work on the lowercase form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct RoomName(pub String);

impl RoomName {
    /// Create a RoomName from user input (trims and lowercases)
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(name.as_ref().trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RoomName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_key_unique() {
        let a = SessionKey::new();
        let b = SessionKey::new();
        assert_ne!(a, b);
    }

    #[test]
    fn test_room_name_lowercase() {
        let name = RoomName::new("  PythonRPG ");
        assert_eq!(name.as_str(), "pythonrpg");
    }
}
