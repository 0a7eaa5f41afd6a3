//! JSON wire protocol for room synchronization.
//!
//! Every WebSocket text frame carries one envelope:
//! ```text
//! { "event": "<name>", "data": { ...payload... } }
//! ```
//!
//! Inbound (client → server): `join`, `code:update`, `cursor:update`, `disconnect`.
//! Outbound (server → client): `room:state`, `code:updated`, `cursor:updated`.
//!
//! Decoding validates required fields, so anything that comes out of
//! [`ClientEvent::decode`] is safe to hand to the router.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of one live connection, stable for its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing id (for testing)
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Document language tag. Only these two tags are accepted on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    Javascript,
    Typescript,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Javascript => "javascript",
            Self::Typescript => "typescript",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Editor cursor position. Not checked against the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub line: u32,
    pub column: u32,
}

impl Cursor {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

// ───────────────────────────────────────────────────────────────────
// Inbound
// ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoom {
    pub room_id: String,
    pub nickname: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeUpdate {
    pub room_id: String,
    pub code: String,
    pub language: Language,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorUpdate {
    pub room_id: String,
    pub cursor: Cursor,
}

/// Event sent by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "join")]
    Join(JoinRoom),
    #[serde(rename = "code:update")]
    CodeUpdate(CodeUpdate),
    #[serde(rename = "cursor:update")]
    CursorUpdate(CursorUpdate),
    /// Explicit leave; the transport also synthesizes this on close.
    #[serde(rename = "disconnect")]
    Disconnect,
}

impl ClientEvent {
    pub fn join(room_id: impl Into<String>, nickname: impl Into<String>) -> Self {
        Self::Join(JoinRoom {
            room_id: room_id.into(),
            nickname: nickname.into(),
        })
    }

    pub fn code_update(room_id: impl Into<String>, code: impl Into<String>, language: Language) -> Self {
        Self::CodeUpdate(CodeUpdate {
            room_id: room_id.into(),
            code: code.into(),
            language,
        })
    }

    pub fn cursor_update(room_id: impl Into<String>, cursor: Cursor) -> Self {
        Self::CursorUpdate(CursorUpdate {
            room_id: room_id.into(),
            cursor,
        })
    }

    /// Wire name of this event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Join(_) => "join",
            Self::CodeUpdate(_) => "code:update",
            Self::CursorUpdate(_) => "cursor:update",
            Self::Disconnect => "disconnect",
        }
    }

    /// Parse and validate one text frame.
    ///
    /// A `disconnect` carries no payload; whatever `data` it arrives with
    /// is ignored.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        if value.get("event").and_then(serde_json::Value::as_str) == Some("disconnect") {
            return Ok(Self::Disconnect);
        }
        let event: Self =
            serde_json::from_value(value).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        event.validate()?;
        Ok(event)
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// Reject events whose room key is empty.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        let room_id = match self {
            Self::Join(join) => &join.room_id,
            Self::CodeUpdate(update) => &update.room_id,
            Self::CursorUpdate(update) => &update.room_id,
            Self::Disconnect => return Ok(()),
        };
        if room_id.is_empty() {
            return Err(ProtocolError::MissingField("roomId"));
        }
        Ok(())
    }
}

// ───────────────────────────────────────────────────────────────────
// Outbound
// ───────────────────────────────────────────────────────────────────

/// One member as seen in a `room:state` snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPresence {
    pub connection_id: ConnectionId,
    pub nickname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<Cursor>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomSnapshot {
    pub code: String,
    pub language: Language,
    pub users: Vec<UserPresence>,
}

impl RoomSnapshot {
    pub fn user(&self, connection_id: ConnectionId) -> Option<&UserPresence> {
        self.users.iter().find(|u| u.connection_id == connection_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeUpdated {
    pub code: String,
    pub language: Language,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorUpdated {
    pub connection_id: ConnectionId,
    pub cursor: Cursor,
}

/// Event sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "room:state")]
    RoomState(RoomSnapshot),
    #[serde(rename = "code:updated")]
    CodeUpdated(CodeUpdated),
    #[serde(rename = "cursor:updated")]
    CursorUpdated(CursorUpdated),
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::RoomState(_) => "room:state",
            Self::CodeUpdated(_) => "code:updated",
            Self::CursorUpdated(_) => "cursor:updated",
        }
    }

    /// Serialize once for fan-out; every recipient shares the same frame.
    pub fn encode(&self) -> Result<Frame, ProtocolError> {
        serde_json::to_string(self)
            .map(Frame::from)
            .map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }
}

/// Pre-encoded outbound text frame.
pub type Frame = Arc<str>;

/// Protocol errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed event: {0}")]
    Malformed(String),
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("connection closed")]
    ConnectionClosed,
    #[error("not in a room, join one first")]
    NotJoined,
}
