//! Per-room state: one shared document plus the presence of each member.

use std::collections::HashMap;

use crate::protocol::{ConnectionId, Cursor, Language, RoomSnapshot, UserPresence};

/// Document every new room starts with.
pub const DEFAULT_DOCUMENT: &str =
    "// Welcome to CodeRoom AI\nfunction hello(name) {\n  return `Hello, ${name}!`;\n}\n";

/// A member's presence inside one room.
#[derive(Debug, Clone, PartialEq)]
pub struct Presence {
    pub nickname: String,
    /// None until the member's first cursor event.
    pub cursor: Option<Cursor>,
}

impl Presence {
    pub fn new(nickname: impl Into<String>) -> Self {
        Self {
            nickname: nickname.into(),
            cursor: None,
        }
    }
}

/// Authoritative state of one room.
///
/// Only reachable through [`crate::store::RoomStore`] and mutated under the
/// room's lock.
#[derive(Debug)]
pub struct Room {
    key: String,
    document: String,
    language: Language,
    members: HashMap<ConnectionId, Presence>,
    /// Set once the last member leaves; a closed room is never reused.
    closed: bool,
}

impl Room {
    pub fn new(key: impl Into<String>, document: impl Into<String>, language: Language) -> Self {
        Self {
            key: key.into(),
            document: document.into(),
            language,
            members: HashMap::new(),
            closed: false,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn document(&self) -> &str {
        &self.document
    }

    pub fn language(&self) -> Language {
        self.language
    }

    /// Last writer wins.
    pub fn set_document(&mut self, code: impl Into<String>, language: Language) {
        self.document = code.into();
        self.language = language;
    }

    /// Insert or overwrite this connection's presence.
    pub fn insert_member(&mut self, connection_id: ConnectionId, presence: Presence) -> Option<Presence> {
        self.members.insert(connection_id, presence)
    }

    pub fn remove_member(&mut self, connection_id: &ConnectionId) -> Option<Presence> {
        self.members.remove(connection_id)
    }

    pub fn member(&self, connection_id: &ConnectionId) -> Option<&Presence> {
        self.members.get(connection_id)
    }

    pub fn is_member(&self, connection_id: &ConnectionId) -> bool {
        self.members.contains_key(connection_id)
    }

    /// Returns false if the connection has no presence here.
    pub fn set_cursor(&mut self, connection_id: &ConnectionId, cursor: Cursor) -> bool {
        match self.members.get_mut(connection_id) {
            Some(presence) => {
                presence.cursor = Some(cursor);
                true
            }
            None => false,
        }
    }

    pub fn member_ids(&self) -> impl Iterator<Item = &ConnectionId> {
        self.members.keys()
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn close(&mut self) {
        self.closed = true;
    }

    /// Full state as sent in `room:state`.
    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            code: self.document.clone(),
            language: self.language,
            users: self
                .members
                .iter()
                .map(|(id, presence)| UserPresence {
                    connection_id: *id,
                    nickname: presence.nickname.clone(),
                    cursor: presence.cursor,
                })
                .collect(),
        }
    }
}
