//! Room store: room key → shared room state.
//!
//! Rooms are created lazily on first join and removed as soon as their
//! last member leaves. Creation is double-checked under the write lock, so
//! concurrent `get_or_create` calls for one key always agree on one room.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use crate::protocol::Language;
use crate::room::{Room, DEFAULT_DOCUMENT};

/// Handle to one room. The mutex is the room's serialization scope.
pub type SharedRoom = Arc<Mutex<Room>>;

pub struct RoomStore {
    rooms: RwLock<HashMap<String, SharedRoom>>,
    default_document: String,
    default_language: Language,
}

impl RoomStore {
    pub fn new(default_document: impl Into<String>, default_language: Language) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            default_document: default_document.into(),
            default_language,
        }
    }

    /// Get the room for `room_key`, creating a fresh default room if absent.
    pub async fn get_or_create(&self, room_key: &str) -> SharedRoom {
        // Fast path: read lock
        {
            let rooms = self.rooms.read().await;
            if let Some(room) = rooms.get(room_key) {
                return room.clone();
            }
        }

        let mut rooms = self.rooms.write().await;
        // Double-check after acquiring write lock
        if let Some(room) = rooms.get(room_key) {
            return room.clone();
        }

        let room = Arc::new(Mutex::new(Room::new(
            room_key,
            self.default_document.as_str(),
            self.default_language,
        )));
        rooms.insert(room_key.to_string(), room.clone());
        log::debug!("Room {room_key} created");
        room
    }

    /// Non-creating lookup.
    pub async fn get(&self, room_key: &str) -> Option<SharedRoom> {
        self.rooms.read().await.get(room_key).cloned()
    }

    /// Delete the entry for `room_key`. No-op if absent.
    pub async fn remove(&self, room_key: &str) -> bool {
        self.rooms.write().await.remove(room_key).is_some()
    }

    /// Delete the entry only if it is still `room`.
    ///
    /// Guards against removing a room that was recreated under the same key.
    pub async fn remove_if_same(&self, room_key: &str, room: &SharedRoom) -> bool {
        let mut rooms = self.rooms.write().await;
        match rooms.get(room_key) {
            Some(current) if Arc::ptr_eq(current, room) => {
                rooms.remove(room_key);
                true
            }
            _ => false,
        }
    }

    pub async fn contains(&self, room_key: &str) -> bool {
        self.rooms.read().await.contains_key(room_key)
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn room_keys(&self) -> Vec<String> {
        self.rooms.read().await.keys().cloned().collect()
    }
}

impl Default for RoomStore {
    fn default() -> Self {
        Self::new(DEFAULT_DOCUMENT, Language::default())
    }
}
