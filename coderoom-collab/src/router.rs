//! Event router: applies inbound events to room state and fans out results.
//!
//! Every handler takes the room's lock, mutates, broadcasts, and only then
//! releases it. Two updates to one room therefore reach every member in the
//! order they were applied; different rooms never contend.
//!
//! ```text
//! join          ─► leave previous room ─► get_or_create ─► insert presence ─► room:state (all)
//! code:update   ─► get ─► set document ─────────────────────────────────────► code:updated (others)
//! cursor:update ─► get ─► set cursor (members only) ────────────────────────► cursor:updated (others)
//! disconnect    ─► registry lookup ─► remove presence ─► destroy | room:state (remaining)
//! ```

use tokio::sync::mpsc;

use crate::broadcast::{BroadcastStats, Broadcaster};
use crate::protocol::{
    ClientEvent, CodeUpdate, CodeUpdated, ConnectionId, CursorUpdate, CursorUpdated, JoinRoom,
    ServerEvent,
};
use crate::registry::{ConnectionRegistry, FrameReceiver};
use crate::room::{Presence, Room};
use crate::store::RoomStore;

pub struct EventRouter {
    store: RoomStore,
    registry: ConnectionRegistry,
    broadcaster: Broadcaster,
    /// 0 = unlimited
    max_members_per_room: usize,
}

impl EventRouter {
    pub fn new(store: RoomStore, max_members_per_room: usize) -> Self {
        let registry = ConnectionRegistry::new();
        Self {
            store,
            broadcaster: Broadcaster::new(registry.clone()),
            registry,
            max_members_per_room,
        }
    }

    /// Default rooms, no member limit.
    pub fn with_defaults() -> Self {
        Self::new(RoomStore::default(), 0)
    }

    /// Register a new connection and hand back its outbound frame queue.
    pub async fn connect(&self) -> (ConnectionId, FrameReceiver) {
        let connection_id = ConnectionId::new();
        let (tx, rx) = mpsc::unbounded_channel();
        self.registry.register(connection_id, tx).await;
        log::debug!("Connection {connection_id} registered");
        (connection_id, rx)
    }

    /// Route one validated event. Returns whether it changed any state.
    pub async fn handle(&self, connection_id: ConnectionId, event: ClientEvent) -> bool {
        match event {
            ClientEvent::Join(join) => self.join(connection_id, join).await,
            ClientEvent::CodeUpdate(update) => self.code_update(connection_id, update).await,
            ClientEvent::CursorUpdate(update) => self.cursor_update(connection_id, update).await,
            ClientEvent::Disconnect => self.disconnect(connection_id).await,
        }
    }

    /// Join (or re-join) a room.
    ///
    /// A connection is in at most one room: joining a different room first
    /// runs the same leave path as a disconnect against the previous one.
    pub async fn join(&self, connection_id: ConnectionId, join: JoinRoom) -> bool {
        if !self.registry.is_registered(&connection_id).await {
            log::debug!("Ignoring join from unknown connection {connection_id}");
            return false;
        }

        if let Some(previous) = self.registry.get_room(&connection_id).await {
            if previous != join.room_id {
                self.leave_room(&connection_id, &previous).await;
            }
        }

        loop {
            let shared = self.store.get_or_create(&join.room_id).await;
            let mut room = shared.lock().await;
            if room.is_closed() {
                // Emptied and unlinked while we waited; the next lookup yields a fresh room.
                continue;
            }

            if self.is_full(&room, &connection_id) {
                log::warn!(
                    "Rejecting join of {} ({connection_id}) to room {}: {} members",
                    join.nickname,
                    join.room_id,
                    room.member_count()
                );
                return false;
            }

            room.insert_member(connection_id, Presence::new(join.nickname.as_str()));
            self.registry.set_room(&connection_id, join.room_id.as_str()).await;

            let state = ServerEvent::RoomState(room.snapshot());
            self.send(&room, &state, None).await;

            log::info!(
                "{} ({connection_id}) joined room {} [{} member(s)]",
                join.nickname,
                join.room_id,
                room.member_count()
            );
            return true;
        }
    }

    /// Replace the room's document. Only members of an existing room may write.
    pub async fn code_update(&self, connection_id: ConnectionId, update: CodeUpdate) -> bool {
        let Some(shared) = self.store.get(&update.room_id).await else {
            log::debug!("Dropping code:update for unknown room {}", update.room_id);
            return false;
        };
        let mut room = shared.lock().await;
        if room.is_closed() || !room.is_member(&connection_id) {
            log::debug!(
                "Dropping code:update from non-member {connection_id} of room {}",
                update.room_id
            );
            return false;
        }

        room.set_document(update.code.as_str(), update.language);
        let event = ServerEvent::CodeUpdated(CodeUpdated {
            code: update.code,
            language: update.language,
        });
        self.send(&room, &event, Some(&connection_id)).await;
        true
    }

    /// Move the sender's cursor. No-op unless the sender is present in the room.
    pub async fn cursor_update(&self, connection_id: ConnectionId, update: CursorUpdate) -> bool {
        let Some(shared) = self.store.get(&update.room_id).await else {
            log::debug!("Dropping cursor:update for unknown room {}", update.room_id);
            return false;
        };
        let mut room = shared.lock().await;
        if room.is_closed() || !room.set_cursor(&connection_id, update.cursor) {
            log::debug!(
                "Dropping cursor:update from non-member {connection_id} of room {}",
                update.room_id
            );
            return false;
        }

        log::trace!(
            "Cursor of {connection_id} in room {} -> {}:{}",
            update.room_id,
            update.cursor.line,
            update.cursor.column
        );
        let event = ServerEvent::CursorUpdated(CursorUpdated {
            connection_id,
            cursor: update.cursor,
        });
        self.send(&room, &event, Some(&connection_id)).await;
        true
    }

    /// Forget the connection and leave its room, if any.
    pub async fn disconnect(&self, connection_id: ConnectionId) -> bool {
        let room_key = self.registry.unregister(&connection_id).await;
        log::debug!("Connection {connection_id} unregistered");
        match room_key {
            Some(room_key) => self.leave_room(&connection_id, &room_key).await,
            None => false,
        }
    }

    /// Remove the connection's presence from `room_key`.
    ///
    /// The last member out destroys the room; otherwise the remaining
    /// members get a fresh `room:state`.
    async fn leave_room(&self, connection_id: &ConnectionId, room_key: &str) -> bool {
        let left = match self.store.get(room_key).await {
            Some(shared) => {
                let mut room = shared.lock().await;
                if room.is_closed() || room.remove_member(connection_id).is_none() {
                    false
                } else if room.is_empty() {
                    // Unlink before releasing the lock so no join can land in a dead room.
                    room.close();
                    self.store.remove_if_same(room_key, &shared).await;
                    log::info!("Room {room_key} removed (empty)");
                    true
                } else {
                    let state = ServerEvent::RoomState(room.snapshot());
                    self.send(&room, &state, None).await;
                    log::info!(
                        "{connection_id} left room {room_key} [{} member(s)]",
                        room.member_count()
                    );
                    true
                }
            }
            None => false,
        };
        self.registry.clear(connection_id).await;
        left
    }

    fn is_full(&self, room: &Room, connection_id: &ConnectionId) -> bool {
        self.max_members_per_room > 0
            && !room.is_member(connection_id)
            && room.member_count() >= self.max_members_per_room
    }

    async fn send(&self, room: &Room, event: &ServerEvent, exclude: Option<&ConnectionId>) {
        if let Err(e) = self.broadcaster.broadcast_to_room(room, event, exclude).await {
            log::error!("Failed to broadcast {} to room {}: {e}", event.name(), room.key());
        }
    }

    pub fn store(&self) -> &RoomStore {
        &self.store
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn broadcast_stats(&self) -> BroadcastStats {
        self.broadcaster.stats()
    }

    pub fn max_members_per_room(&self) -> usize {
        self.max_members_per_room
    }
}
