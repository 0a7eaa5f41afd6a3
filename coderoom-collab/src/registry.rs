//! Connection registry: which live connection belongs to which room.
//!
//! Holds each connection's outbound channel and at most one room key.
//! It never holds a `Room`, so destroying a room cannot leave a
//! dangling handle here.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

use crate::protocol::{ConnectionId, Frame};

/// Outbound half of a connection's frame queue.
pub type FrameSender = mpsc::UnboundedSender<Frame>;
/// Inbound half, drained by the connection's writer.
pub type FrameReceiver = mpsc::UnboundedReceiver<Frame>;

struct ConnectionEntry {
    sender: FrameSender,
    room: Option<String>,
}

#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<RwLock<HashMap<ConnectionId, ConnectionEntry>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new live connection (not yet in any room).
    pub async fn register(&self, connection_id: ConnectionId, sender: FrameSender) {
        let mut connections = self.connections.write().await;
        connections.insert(connection_id, ConnectionEntry { sender, room: None });
    }

    /// Forget a connection entirely. Returns the room it was in, if any.
    pub async fn unregister(&self, connection_id: &ConnectionId) -> Option<String> {
        let mut connections = self.connections.write().await;
        connections.remove(connection_id).and_then(|entry| entry.room)
    }

    /// Record room membership. No-op for unknown connections.
    pub async fn set_room(&self, connection_id: &ConnectionId, room_key: impl Into<String>) {
        let mut connections = self.connections.write().await;
        if let Some(entry) = connections.get_mut(connection_id) {
            entry.room = Some(room_key.into());
        }
    }

    pub async fn get_room(&self, connection_id: &ConnectionId) -> Option<String> {
        let connections = self.connections.read().await;
        connections.get(connection_id).and_then(|entry| entry.room.clone())
    }

    /// Drop the room association but keep the connection registered.
    pub async fn clear(&self, connection_id: &ConnectionId) {
        let mut connections = self.connections.write().await;
        if let Some(entry) = connections.get_mut(connection_id) {
            entry.room = None;
        }
    }

    pub async fn sender(&self, connection_id: &ConnectionId) -> Option<FrameSender> {
        let connections = self.connections.read().await;
        connections.get(connection_id).map(|entry| entry.sender.clone())
    }

    /// Resolve outbound channels for a set of connections in one lock.
    pub async fn senders<'a, I>(&self, connection_ids: I) -> Vec<(ConnectionId, FrameSender)>
    where
        I: IntoIterator<Item = &'a ConnectionId>,
    {
        let connections = self.connections.read().await;
        connection_ids
            .into_iter()
            .filter_map(|id| connections.get(id).map(|entry| (*id, entry.sender.clone())))
            .collect()
    }

    pub async fn is_registered(&self, connection_id: &ConnectionId) -> bool {
        self.connections.read().await.contains_key(connection_id)
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_and_unregister() {
        let registry = ConnectionRegistry::new();
        let id = ConnectionId::new();
        let (tx, _rx) = mpsc::unbounded_channel();

        registry.register(id, tx).await;
        assert!(registry.is_registered(&id).await);
        assert_eq!(registry.connection_count().await, 1);
        assert_eq!(registry.get_room(&id).await, None);

        assert_eq!(registry.unregister(&id).await, None);
        assert!(!registry.is_registered(&id).await);
        assert_eq!(registry.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_room_association() {
        let registry = ConnectionRegistry::new();
        let id = ConnectionId::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        registry.register(id, tx).await;

        registry.set_room(&id, "demo").await;
        assert_eq!(registry.get_room(&id).await.as_deref(), Some("demo"));

        registry.set_room(&id, "other").await;
        assert_eq!(registry.get_room(&id).await.as_deref(), Some("other"));

        registry.clear(&id).await;
        assert_eq!(registry.get_room(&id).await, None);
        assert!(registry.is_registered(&id).await);
    }

    #[tokio::test]
    async fn test_unregister_returns_room() {
        let registry = ConnectionRegistry::new();
        let id = ConnectionId::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        registry.register(id, tx).await;
        registry.set_room(&id, "demo").await;

        assert_eq!(registry.unregister(&id).await.as_deref(), Some("demo"));
    }

    #[tokio::test]
    async fn test_set_room_unknown_connection_is_noop() {
        let registry = ConnectionRegistry::new();
        let id = ConnectionId::new();
        registry.set_room(&id, "demo").await;
        assert_eq!(registry.get_room(&id).await, None);
        assert_eq!(registry.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_senders_skip_unknown() {
        let registry = ConnectionRegistry::new();
        let known = ConnectionId::new();
        let unknown = ConnectionId::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.register(known, tx).await;

        let senders = registry.senders([&known, &unknown]).await;
        assert_eq!(senders.len(), 1);
        assert_eq!(senders[0].0, known);

        senders[0].1.send(Frame::from("hello")).unwrap();
        assert_eq!(&*rx.recv().await.unwrap(), "hello");
    }
}
