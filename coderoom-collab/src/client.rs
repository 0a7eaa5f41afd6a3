//! WebSocket client for the collaboration server.
//!
//! Provides:
//! - Connection lifecycle (connect, disconnect)
//! - Join / code / cursor events
//! - Decoded server events on a channel

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;

use crate::error::Result;
use crate::protocol::{ClientEvent, Cursor, Language, ProtocolError, ServerEvent};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events emitted by the client.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// Connection established
    Connected,
    /// Connection lost or closed
    Disconnected,
    /// A server event for the room we are in
    Server(ServerEvent),
}

/// The collaboration client.
///
/// Owns a writer task that drains an outgoing queue onto the socket and a
/// reader task that decodes server frames into [`SyncEvent`]s.
pub struct CollabClient {
    server_url: String,
    /// Room joined most recently
    room_id: Option<String>,
    state: Arc<RwLock<ConnectionState>>,
    outgoing_tx: Option<mpsc::UnboundedSender<Message>>,
    event_rx: Option<mpsc::UnboundedReceiver<SyncEvent>>,
    event_tx: mpsc::UnboundedSender<SyncEvent>,
}

impl CollabClient {
    pub fn new(server_url: impl Into<String>) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            server_url: server_url.into(),
            room_id: None,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            outgoing_tx: None,
            event_rx: Some(event_rx),
            event_tx,
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::UnboundedReceiver<SyncEvent>> {
        self.event_rx.take()
    }

    /// Connect to the server and spawn the reader/writer tasks.
    pub async fn connect(&mut self) -> Result<()> {
        *self.state.write().await = ConnectionState::Connecting;

        let ws_stream = match tokio_tungstenite::connect_async(self.server_url.as_str()).await {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(e.into());
            }
        };
        let (mut ws_writer, mut ws_reader) = ws_stream.split();
        *self.state.write().await = ConnectionState::Connected;
        let _ = self.event_tx.send(SyncEvent::Connected);

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
        self.outgoing_tx = Some(out_tx);

        // Writer task: forward outgoing queue to the socket
        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                let closing = matches!(msg, Message::Close(_));
                if let Err(e) = ws_writer.send(msg).await {
                    log::debug!("Client write failed: {e}");
                    break;
                }
                if closing {
                    break;
                }
            }
        });

        // Reader task: decode server frames into events
        let event_tx = self.event_tx.clone();
        let state = self.state.clone();
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Text(text)) => match ServerEvent::decode(text.as_str()) {
                        Ok(event) => {
                            let _ = event_tx.send(SyncEvent::Server(event));
                        }
                        Err(e) => log::warn!("Ignoring undecodable server frame: {e}"),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        log::debug!("Client read failed: {e}");
                        break;
                    }
                }
            }
            *state.write().await = ConnectionState::Disconnected;
            let _ = event_tx.send(SyncEvent::Disconnected);
        });

        log::debug!("Connected to {}", self.server_url);
        Ok(())
    }

    /// Send a raw event.
    pub fn send(&self, event: &ClientEvent) -> Result<()> {
        let text = event.encode()?;
        self.send_message(Message::text(text))
    }

    /// Send an arbitrary text frame, bypassing encoding (for testing).
    pub fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.send_message(Message::text(text.into()))
    }

    fn send_message(&self, msg: Message) -> Result<()> {
        let tx = self.outgoing_tx.as_ref().ok_or(ProtocolError::ConnectionClosed)?;
        tx.send(msg).map_err(|_| ProtocolError::ConnectionClosed)?;
        Ok(())
    }

    pub fn join(&mut self, room_id: impl Into<String>, nickname: impl Into<String>) -> Result<()> {
        let room_id = room_id.into();
        self.send(&ClientEvent::join(room_id.as_str(), nickname))?;
        self.room_id = Some(room_id);
        Ok(())
    }

    /// Replace the document of the current room.
    pub fn update_code(&self, code: impl Into<String>, language: Language) -> Result<()> {
        let room_id = self.room_id.as_deref().ok_or(ProtocolError::NotJoined)?;
        self.send(&ClientEvent::code_update(room_id, code, language))
    }

    /// Move our cursor in the current room.
    pub fn update_cursor(&self, cursor: Cursor) -> Result<()> {
        let room_id = self.room_id.as_deref().ok_or(ProtocolError::NotJoined)?;
        self.send(&ClientEvent::cursor_update(room_id, cursor))
    }

    /// Close the socket. The server treats this as a disconnect.
    pub async fn disconnect(&mut self) {
        if let Some(tx) = self.outgoing_tx.take() {
            let _ = tx.send(Message::Close(None));
        }
        self.room_id = None;
        *self.state.write().await = ConnectionState::Disconnected;
    }

    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub fn room_id(&self) -> Option<&str> {
        self.room_id.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CollabError;

    #[tokio::test]
    async fn test_new_client_is_disconnected() {
        let mut client = CollabClient::new("ws://127.0.0.1:1");
        assert_eq!(client.connection_state().await, ConnectionState::Disconnected);
        assert!(client.room_id().is_none());
        assert!(client.take_event_rx().is_some());
        assert!(client.take_event_rx().is_none());
    }

    #[tokio::test]
    async fn test_send_before_connect_fails() {
        let mut client = CollabClient::new("ws://127.0.0.1:1");
        assert!(client.join("demo", "Ada").is_err());
        assert!(client.update_cursor(Cursor::new(1, 0)).is_err());
    }

    #[tokio::test]
    async fn test_update_before_join_reports_not_joined() {
        let client = CollabClient::new("ws://127.0.0.1:1");
        let err = client.update_code("x", Language::Javascript).unwrap_err();
        assert!(matches!(err, CollabError::Protocol(ProtocolError::NotJoined)));
        let err = client.update_cursor(Cursor::new(1, 0)).unwrap_err();
        assert!(matches!(err, CollabError::Protocol(ProtocolError::NotJoined)));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Nothing listens on port 1.
        let mut client = CollabClient::new("ws://127.0.0.1:1");
        assert!(client.connect().await.is_err());
        assert_eq!(client.connection_state().await, ConnectionState::Disconnected);
    }
}
