//! Integration tests for live cursor presence.
//!
//! These tests start a real server and connect several clients,
//! verifying cursor broadcast, cursor state in snapshots, and that
//! cursor events from outsiders never leak into a room.

use std::sync::Arc;

use coderoom_collab::client::{CollabClient, SyncEvent};
use coderoom_collab::protocol::{ClientEvent, ConnectionId, Cursor, RoomSnapshot, ServerEvent};
use coderoom_collab::server::{ServerConfig, SyncServer};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{timeout, Duration};

async fn start_test_server() -> (Arc<SyncServer>, String) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let server = Arc::new(SyncServer::new(ServerConfig::default()));
    let serving = server.clone();
    tokio::spawn(async move {
        serving.serve(listener).await.unwrap();
    });
    (server, url)
}

async fn connect_client(url: &str) -> (CollabClient, UnboundedReceiver<SyncEvent>) {
    let mut client = CollabClient::new(url);
    let mut events = client.take_event_rx().unwrap();
    client.connect().await.unwrap();
    // Drain Connected event.
    let _ = timeout(Duration::from_secs(1), events.recv()).await;
    (client, events)
}

async fn next_event(events: &mut UnboundedReceiver<SyncEvent>) -> ServerEvent {
    match timeout(Duration::from_secs(2), events.recv()).await {
        Ok(Some(SyncEvent::Server(event))) => event,
        other => panic!("Expected server event, got {other:?}"),
    }
}

async fn next_state(events: &mut UnboundedReceiver<SyncEvent>) -> RoomSnapshot {
    match next_event(events).await {
        ServerEvent::RoomState(snapshot) => snapshot,
        other => panic!("Expected room:state, got {other:?}"),
    }
}

async fn assert_quiet(events: &mut UnboundedReceiver<SyncEvent>) {
    let result = timeout(Duration::from_millis(150), events.recv()).await;
    assert!(result.is_err(), "Expected no event, got {result:?}");
}

/// Join `room` and return the id the server assigned to this client.
async fn join(
    client: &mut CollabClient,
    events: &mut UnboundedReceiver<SyncEvent>,
    room: &str,
    nickname: &str,
) -> ConnectionId {
    client.join(room, nickname).unwrap();
    let state = next_state(events).await;
    state
        .users
        .iter()
        .find(|u| u.nickname == nickname)
        .expect("joiner must be in its own snapshot")
        .connection_id
}

// ─── Cursor Broadcast Tests ──────────────────────────────────────

#[tokio::test]
async fn test_cursor_broadcast_to_others_only() {
    let (_server, url) = start_test_server().await;
    let (mut ada, mut ada_events) = connect_client(&url).await;
    let (mut lin, mut lin_events) = connect_client(&url).await;
    let (mut kai, mut kai_events) = connect_client(&url).await;

    let _ada_id = join(&mut ada, &mut ada_events, "demo", "Ada").await;
    let lin_id = join(&mut lin, &mut lin_events, "demo", "Lin").await;
    let _ = next_state(&mut ada_events).await;
    let _kai_id = join(&mut kai, &mut kai_events, "demo", "Kai").await;
    let _ = next_state(&mut ada_events).await;
    let _ = next_state(&mut lin_events).await;

    lin.update_cursor(Cursor::new(7, 3)).unwrap();

    for events in [&mut ada_events, &mut kai_events] {
        match next_event(events).await {
            ServerEvent::CursorUpdated(update) => {
                assert_eq!(update.connection_id, lin_id);
                assert_eq!(update.cursor, Cursor::new(7, 3));
            }
            other => panic!("Expected cursor:updated, got {other:?}"),
        }
    }
    assert_quiet(&mut lin_events).await;
}

#[tokio::test]
async fn test_late_joiner_sees_existing_cursors() {
    let (_server, url) = start_test_server().await;
    let (mut ada, mut ada_events) = connect_client(&url).await;
    let ada_id = join(&mut ada, &mut ada_events, "demo", "Ada").await;
    ada.update_cursor(Cursor::new(4, 12)).unwrap();

    let (mut lin, mut lin_events) = connect_client(&url).await;
    // Give the cursor event a head start on the join.
    tokio::time::sleep(Duration::from_millis(50)).await;
    lin.join("demo", "Lin").unwrap();
    let state = next_state(&mut lin_events).await;

    assert_eq!(state.users.len(), 2);
    let ada_seen = state.user(ada_id).unwrap();
    assert_eq!(ada_seen.cursor, Some(Cursor::new(4, 12)));
    let lin_seen = state.users.iter().find(|u| u.connection_id != ada_id).unwrap();
    assert_eq!(lin_seen.cursor, None);
}

#[tokio::test]
async fn test_cursor_without_join_is_dropped() {
    let (server, url) = start_test_server().await;
    let (mut ada, mut ada_events) = connect_client(&url).await;
    let (outsider, _outsider_events) = connect_client(&url).await;
    join(&mut ada, &mut ada_events, "demo", "Ada").await;

    outsider
        .send(&ClientEvent::cursor_update("demo", Cursor::new(1, 1)))
        .unwrap();
    outsider
        .send(&ClientEvent::cursor_update("nowhere", Cursor::new(1, 1)))
        .unwrap();
    assert_quiet(&mut ada_events).await;

    // No room materialized for the unknown key.
    assert_eq!(server.stats().await.active_rooms, 1);
}

#[tokio::test]
async fn test_out_of_range_cursor_forwarded_as_is() {
    let (_server, url) = start_test_server().await;
    let (mut ada, mut ada_events) = connect_client(&url).await;
    let (mut lin, mut lin_events) = connect_client(&url).await;
    join(&mut ada, &mut ada_events, "demo", "Ada").await;
    join(&mut lin, &mut lin_events, "demo", "Lin").await;
    let _ = next_state(&mut ada_events).await;

    // Far past the end of the welcome document.
    lin.update_cursor(Cursor::new(10_000, 0)).unwrap();
    match next_event(&mut ada_events).await {
        ServerEvent::CursorUpdated(update) => assert_eq!(update.cursor, Cursor::new(10_000, 0)),
        other => panic!("Expected cursor:updated, got {other:?}"),
    }
}

#[tokio::test]
async fn test_cursor_stream_order_preserved() {
    let (_server, url) = start_test_server().await;
    let (mut ada, mut ada_events) = connect_client(&url).await;
    let (mut lin, mut lin_events) = connect_client(&url).await;
    join(&mut ada, &mut ada_events, "demo", "Ada").await;
    join(&mut lin, &mut lin_events, "demo", "Lin").await;
    let _ = next_state(&mut ada_events).await;

    for column in 0..20 {
        lin.update_cursor(Cursor::new(1, column)).unwrap();
    }
    for column in 0..20 {
        match next_event(&mut ada_events).await {
            ServerEvent::CursorUpdated(update) => assert_eq!(update.cursor.column, column),
            other => panic!("Expected cursor:updated, got {other:?}"),
        }
    }
}
