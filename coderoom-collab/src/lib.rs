//! # coderoom-collab — Room synchronization service for CodeRoom
//!
//! Clients join a named room over WebSocket, share one document and its
//! language tag, and see each other's cursors live. The server holds the
//! authoritative state of every room; edits are last-writer-wins.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   JSON over WS   ┌──────────────┐
//! │ CollabClient │ ◄──────────────► │  SyncServer  │
//! └──────────────┘                  └──────┬───────┘
//!                                          │ ClientEvent
//!                                          ▼
//!                                   ┌──────────────┐      ┌────────────────────┐
//!                                   │ EventRouter  │ ───► │ RoomStore          │
//!                                   └──────┬───────┘      │  key → Mutex<Room> │
//!                                          │              └────────────────────┘
//!                                          ▼ ServerEvent
//!                                   ┌──────────────┐      ┌────────────────────┐
//!                                   │ Broadcaster  │ ───► │ ConnectionRegistry │
//!                                   └──────────────┘      │  id → queue, room  │
//!                                                         └────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] — Wire events (`join`, `code:update`, `room:state`, ...)
//! - [`room`] — Per-room document and member presence
//! - [`store`] — Lazy room creation and destruction
//! - [`registry`] — Connection → room and outbound queue
//! - [`broadcast`] — Fire-and-forget room fan-out
//! - [`router`] — Inbound event handling with per-room ordering
//! - [`server`] — WebSocket server and configuration
//! - [`client`] — WebSocket client

pub mod broadcast;
pub mod client;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod room;
pub mod router;
pub mod server;
pub mod store;

// Re-exports for convenience
pub use broadcast::{BroadcastStats, Broadcaster};
pub use client::{CollabClient, ConnectionState, SyncEvent};
pub use error::{CollabError, ConfigError};
pub use protocol::{
    ClientEvent, ConnectionId, Cursor, Language, ProtocolError, RoomSnapshot, ServerEvent,
    UserPresence,
};
pub use registry::ConnectionRegistry;
pub use room::{Presence, Room, DEFAULT_DOCUMENT};
pub use router::EventRouter;
pub use server::{ServerConfig, ServerStats, SyncServer};
pub use store::RoomStore;
