//! WebSocket sync server with room-based routing.
//!
//! Architecture:
//! ```text
//! Client A ──┐                         ┌── RoomStore ── Room "demo" (Mutex)
//!             ├── connection task ──► EventRouter            │
//! Client B ──┘   (one per socket)      └── Broadcaster ◄─────┘
//!                      ▲                      │
//!                      └──── frame queue ◄────┘  (per connection, unbounded)
//! ```
//!
//! Each connection task reads JSON text frames, hands validated events to
//! the shared [`EventRouter`], and drains its own outbound queue back onto
//! the socket. When the socket ends for any reason the task runs the
//! router's disconnect path.
//!
//! A plain `GET /health` on the same port is answered with
//! `{"status":"ok"}` and never reaches the router.

use std::future::Future;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{interval_at, Instant, Interval};
use tokio_tungstenite::tungstenite::Message;

use crate::broadcast::BroadcastStats;
use crate::error::{ConfigError, Result};
use crate::protocol::{ClientEvent, ConnectionId, Language};
use crate::registry::FrameReceiver;
use crate::room::DEFAULT_DOCUMENT;
use crate::router::EventRouter;
use crate::store::RoomStore;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 4000;

/// Request line prefix answered with a plain HTTP liveness response
/// instead of a WebSocket handshake.
const HEALTH_REQUEST_PREFIX: &[u8] = b"GET /health";
const HEALTH_PEEK_ATTEMPTS: usize = 20;
const MAX_HEALTH_REQUEST_BYTES: usize = 8 * 1024;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Maximum members per room (0 = unlimited)
    pub max_members_per_room: usize,
    /// WebSocket ping interval in seconds (0 = no pings)
    pub heartbeat_interval_secs: u64,
    /// Document a freshly created room starts with
    pub default_document: String,
    pub default_language: Language,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: format!("{DEFAULT_HOST}:{DEFAULT_PORT}"),
            max_members_per_room: 100,
            heartbeat_interval_secs: 30,
            default_document: DEFAULT_DOCUMENT.to_string(),
            default_language: Language::Javascript,
        }
    }
}

impl ServerConfig {
    /// Read `BACKEND_HOST`, `BACKEND_PORT`, `ROOM_MAX_MEMBERS` and
    /// `HEARTBEAT_INTERVAL_SECS` from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ServerConfig::from_env`] with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        let host = lookup("BACKEND_HOST").unwrap_or_else(|| DEFAULT_HOST.to_string());
        let port = parse_var::<u16>("BACKEND_PORT", lookup("BACKEND_PORT"))?.unwrap_or(DEFAULT_PORT);
        config.bind_addr = format!("{host}:{port}");

        if let Some(max) = parse_var("ROOM_MAX_MEMBERS", lookup("ROOM_MAX_MEMBERS"))? {
            config.max_members_per_room = max;
        }
        if let Some(secs) = parse_var("HEARTBEAT_INTERVAL_SECS", lookup("HEARTBEAT_INTERVAL_SECS"))? {
            config.heartbeat_interval_secs = secs;
        }
        Ok(config)
    }

    fn heartbeat_interval(&self) -> Option<Duration> {
        (self.heartbeat_interval_secs > 0).then(|| Duration::from_secs(self.heartbeat_interval_secs))
    }
}

fn parse_var<T>(key: &'static str, value: Option<String>) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .map(|raw| {
            raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
                key,
                value: raw.clone(),
                reason: e.to_string(),
            })
        })
        .transpose()
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    /// Inbound frames that failed to decode or validate
    pub dropped_events: u64,
    pub active_rooms: usize,
    pub broadcast: BroadcastStats,
}

#[derive(Default)]
struct AtomicServerStats {
    total_connections: AtomicU64,
    active_connections: AtomicU64,
    total_messages: AtomicU64,
    total_bytes: AtomicU64,
    dropped_events: AtomicU64,
}

/// The sync server.
pub struct SyncServer {
    config: ServerConfig,
    router: Arc<EventRouter>,
    stats: Arc<AtomicServerStats>,
}

impl SyncServer {
    /// Create a new sync server with the given configuration.
    pub fn new(config: ServerConfig) -> Self {
        let store = RoomStore::new(config.default_document.as_str(), config.default_language);
        let router = Arc::new(EventRouter::new(store, config.max_members_per_room));
        Self {
            config,
            router,
            stats: Arc::new(AtomicServerStats::default()),
        }
    }

    /// Create with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    /// Bind the configured address and serve forever.
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Sync server listening on {}", listener.local_addr()?);
        self.serve(listener).await
    }

    /// Serve an already-bound listener forever.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        self.serve_with_shutdown(listener, std::future::pending()).await
    }

    /// Serve until `shutdown` resolves. Open connections keep running.
    pub async fn serve_with_shutdown(
        &self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()>,
    ) -> Result<()> {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    log::info!("Sync server shutting down");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    let (stream, addr) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            log::warn!("Failed to accept connection: {e}");
                            continue;
                        }
                    };
                    log::debug!("New TCP connection from {addr}");

                    let router = self.router.clone();
                    let stats = self.stats.clone();
                    let heartbeat = self.config.heartbeat_interval();

                    tokio::spawn(async move {
                        if let Err(e) = Self::handle_connection(stream, addr, router, stats, heartbeat).await {
                            log::error!("Connection error from {addr}: {e}");
                        }
                    });
                }
            }
        }
    }

    /// Handle a single WebSocket connection from handshake to disconnect.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        router: Arc<EventRouter>,
        stats: Arc<AtomicServerStats>,
        heartbeat: Option<Duration>,
    ) -> Result<()> {
        if is_health_request(&stream).await? {
            log::debug!("Health check from {addr}");
            return respond_health(stream).await;
        }

        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (connection_id, outbound) = router.connect().await;
        log::info!("WebSocket connection {connection_id} established from {addr}");

        stats.total_connections.fetch_add(1, Ordering::Relaxed);
        stats.active_connections.fetch_add(1, Ordering::Relaxed);

        let result = Self::connection_loop(ws_stream, addr, connection_id, outbound, &router, &stats, heartbeat).await;

        // Always leave the room, however the socket ended.
        router.disconnect(connection_id).await;
        stats.active_connections.fetch_sub(1, Ordering::Relaxed);
        log::info!("Connection {connection_id} from {addr} closed");
        result
    }

    async fn connection_loop(
        ws_stream: tokio_tungstenite::WebSocketStream<TcpStream>,
        addr: SocketAddr,
        connection_id: ConnectionId,
        mut outbound: FrameReceiver,
        router: &EventRouter,
        stats: &AtomicServerStats,
        heartbeat: Option<Duration>,
    ) -> Result<()> {
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let mut heartbeat: Option<Interval> =
            heartbeat.map(|period| interval_at(Instant::now() + period, period));

        loop {
            tokio::select! {
                // Incoming WebSocket message
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            stats.total_messages.fetch_add(1, Ordering::Relaxed);
                            stats.total_bytes.fetch_add(text.as_str().len() as u64, Ordering::Relaxed);

                            match ClientEvent::decode(text.as_str()) {
                                Ok(ClientEvent::Disconnect) => {
                                    log::debug!("Connection {connection_id} asked to disconnect");
                                    let _ = ws_sender.send(Message::Close(None)).await;
                                    break;
                                }
                                Ok(event) => {
                                    let name = event.name();
                                    if !router.handle(connection_id, event).await {
                                        log::debug!("{name} from {connection_id} had no effect");
                                    }
                                }
                                Err(e) => {
                                    stats.dropped_events.fetch_add(1, Ordering::Relaxed);
                                    log::debug!("Dropping event from {addr}: {e}");
                                }
                            }
                        }

                        Some(Ok(Message::Binary(data))) => {
                            stats.total_messages.fetch_add(1, Ordering::Relaxed);
                            stats.total_bytes.fetch_add(data.len() as u64, Ordering::Relaxed);
                            stats.dropped_events.fetch_add(1, Ordering::Relaxed);
                            log::debug!("Dropping binary frame from {addr}");
                        }

                        Some(Ok(Message::Ping(data))) => {
                            ws_sender.send(Message::Pong(data)).await?;
                        }

                        Some(Ok(Message::Close(_))) | None => {
                            log::debug!("Connection closed by {addr}");
                            break;
                        }

                        Some(Err(e)) => {
                            log::error!("WebSocket error from {addr}: {e}");
                            break;
                        }

                        _ => {}
                    }
                }

                // Outgoing frames queued by the broadcaster
                frame = outbound.recv() => {
                    match frame {
                        Some(frame) => ws_sender.send(Message::text(frame.to_string())).await?,
                        None => break,
                    }
                }

                _ = async {
                    match heartbeat.as_mut() {
                        Some(interval) => { interval.tick().await; }
                        // No heartbeat configured, wait forever
                        None => std::future::pending::<()>().await,
                    }
                } => {
                    log::trace!("Heartbeat ping to {connection_id}");
                    ws_sender.send(Message::Ping(Default::default())).await?;
                }
            }
        }

        Ok(())
    }

    /// Get server statistics.
    pub async fn stats(&self) -> ServerStats {
        ServerStats {
            total_connections: self.stats.total_connections.load(Ordering::Relaxed),
            active_connections: self.stats.active_connections.load(Ordering::Relaxed),
            total_messages: self.stats.total_messages.load(Ordering::Relaxed),
            total_bytes: self.stats.total_bytes.load(Ordering::Relaxed),
            dropped_events: self.stats.dropped_events.load(Ordering::Relaxed),
            active_rooms: self.router.store().room_count().await,
            broadcast: self.router.broadcast_stats(),
        }
    }

    /// Get the configured bind address.
    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    /// Shared router, for embedding the server next to other transports.
    pub fn router(&self) -> &Arc<EventRouter> {
        &self.router
    }
}

/// Peek at the request line without consuming it, so a WebSocket
/// handshake still sees the whole request.
async fn is_health_request(stream: &TcpStream) -> Result<bool> {
    let mut buf = [0u8; HEALTH_REQUEST_PREFIX.len() + 1];
    for _ in 0..HEALTH_PEEK_ATTEMPTS {
        let n = stream.peek(&mut buf).await?;
        if n == 0 {
            return Ok(false);
        }
        let compared = n.min(HEALTH_REQUEST_PREFIX.len());
        if buf[..compared] != HEALTH_REQUEST_PREFIX[..compared] {
            return Ok(false);
        }
        if n == buf.len() {
            return Ok(matches!(buf[n - 1], b' ' | b'?'));
        }
        // Only part of the request line has arrived.
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Ok(false)
}

/// Drain the request head and answer `{"status":"ok"}`.
async fn respond_health(mut stream: TcpStream) -> Result<()> {
    let mut request = Vec::with_capacity(512);
    let mut chunk = [0u8; 512];
    while !request.windows(4).any(|w| w == b"\r\n\r\n")
        && request.len() < MAX_HEALTH_REQUEST_BYTES
    {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        request.extend_from_slice(&chunk[..n]);
    }

    let body = serde_json::json!({ "status": "ok" }).to_string();
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1:4000");
        assert_eq!(config.max_members_per_room, 100);
        assert_eq!(config.heartbeat_interval_secs, 30);
        assert_eq!(config.default_document, DEFAULT_DOCUMENT);
        assert_eq!(config.default_language, Language::Javascript);
    }

    #[test]
    fn test_config_from_empty_env_is_default() {
        let config = ServerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:4000");
        assert_eq!(config.max_members_per_room, 100);
    }

    #[test]
    fn test_config_from_env_overrides() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("BACKEND_HOST", "0.0.0.0"),
            ("BACKEND_PORT", "8080"),
            ("ROOM_MAX_MEMBERS", "0"),
            ("HEARTBEAT_INTERVAL_SECS", " 5 "),
        ]))
        .unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.max_members_per_room, 0);
        assert_eq!(config.heartbeat_interval(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_config_rejects_bad_port() {
        let err = ServerConfig::from_lookup(lookup(&[("BACKEND_PORT", "eighty")])).unwrap_err();
        match err {
            ConfigError::InvalidValue { key, value, .. } => {
                assert_eq!(key, "BACKEND_PORT");
                assert_eq!(value, "eighty");
            }
        }
    }

    #[test]
    fn test_zero_heartbeat_disables_pings() {
        let config = ServerConfig {
            heartbeat_interval_secs: 0,
            ..ServerConfig::default()
        };
        assert_eq!(config.heartbeat_interval(), None);
    }

    #[test]
    fn test_server_creation() {
        let server = SyncServer::with_defaults();
        assert_eq!(server.bind_addr(), "127.0.0.1:4000");
        assert_eq!(server.router().max_members_per_room(), 100);
    }

    #[tokio::test]
    async fn test_server_stats_initial() {
        let server = SyncServer::with_defaults();
        let stats = server.stats().await;
        assert_eq!(stats.total_connections, 0);
        assert_eq!(stats.active_connections, 0);
        assert_eq!(stats.total_messages, 0);
        assert_eq!(stats.total_bytes, 0);
        assert_eq!(stats.dropped_events, 0);
        assert_eq!(stats.active_rooms, 0);
        assert_eq!(stats.broadcast, BroadcastStats::default());
    }

    #[tokio::test]
    async fn test_custom_default_document() {
        let server = SyncServer::new(ServerConfig {
            default_document: "// blank\n".into(),
            default_language: Language::Typescript,
            ..ServerConfig::default()
        });
        let room = server.router().store().get_or_create("demo").await;
        let room = room.lock().await;
        assert_eq!(room.document(), "// blank\n");
        assert_eq!(room.language(), Language::Typescript);
    }

    async fn peek_request(request: &'static [u8]) -> bool {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let writer = tokio::spawn(async move {
            let mut client = TcpStream::connect(addr).await.unwrap();
            client.write_all(request).await.unwrap();
            client
        });
        let (stream, _) = listener.accept().await.unwrap();
        let _client = writer.await.unwrap();
        is_health_request(&stream).await.unwrap()
    }

    #[tokio::test]
    async fn test_health_request_detection() {
        assert!(peek_request(b"GET /health HTTP/1.1\r\n\r\n").await);
        assert!(peek_request(b"GET /health?verbose=1 HTTP/1.1\r\n\r\n").await);
        assert!(!peek_request(b"GET / HTTP/1.1\r\n\r\n").await);
        assert!(!peek_request(b"GET /healthz HTTP/1.1\r\n\r\n").await);
        assert!(!peek_request(b"POST /health HTTP/1.1\r\n\r\n").await);
    }

    #[tokio::test]
    async fn test_shutdown_stops_accept_loop() {
        let server = SyncServer::with_defaults();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let result = tokio::time::timeout(
            Duration::from_secs(1),
            server.serve_with_shutdown(listener, async {}),
        )
        .await;
        assert!(matches!(result, Ok(Ok(()))));
    }
}
