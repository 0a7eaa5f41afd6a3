//! CodeRoom sync server.
//!
//! Reads its configuration from the environment (`BACKEND_HOST`,
//! `BACKEND_PORT`, `ROOM_MAX_MEMBERS`, `HEARTBEAT_INTERVAL_SECS`) and serves
//! room synchronization over WebSocket until Ctrl-C.

use log::{error, info};
use tokio::net::TcpListener;

use coderoom_collab::{ServerConfig, SyncServer};

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run().await {
        error!("{e}");
        std::process::exit(1);
    }
}

async fn run() -> coderoom_collab::error::Result<()> {
    let config = ServerConfig::from_env()?;
    info!(
        "Starting CodeRoom sync server (max {} members/room, heartbeat {}s)",
        config.max_members_per_room, config.heartbeat_interval_secs
    );

    let listener = TcpListener::bind(&config.bind_addr).await?;
    info!("Listening on ws://{}", listener.local_addr()?);

    let server = SyncServer::new(config);
    server
        .serve_with_shutdown(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl-C: {e}");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    let stats = server.stats().await;
    info!(
        "Served {} connections, {} messages ({} dropped)",
        stats.total_connections, stats.total_messages, stats.dropped_events
    );
    Ok(())
}
