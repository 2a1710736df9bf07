//! Chess Matchmaker Server
//!
//! Runs the WebSocket gateway, the pairing scheduler and the session relay
//! in one process.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use chess_matchmaker::{
    network::{AuthConfig, GameServer, ServerConfig},
    MatchmakingConfig, VERSION,
};

#[cfg(feature = "debug-tracing")]
const DEFAULT_FILTER: &str = "chess_matchmaker=debug,info";
#[cfg(not(feature = "debug-tracing"))]
const DEFAULT_FILTER: &str = "info";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .init();

    let server_config = ServerConfig::from_env().context("invalid server configuration")?;
    let matchmaking = MatchmakingConfig::from_env().context("invalid matchmaking configuration")?;
    let auth = AuthConfig::from_env();

    info!("Chess Matchmaker v{}", VERSION);
    info!(
        "Skill window: {}, tick period: {:?}",
        matchmaking.skill_window, matchmaking.tick_interval
    );
    if !auth.is_configured() {
        if auth.allow_anonymous {
            info!("Token validation not configured, anonymous logins accepted");
        } else {
            warn!("Token validation not configured, every login will fail");
        }
    }

    let server = Arc::new(GameServer::new(server_config, matchmaking, auth));

    let signal_server = server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, shutting down");
            signal_server.shutdown();
        }
    });

    server.run().await.context("server stopped")?;

    // Connections flush their shutdown notice on their own tasks
    tokio::time::sleep(Duration::from_millis(250)).await;
    info!("Server stopped");

    Ok(())
}
