//! Tank Arena Server - authoritative simulation server for tank arena matches
//!
//! This is the main entry point for the server. It handles:
//! - Loading static game data and the map rotation
//! - The fixed-interval simulation frame loop
//! - WebSocket connections carrying player commands and notifications
//! - HTTP endpoints for session registration, health and the scoreboard

mod app;
mod config;
mod game;
mod http;
mod notify;
mod report;
mod util;
mod ws;

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::app::AppState;
use crate::config::{Config, LogFormat};
use crate::game::data::GameData;
use crate::game::map_manager::MapManager;
use crate::game::{commands, frame, players, GameWorld};
use crate::http::build_router;
use crate::util::time::{init_server_time, unix_millis};

/// Inbound commands buffered ahead of the dispatcher
const COMMAND_QUEUE_DEPTH: usize = 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    init_tracing(&config.log_level, config.log_format);

    // Initialize server time tracking
    init_server_time();

    info!("Starting Tank Arena Server");
    info!("Server address: {}", config.server_addr);

    let data = GameData::load(&config.game_data_path)?;
    info!(
        path = %config.game_data_path.display(),
        weapons = data.weapon_count(),
        "Game data loaded"
    );

    let maps = MapManager::new(config.map_dir.clone(), config.map_selection);
    let map_count = maps.refresh_map_list()?;
    info!(dir = %config.map_dir.display(), maps = map_count, "Map list loaded");
    maps.rotate()?;

    let addr: SocketAddr = config.server_addr;
    let (world, gone_rx) = GameWorld::new(config, data, maps, unix_millis())?;

    // Background tasks
    let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
    let frame_loop = frame::spawn_frame_loop(world.clone());
    commands::spawn_dispatcher(world.clone(), command_rx);
    players::spawn_idle_manager(world.clone());
    players::spawn_reaper(world.clone(), gone_rx);

    // Build router
    let state = AppState::new(world.clone(), command_tx);
    let router = build_router(state);

    // Start server
    let listener = TcpListener::bind(addr).await?;

    info!("Server listening on {}", addr);
    info!("Health check: http://{}/health", addr);
    info!("WebSocket endpoint: ws://{}/ws?key=<session_key>", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stops the frame loop and idle manager
    world.notifier.close();
    let _ = frame_loop.await;

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str, format: LogFormat) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);
    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .init(),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .init(),
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        }
    }
}
