//! Application state shared across routes

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::config::Config;
use crate::game::commands::PlayerCommand;
use crate::game::GameWorld;
use crate::util::rate_limit::{create_limiter, Limiter, SESSION_RATE_LIMIT};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub world: GameWorld,
    /// Inbound commands for the dispatcher
    pub commands: mpsc::Sender<PlayerCommand>,
    pub session_limiter: Arc<Limiter>,
}

impl AppState {
    pub fn new(world: GameWorld, commands: mpsc::Sender<PlayerCommand>) -> Self {
        Self {
            config: world.config.clone(),
            world,
            commands,
            session_limiter: create_limiter(SESSION_RATE_LIMIT),
        }
    }
}
