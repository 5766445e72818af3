//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use crate::game::map_manager::SelectionMode;

/// Log output format
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    pub log_format: LogFormat,

    /// Directory scanned for `.vtmap` files
    pub map_dir: PathBuf,
    pub map_selection: SelectionMode,
    /// Weapon, projectile, environment and utility tables
    pub game_data_path: PathBuf,

    pub round_length_ms: u64,
    /// Scheduling period of the frame task
    pub frame_interval_ms: u64,
    /// Players silent for longer than this are removed
    pub idle_timeout_ms: u64,
    /// Player commands processed concurrently
    pub game_threads: usize,
    pub player_limit: usize,

    /// HMAC key that pending-session registrations are signed with
    pub session_secret: String,
    /// Endpoint receiving end-of-round statistics
    pub stats_url: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Hosting platforms provide PORT, fall back to SERVER_ADDR or default
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        };

        let log_format = match env::var("LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_format,

            map_dir: env::var("MAP_DIR")
                .unwrap_or_else(|_| "maps".to_string())
                .into(),
            map_selection: parse_or("MAP_SELECTION", SelectionMode::Random)?,
            game_data_path: env::var("GAME_DATA_PATH")
                .unwrap_or_else(|_| "data/game_data.json".to_string())
                .into(),

            round_length_ms: parse_or("ROUND_LENGTH_MS", 274_000)?,
            frame_interval_ms: parse_or("FRAME_INTERVAL_MS", 5)?,
            idle_timeout_ms: parse_or("IDLE_TIMEOUT_MS", 13_000)?,
            game_threads: parse_or("GAME_THREADS", 20)?,
            player_limit: parse_or("PLAYER_LIMIT", 16)?,

            session_secret: env::var("SESSION_SECRET")
                .map_err(|_| ConfigError::Missing("SESSION_SECRET"))?,
            stats_url: env::var("STATS_URL").ok().filter(|url| !url.is_empty()),
        })
    }

    /// Defaults suitable for unit tests
    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            server_addr: ([127, 0, 0, 1], 0).into(),
            log_level: "debug".to_string(),
            log_format: LogFormat::Pretty,
            map_dir: PathBuf::from("maps"),
            map_selection: SelectionMode::RoundRobin,
            game_data_path: PathBuf::from("data/game_data.json"),
            round_length_ms: 274_000,
            frame_interval_ms: 5,
            idle_timeout_ms: 13_000,
            game_threads: 4,
            player_limit: 4,
            session_secret: "test-secret".to_string(),
            stats_url: None,
        }
    }
}

fn parse_or<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(value) => value
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,

    #[error("Invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_or_falls_back_and_rejects_garbage() {
        assert_eq!(parse_or("TANK_ARENA_TEST_UNSET_KEY", 42u64).unwrap(), 42);

        env::set_var("TANK_ARENA_TEST_BAD_NUMBER", "twelve");
        let err = parse_or("TANK_ARENA_TEST_BAD_NUMBER", 1u64).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "TANK_ARENA_TEST_BAD_NUMBER", .. }));

        env::set_var("TANK_ARENA_TEST_SELECTION", "round_robin");
        assert_eq!(
            parse_or("TANK_ARENA_TEST_SELECTION", SelectionMode::Random).unwrap(),
            SelectionMode::RoundRobin
        );
    }
}
