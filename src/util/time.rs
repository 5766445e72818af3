//! Time utilities for game simulation

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Get current Unix timestamp in milliseconds
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// Server start time for uptime tracking
static SERVER_START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize server start time (call once at startup)
pub fn init_server_time() {
    SERVER_START.get_or_init(Instant::now);
}

/// Get server uptime in seconds
pub fn uptime_secs() -> u64 {
    SERVER_START
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0)
}

/// Default length of a round
pub const ROUND_LENGTH_MS: u64 = 274_000;

/// Round clock. Counts down from the round length and remembers how long
/// the last frame took.
#[derive(Debug, Clone)]
pub struct GameTimer {
    round_length_ms: u64,
    /// Seconds left in the round; may go negative before the reset runs
    time_left: f64,
    /// Seconds between the last two `advance` calls
    delta: f64,
    last_time: u64,
}

impl GameTimer {
    pub fn new(round_length_ms: u64, now: u64) -> Self {
        Self {
            round_length_ms,
            time_left: round_length_ms as f64 / 1000.0,
            delta: 0.0,
            last_time: now,
        }
    }

    pub fn reset(&mut self, now: u64) {
        self.time_left = self.round_length_ms as f64 / 1000.0;
        self.delta = 0.0;
        self.last_time = now;
    }

    /// Start a new frame at `now`
    pub fn advance(&mut self, now: u64) {
        self.delta = now.saturating_sub(self.last_time) as f64 / 1000.0;
        self.time_left -= self.delta;
        self.last_time = now;
    }

    pub fn force_to_zero(&mut self) {
        self.time_left = 0.0;
    }

    pub fn time_left(&self) -> f64 {
        self.time_left
    }

    pub fn delta(&self) -> f64 {
        self.delta
    }

    pub fn expired(&self) -> bool {
        self.time_left <= 0.0
    }
}
