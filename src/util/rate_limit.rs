//! Rate limiting utilities

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;

use crate::ws::protocol::ClientMsg;

/// Rate limiter type alias
pub type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Create a rate limiter with the specified requests per second
pub fn create_limiter(requests_per_second: u32) -> Arc<Limiter> {
    let quota = Quota::per_second(NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN));
    Arc::new(RateLimiter::direct(quota))
}

/// Gameplay commands per second from one websocket
pub const COMMAND_RATE_LIMIT: u32 = 60;

/// Chat lines per second from one websocket
pub const CHAT_RATE_LIMIT: u32 = 2;

/// Pending-session registrations per second across all callers
pub const SESSION_RATE_LIMIT: u32 = 20;

/// Per-connection inbound message limiter
#[derive(Clone)]
pub struct PlayerRateLimiter {
    command_limiter: Arc<Limiter>,
    chat_limiter: Arc<Limiter>,
}

impl PlayerRateLimiter {
    pub fn new() -> Self {
        Self {
            command_limiter: create_limiter(COMMAND_RATE_LIMIT),
            chat_limiter: create_limiter(CHAT_RATE_LIMIT),
        }
    }

    /// True if `msg` may be processed now. Clock sync replies and leaving
    /// are never throttled; a dropped reply would fail the sync.
    pub fn allows(&self, msg: &ClientMsg) -> bool {
        match msg {
            ClientMsg::ClockSyncReply { .. } | ClientMsg::Leave => true,
            ClientMsg::Chat { .. } => self.chat_limiter.check().is_ok(),
            _ => self.command_limiter.check().is_ok(),
        }
    }
}

impl Default for PlayerRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
