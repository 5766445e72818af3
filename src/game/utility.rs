//! Power-up spawning and pickup

use parking_lot::Mutex;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use tracing::{debug, warn};

use super::data::UtilityType;
use super::geometry::{circle_to_rectangle, Rect};
use super::map::{events, Map};
use super::{Point, Tank, TankId, TANK_SPHERE_RADIUS, TILE_SIZE};

pub const DEFAULT_SPAWN_TIME_MS: u64 = 15_000;
pub const DEFAULT_VARIATION_MS: u64 = 5_000;
/// Upper bound on utilities lying on the map at once
pub const MAX_ACTIVE_UTILITIES: usize = 7;

/// A utility waiting on the map to be picked up
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveUtility {
    pub id: i32,
    pub utility: UtilityType,
    pub position: Point,
}

/// A tank drove over a utility
#[derive(Debug, Clone, PartialEq)]
pub struct Pickup {
    pub tank: TankId,
    pub utility: ActiveUtility,
}

struct UtilityState {
    types: Vec<UtilityType>,
    positions: Vec<Point>,
    position_index: usize,
    next_spawn: u64,
    ready: bool,
    active: Vec<ActiveUtility>,
    rng: ChaCha8Rng,
}

impl UtilityState {
    fn schedule(&mut self, now: u64) {
        let variation = self.rng.gen_range(1..=DEFAULT_VARIATION_MS);
        self.next_spawn = if self.rng.gen_bool(0.5) {
            now + DEFAULT_SPAWN_TIME_MS + variation
        } else {
            now + DEFAULT_SPAWN_TIME_MS - variation
        };
        self.ready = false;
    }

    fn is_ready(&mut self, now: u64) -> bool {
        if !self.ready && now >= self.next_spawn {
            self.ready = true;
        }
        self.ready
    }

    /// Next spawn point that no active utility occupies. After a full lap
    /// without a free point the originally suggested one is reused.
    fn next_position(&mut self) -> Point {
        let original = self.position_index;
        let suggested = self.positions[original];

        loop {
            let candidate = self.positions[self.position_index];
            if !self.active.iter().any(|a| a.position == candidate) {
                return candidate;
            }

            self.position_index += 1;
            if self.position_index >= self.positions.len() {
                self.positions.shuffle(&mut self.rng);
                self.position_index = 0;
            }
            if self.position_index == original {
                return suggested;
            }
        }
    }

    fn next_id(&self) -> i32 {
        (0..)
            .find(|id| !self.active.iter().any(|a| a.id == *id))
            .unwrap_or_default()
    }
}

/// Decides when, what and where utilities spawn and tracks those on the map
pub struct UtilityManager {
    state: Mutex<UtilityState>,
}

impl UtilityManager {
    pub fn new(types: Vec<UtilityType>, now: u64) -> Self {
        Self::with_rng(types, ChaCha8Rng::from_entropy(), now)
    }

    pub fn with_seed(types: Vec<UtilityType>, seed: u64, now: u64) -> Self {
        Self::with_rng(types, ChaCha8Rng::seed_from_u64(seed), now)
    }

    fn with_rng(types: Vec<UtilityType>, rng: ChaCha8Rng, now: u64) -> Self {
        let mut state = UtilityState {
            types,
            positions: Vec::new(),
            position_index: 0,
            next_spawn: 0,
            ready: false,
            active: Vec::new(),
            rng,
        };
        state.schedule(now);

        Self {
            state: Mutex::new(state),
        }
    }

    /// Collect spawn points from `map`'s utility tiles
    pub fn update_map(&self, map: &Map) {
        debug!(
            map = map.title(),
            width = map.width(),
            height = map.height(),
            "Generating utility spawn points"
        );

        let mut state = self.state.lock();
        let UtilityState {
            positions,
            position_index,
            rng,
            ..
        } = &mut *state;

        *positions = map.event_positions(events::UTILITY);
        *position_index = 0;
        if positions.is_empty() {
            warn!(map = map.title(), "There are no spawn points for utilities on this map");
            return;
        }
        positions.shuffle(rng);
    }

    pub fn set_types(&self, types: Vec<UtilityType>) {
        self.state.lock().types = types;
    }

    pub fn is_ready(&self, now: u64) -> bool {
        self.state.lock().is_ready(now)
    }

    /// Place a new utility if one is due and the map is not full
    pub fn try_spawn(&self, now: u64) -> Option<ActiveUtility> {
        let mut state = self.state.lock();
        if state.active.len() >= MAX_ACTIVE_UTILITIES
            || state.positions.is_empty()
            || state.types.is_empty()
            || !state.is_ready(now)
        {
            return None;
        }

        let count = state.types.len();
        let index = state.rng.gen_range(0..count);
        let utility = state.types[index].clone();
        let position = state.next_position();
        let spawned = ActiveUtility {
            id: state.next_id(),
            utility,
            position,
        };

        debug!(
            utility_id = spawned.id,
            model = %spawned.utility.model,
            x = position.x,
            y = position.y,
            "Utility spawned"
        );

        state.active.push(spawned.clone());
        state.schedule(now);
        Some(spawned)
    }

    /// Apply every utility touched by a living tank and take it off the map
    pub fn check_pickups(&self, tanks: &[std::sync::Arc<Tank>], now: u64) -> Vec<Pickup> {
        let mut state = self.state.lock();
        if tanks.is_empty() || state.active.is_empty() {
            return Vec::new();
        }

        let mut pickups = Vec::new();
        state.active.retain(|active| {
            let rect = Rect::new(active.position.x, active.position.y, TILE_SIZE, TILE_SIZE);
            let taker = tanks.iter().find(|tank| {
                tank.alive() && circle_to_rectangle(tank.position(), TANK_SPHERE_RADIUS, &rect)
            });

            match taker {
                Some(tank) => {
                    debug!(tank_id = tank.id(), model = %active.utility.model, "Utility applied");
                    tank.apply_utility(&active.utility, now);
                    pickups.push(Pickup {
                        tank: tank.id(),
                        utility: active.clone(),
                    });
                    false
                }
                None => true,
            }
        });
        pickups
    }

    pub fn active(&self) -> Vec<ActiveUtility> {
        self.state.lock().active.clone()
    }

    pub fn clear(&self) {
        self.state.lock().active.clear();
    }
}
