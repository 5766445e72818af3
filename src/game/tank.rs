//! Authoritative per-player tank state

use std::sync::Arc;

use parking_lot::Mutex;

use super::combat::{DamageOutcome, DamageSource, Damageable, Kill};
use super::data::{UtilityType, Weapon};
use super::{
    advance_position, Alliance, Direction, Point, TankId, DEFAULT_ANGULAR_VELOCITY,
    DEFAULT_MAX_HEALTH, DEFAULT_RESPAWN_TIME_MS, DEFAULT_VELOCITY, MAX_UTILITY_HEALTH,
    TANK_SPHERE_RADIUS,
};
use crate::ws::protocol::PlayerInfo;

/// Charge-up state for weapons that scale with hold time
#[derive(Debug, Clone)]
pub struct ChargeTimer {
    pub is_charging: bool,
    /// Milliseconds charged so far
    pub elapsed: f64,
    last_time_stamp: u64,
    pub maximum: f64,
}

impl ChargeTimer {
    pub fn new(maximum: f64) -> Self {
        Self {
            is_charging: false,
            elapsed: 0.0,
            last_time_stamp: 0,
            maximum,
        }
    }

    pub fn start(&mut self, now: u64) {
        self.last_time_stamp = now;
        self.elapsed = 0.0;
        self.is_charging = true;
    }

    pub fn stop(&mut self) {
        self.is_charging = false;
        self.last_time_stamp = 0;
        self.elapsed = 0.0;
    }

    /// Accumulate hold time; `rate_factor` speeds charging up
    pub fn advance(&mut self, now: u64, rate_factor: f64) {
        if self.is_charging && self.elapsed < self.maximum {
            let delta = now.saturating_sub(self.last_time_stamp) as f64;
            if rate_factor <= 0.0 {
                self.elapsed += delta;
            } else {
                self.elapsed += delta + delta * rate_factor;
            }
            self.last_time_stamp = now;
        }

        if self.elapsed > self.maximum {
            self.elapsed = self.maximum;
        }
    }

    /// `ceil(base + ((charge% ) / linear) ^ exponent)`
    pub fn modify_damage(&self, base_damage: f64, linear_factor: f64, exponent: f64) -> i32 {
        let percent = (self.elapsed / self.maximum) * 100.0;
        (base_damage + (percent / linear_factor).powf(exponent)).ceil() as i32
    }
}

/// A timed power-up currently affecting a tank
#[derive(Debug, Clone)]
pub struct AppliedUtility {
    pub utility: UtilityType,
    pub time_left_ms: i64,
    last_step: u64,
}

impl AppliedUtility {
    fn new(utility: UtilityType, now: u64) -> Self {
        Self {
            time_left_ms: (utility.duration * 1000.0) as i64,
            utility,
            last_step: now,
        }
    }

    fn step(&mut self, now: u64) {
        self.time_left_ms -= now.saturating_sub(self.last_step) as i64;
        self.last_step = now;
    }

    fn has_expired(&self) -> bool {
        self.time_left_ms <= 0
    }
}

/// Mutable tank fields, guarded together
#[derive(Debug)]
struct TankState {
    position: Point,
    angle: f64,
    team: Alliance,
    health: i32,
    alive: bool,
    move_direction: Direction,
    rotate_direction: Direction,
    velocity: f64,
    angular_velocity: f64,
    node_id: i32,
    /// 0 when not waiting to respawn
    respawns_at: u64,
    /// Client clock minus server clock in milliseconds
    offset: i64,
    latency: u64,
    ready: bool,
    last_action: u64,
    last_sync: u64,
    assist_hitters: Vec<TankId>,
    applied_utilities: Vec<AppliedUtility>,
    charge: ChargeTimer,
}

/// A joined player. Every accessor takes the tank's own lock, so distinct
/// tanks can be mutated concurrently.
#[derive(Debug)]
pub struct Tank {
    id: TankId,
    name: String,
    weapon: Arc<Weapon>,
    speed_factor: f64,
    armor_factor: f64,
    state: Mutex<TankState>,
}

impl Tank {
    pub fn new(
        id: TankId,
        name: impl Into<String>,
        weapon: Arc<Weapon>,
        speed_factor: f64,
        armor_factor: f64,
        team: Alliance,
        now: u64,
    ) -> Self {
        debug_assert!(id >= 0);
        let charge = ChargeTimer::new(weapon.max_charge_time_ms());

        Self {
            id,
            name: name.into(),
            weapon,
            speed_factor,
            armor_factor,
            state: Mutex::new(TankState {
                position: Point::default(),
                angle: 0.0,
                team,
                health: DEFAULT_MAX_HEALTH,
                alive: true,
                move_direction: Direction::None,
                rotate_direction: Direction::None,
                velocity: DEFAULT_VELOCITY * speed_factor,
                angular_velocity: DEFAULT_ANGULAR_VELOCITY * speed_factor,
                node_id: -1,
                respawns_at: 0,
                offset: 0,
                latency: 0,
                ready: false,
                last_action: now,
                last_sync: now,
                assist_hitters: Vec::new(),
                applied_utilities: Vec::new(),
                charge,
            }),
        }
    }

    pub fn id(&self) -> TankId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn weapon(&self) -> &Arc<Weapon> {
        &self.weapon
    }

    pub fn speed_factor(&self) -> f64 {
        self.speed_factor
    }

    pub fn position(&self) -> Point {
        self.state.lock().position
    }

    pub fn set_position(&self, position: Point) {
        self.state.lock().position = position;
    }

    pub fn angle(&self) -> f64 {
        self.state.lock().angle
    }

    pub fn set_angle(&self, angle: f64) {
        self.state.lock().angle = angle;
    }

    pub fn team(&self) -> Alliance {
        self.state.lock().team
    }

    pub fn set_team(&self, team: Alliance) {
        self.state.lock().team = team;
    }

    pub fn health(&self) -> i32 {
        self.state.lock().health
    }

    pub fn set_health(&self, health: i32) {
        self.state.lock().health = health.max(0);
    }

    pub fn alive(&self) -> bool {
        self.state.lock().alive
    }

    /// Killing a tank this way schedules its respawn
    pub fn set_alive(&self, alive: bool, now: u64) {
        let mut state = self.state.lock();
        state.alive = alive;
        if alive {
            debug_assert!(state.health > 0);
        } else {
            state.respawns_at = now + DEFAULT_RESPAWN_TIME_MS;
        }
    }

    pub fn is_allied_with(&self, other: &Tank) -> bool {
        self.team().is_allied_with(other.team())
    }

    pub fn move_direction(&self) -> Direction {
        self.state.lock().move_direction
    }

    pub fn set_move_direction(&self, direction: Direction) {
        debug_assert!(!matches!(direction, Direction::Left | Direction::Right));
        self.state.lock().move_direction = direction;
    }

    pub fn rotate_direction(&self) -> Direction {
        self.state.lock().rotate_direction
    }

    pub fn set_rotate_direction(&self, direction: Direction) {
        debug_assert!(!matches!(direction, Direction::Forward | Direction::Reverse));
        self.state.lock().rotate_direction = direction;
    }

    pub fn node_id(&self) -> i32 {
        self.state.lock().node_id
    }

    pub fn set_node_id(&self, node_id: i32) {
        self.state.lock().node_id = node_id;
    }

    pub fn respawn_time(&self) -> u64 {
        self.state.lock().respawns_at
    }

    pub fn respawn(&self) {
        let mut state = self.state.lock();
        state.respawns_at = 0;
        state.health = DEFAULT_MAX_HEALTH;
        state.alive = true;
    }

    fn speed_bonus(state: &TankState) -> f64 {
        state
            .applied_utilities
            .iter()
            .map(|u| u.utility.speed_factor)
            .sum()
    }

    /// Movement speed including speed buffs
    pub fn velocity(&self) -> f64 {
        let state = self.state.lock();
        let bonus = Self::speed_bonus(&state);
        if bonus > 0.0 {
            state.velocity + state.velocity * bonus
        } else {
            state.velocity
        }
    }

    /// Turn speed; a speed buff scales it by the summed factor
    pub fn angular_velocity(&self) -> f64 {
        let state = self.state.lock();
        let bonus = Self::speed_bonus(&state);
        if bonus > 0.0 {
            state.angular_velocity * bonus
        } else {
            state.angular_velocity
        }
    }

    pub fn damage_factor(&self) -> f64 {
        self.state
            .lock()
            .applied_utilities
            .iter()
            .map(|u| u.utility.damage_factor)
            .sum()
    }

    /// Step the tank along its current movement and rotation.
    /// Returns true when the position changed.
    pub fn advance(&self, delta: f64) -> bool {
        let velocity = self.velocity();
        let angular_velocity = self.angular_velocity();

        let mut state = self.state.lock();
        let TankState {
            position,
            angle,
            move_direction,
            rotate_direction,
            ..
        } = &mut *state;

        let moved = *move_direction != Direction::None;
        if moved {
            advance_position(position, angle, *move_direction, velocity, delta);
        }
        if *rotate_direction != Direction::None {
            advance_position(position, angle, *rotate_direction, angular_velocity, delta);
        }
        moved
    }

    pub fn apply_utility(&self, utility: &UtilityType, now: u64) {
        let mut state = self.state.lock();
        if utility.duration > 0.0 {
            state
                .applied_utilities
                .push(AppliedUtility::new(utility.clone(), now));
            return;
        }

        state.health += utility.health_increase;
        if utility.health_factor > 0.0 {
            state.health += (f64::from(MAX_UTILITY_HEALTH) * utility.health_factor) as i32;
        }
        // Health packs apply their flat bonus twice
        if utility.health_increase > 0 {
            state.health += utility.health_increase;
        }
        state.health = state.health.min(MAX_UTILITY_HEALTH);
    }

    /// Expire timed buffs and advance any weapon charge
    pub fn check_utility(&self, now: u64) {
        let mut state = self.state.lock();

        for applied in state.applied_utilities.iter_mut() {
            applied.step(now);
        }
        state.applied_utilities.retain(|applied| {
            if applied.has_expired() {
                tracing::debug!(tank_id = self.id, model = %applied.utility.model, "Utility expired");
                false
            } else {
                true
            }
        });

        let rate_factor: f64 = state
            .applied_utilities
            .iter()
            .map(|u| u.utility.rate_factor)
            .sum();
        if state.charge.is_charging {
            state.charge.advance(now, rate_factor);
        }
    }

    pub fn applied_utilities(&self) -> Vec<AppliedUtility> {
        self.state.lock().applied_utilities.clone()
    }

    pub fn start_charging(&self, now: u64) {
        self.state.lock().charge.start(now);
    }

    pub fn is_charging(&self) -> bool {
        self.state.lock().charge.is_charging
    }

    /// Finish a charge: fold the bonus into `raw_damage` and stop charging
    pub fn release_charge(&self, raw_damage: f64, now: u64) -> Option<i32> {
        let mut state = self.state.lock();
        if !state.charge.is_charging {
            return None;
        }
        let rate_factor: f64 = state
            .applied_utilities
            .iter()
            .map(|u| u.utility.rate_factor)
            .sum();
        state.charge.advance(now, rate_factor);
        let damage = state.charge.modify_damage(
            raw_damage,
            self.weapon.linear_factor,
            self.weapon.exponent,
        );
        state.charge.stop();
        Some(damage)
    }

    pub fn offset(&self) -> i64 {
        self.state.lock().offset
    }

    pub fn set_offset(&self, offset: i64) {
        self.state.lock().offset = offset;
    }

    /// Translate a client timestamp into server time
    pub fn transform_time(&self, timestamp: i64) -> i64 {
        timestamp - self.state.lock().offset
    }

    pub fn latency(&self) -> u64 {
        self.state.lock().latency
    }

    pub fn set_latency(&self, latency: u64) {
        self.state.lock().latency = latency;
    }

    pub fn is_ready(&self) -> bool {
        self.state.lock().ready
    }

    pub fn set_ready(&self, ready: bool) {
        self.state.lock().ready = ready;
    }

    pub fn last_action(&self) -> u64 {
        self.state.lock().last_action
    }

    pub fn touch(&self, now: u64) {
        self.state.lock().last_action = now;
    }

    pub fn last_sync(&self) -> u64 {
        self.state.lock().last_sync
    }

    pub fn set_last_sync(&self, now: u64) {
        self.state.lock().last_sync = now;
    }

    /// Return to a fresh state for a new round
    pub fn reset_for_round(&self) {
        let mut state = self.state.lock();
        state.ready = false;
        state.angle = 0.0;
        state.health = DEFAULT_MAX_HEALTH;
        state.alive = true;
        state.respawns_at = 0;
        state.move_direction = Direction::None;
        state.rotate_direction = Direction::None;
        state.assist_hitters.clear();
        state.applied_utilities.clear();
        state.charge.stop();
    }

    pub fn info(&self) -> PlayerInfo {
        let state = self.state.lock();
        PlayerInfo {
            id: self.id,
            name: self.name.clone(),
            weapon_id: self.weapon.id,
            team: state.team,
            position: state.position,
            angle: state.angle,
            health: state.health,
            alive: state.alive,
        }
    }
}

impl Damageable for Tank {
    fn object_id(&self) -> i32 {
        self.id
    }

    fn position(&self) -> Point {
        Tank::position(self)
    }

    fn radius(&self) -> f64 {
        TANK_SPHERE_RADIUS
    }

    fn team(&self) -> Alliance {
        Tank::team(self)
    }

    fn is_alive(&self) -> bool {
        self.alive()
    }

    fn armor_factor(&self) -> f64 {
        self.armor_factor
    }

    fn inflict_damage(&self, damage: i32, source: &DamageSource, now: u64) -> DamageOutcome {
        let owner = source.owner();
        let mut state = self.state.lock();

        state.health = (state.health - damage).max(0);
        if state.health == 0 {
            state.alive = false;
            state.charge.stop();
            state.applied_utilities.clear();
            state.respawns_at = now + DEFAULT_RESPAWN_TIME_MS;

            let assists = state
                .assist_hitters
                .drain(..)
                .filter(|&hitter| hitter != owner)
                .collect();

            return DamageOutcome {
                dealt: damage,
                destroyed: true,
                kill: Some(Kill {
                    victim: self.id,
                    killer: owner,
                    assists,
                }),
            };
        }

        if !state.assist_hitters.contains(&owner) {
            state.assist_hitters.push(owner);
        }

        DamageOutcome {
            dealt: damage,
            destroyed: false,
            kill: None,
        }
    }
}
