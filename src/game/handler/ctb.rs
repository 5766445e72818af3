//! Capture the base
//!
//! Six bases sit along a front line, indices 0..=2 start blue and 3..=5 start
//! red. Each team has a frontier base (the one it spawns at and defends),
//! and only the two frontier bases can be damaged. A base knocked down to
//! zero health can be taken by an enemy tank touching it; otherwise it heals
//! fully after a while. Every capture pushes both frontiers one step toward
//! the losing side. Running out of bases loses the round.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use super::HandlerEvent;
use crate::game::combat::{DamageOutcome, DamageSource, Damageable};
use crate::game::geometry::{circle_collision, round_half_up};
use crate::game::map::{events, Map};
use crate::game::projectile::ProjectileManager;
use crate::game::{Alliance, Point, Tank, TANK_SPHERE_RADIUS};

pub const BASE_RADIUS: f64 = 35.0;
/// Extra reach a tank gets when capturing
pub const CAPTURE_GRACE: f64 = 5.0;
pub const DEFAULT_BASE_HEALTH: i32 = 600;
pub const DEFAULT_REGEN_TIME_MS: u64 = 15_000;
pub const NUM_BASES: usize = 6;

const RED_START_FRONTIER: i32 = 3;
const BLUE_START_FRONTIER: i32 = 2;

/// Map event id of the base at `index`
pub fn base_event_id(index: i32) -> u16 {
    debug_assert!((0..NUM_BASES as i32).contains(&index));
    events::BASE_BLUE_1 + index as u16
}

#[derive(Debug)]
struct BaseState {
    health: i32,
    team: Alliance,
    regenerating: bool,
    regenerates_at: u64,
}

/// A capturable structure; shared with the projectile pipeline as a damage target
#[derive(Debug)]
pub struct Base {
    index: i32,
    position: Point,
    state: Mutex<BaseState>,
}

impl Base {
    fn new(index: i32, position: Point) -> Self {
        Self {
            index,
            position,
            state: Mutex::new(BaseState {
                health: DEFAULT_BASE_HEALTH,
                team: starting_team(index),
                regenerating: false,
                regenerates_at: 0,
            }),
        }
    }

    pub fn index(&self) -> i32 {
        self.index
    }

    pub fn event_id(&self) -> u16 {
        base_event_id(self.index)
    }

    pub fn health(&self) -> i32 {
        self.state.lock().health
    }

    pub fn team(&self) -> Alliance {
        self.state.lock().team
    }

    pub fn is_regenerating(&self) -> bool {
        self.state.lock().regenerating
    }

    fn restore(&self) {
        let mut state = self.state.lock();
        state.health = DEFAULT_BASE_HEALTH;
        state.regenerating = false;
        state.regenerates_at = 0;
    }

    fn set_team(&self, team: Alliance) {
        self.state.lock().team = team;
    }

    fn status(&self) -> HandlerEvent {
        let state = self.state.lock();
        HandlerEvent::BaseStatus {
            team: state.team,
            base: self.event_id(),
            health: state.health,
        }
    }
}

impl Damageable for Base {
    fn object_id(&self) -> i32 {
        self.index
    }

    fn position(&self) -> Point {
        self.position
    }

    fn radius(&self) -> f64 {
        BASE_RADIUS
    }

    fn team(&self) -> Alliance {
        Base::team(self)
    }

    fn is_alive(&self) -> bool {
        self.health() > 0
    }

    fn armor_factor(&self) -> f64 {
        1.0
    }

    fn inflict_damage(&self, damage: i32, source: &DamageSource, _now: u64) -> DamageOutcome {
        let dealt = match source {
            DamageSource::Projectile {
                object_damage_factor,
                ..
            } => round_half_up(f64::from(damage) * object_damage_factor),
            DamageSource::Environment { .. } => damage,
        };

        let mut state = self.state.lock();
        state.health = (state.health - dealt).max(0);
        let destroyed = state.health == 0;
        if destroyed {
            debug!(base = self.index, damage = dealt, "Base knocked down");
        }

        DamageOutcome {
            dealt,
            destroyed,
            kill: None,
        }
    }
}

fn starting_team(index: i32) -> Alliance {
    if index > 2 {
        Alliance::Red
    } else {
        Alliance::Blue
    }
}

/// Passable tile centers in the window around a base tile
fn base_spawn_points(map: &Map, base_x: i32, base_y: i32) -> Vec<Point> {
    let mut points = Vec::new();
    for y in (base_y - 3).max(0)..(base_y + 3).min(map.height()) {
        for x in (base_x - 3).max(0)..(base_x + 3).min(map.width()) {
            if x == base_x && y == base_y {
                continue;
            }
            if map.tile(x, y).is_some_and(|tile| tile.passable) {
                points.push(Point::tile_center(x, y));
            }
        }
    }
    debug_assert!(!points.is_empty());
    points
}

#[derive(Debug)]
pub struct CtbHandler {
    bases: Vec<Arc<Base>>,
    spawn_points: Vec<Vec<Point>>,
    red_frontier: i32,
    blue_frontier: i32,
    red_spawn_index: usize,
    blue_spawn_index: usize,
    red_score: i32,
    blue_score: i32,
    done: bool,
}

impl CtbHandler {
    pub fn new(map: &Map, projectiles: &ProjectileManager) -> Self {
        let mut bases: Vec<Arc<Base>> = (0..NUM_BASES as i32)
            .map(|index| Arc::new(Base::new(index, Point::default())))
            .collect();
        let mut spawn_points = vec![Vec::new(); NUM_BASES];

        let mut found = 0;
        for (x, y, tile) in map.tiles() {
            if !events::BASES.contains(&tile.event_id) {
                continue;
            }
            let index = i32::from(tile.event_id - events::BASE_BLUE_1);
            let position = Point::tile_center(x, y);
            bases[index as usize] = Arc::new(Base::new(index, position));
            spawn_points[index as usize] = base_spawn_points(map, x, y);
            found += 1;
            debug!(base = index, x = position.x, y = position.y, team = ?starting_team(index), "Base placed");
        }
        debug_assert_eq!(found, NUM_BASES);

        let handler = Self {
            bases,
            spawn_points,
            red_frontier: RED_START_FRONTIER,
            blue_frontier: BLUE_START_FRONTIER,
            red_spawn_index: 0,
            blue_spawn_index: 0,
            red_score: 0,
            blue_score: 0,
            done: false,
        };
        handler.register_frontiers(projectiles);
        handler
    }

    pub fn red_score(&self) -> i32 {
        self.red_score
    }

    pub fn blue_score(&self) -> i32 {
        self.blue_score
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn bases(&self) -> &[Arc<Base>] {
        &self.bases
    }

    /// Frontier base indices as (red, blue)
    pub fn frontiers(&self) -> (i32, i32) {
        (self.red_frontier, self.blue_frontier)
    }

    fn register_frontiers(&self, projectiles: &ProjectileManager) {
        for frontier in [self.red_frontier, self.blue_frontier] {
            if let Some(base) = self.base(frontier) {
                projectiles.add_damageable(base.clone());
            }
        }
    }

    fn base(&self, index: i32) -> Option<&Arc<Base>> {
        usize::try_from(index).ok().and_then(|i| self.bases.get(i))
    }

    /// Cycle through the spawn points around the team's frontier base
    pub fn next_spawn(&mut self, team: Alliance) -> Option<Point> {
        let (frontier, cursor) = match team {
            Alliance::Red => (self.red_frontier, &mut self.red_spawn_index),
            _ => (self.blue_frontier, &mut self.blue_spawn_index),
        };
        let points = self.spawn_points.get(usize::try_from(frontier).ok()?)?;
        if points.is_empty() {
            return None;
        }

        let point = points[*cursor % points.len()];
        *cursor = (*cursor + 1) % points.len();
        Some(point)
    }

    pub fn status(&self) -> Vec<HandlerEvent> {
        self.bases.iter().map(|base| base.status()).collect()
    }

    pub fn update(
        &mut self,
        tanks: &[Arc<Tank>],
        projectiles: &ProjectileManager,
        now: u64,
    ) -> Vec<HandlerEvent> {
        let mut events = Vec::new();
        if self.done {
            return events;
        }
        self.player_checks(tanks, projectiles, &mut events);
        self.base_checks(now, &mut events);
        events
    }

    fn player_checks(
        &mut self,
        tanks: &[Arc<Tank>],
        projectiles: &ProjectileManager,
        events: &mut Vec<HandlerEvent>,
    ) {
        for index in 0..NUM_BASES {
            let base = self.bases[index].clone();
            if base.health() > 0 {
                continue;
            }

            let capturer = tanks.iter().find(|tank| {
                let team = tank.team();
                tank.alive()
                    && team != Alliance::None
                    && team != base.team()
                    && circle_collision(
                        tank.position(),
                        TANK_SPHERE_RADIUS,
                        base.position,
                        BASE_RADIUS + CAPTURE_GRACE,
                    )
            });
            if let Some(tank) = capturer {
                debug!(base = base.index, tank_id = tank.id(), "Base captured");
                self.capture(&base, tank, projectiles, events);
            }
        }
    }

    fn capture(
        &mut self,
        base: &Base,
        tank: &Tank,
        projectiles: &ProjectileManager,
        events: &mut Vec<HandlerEvent>,
    ) {
        let old_team = base.team();
        let new_team = tank.team();
        base.set_team(new_team);

        projectiles.remove_damageable(self.red_frontier);
        projectiles.remove_damageable(self.blue_frontier);

        let step = if new_team == Alliance::Red { -1 } else { 1 };
        self.red_frontier += step;
        self.blue_frontier += step;
        debug_assert_ne!(self.red_frontier, self.blue_frontier);

        for base in &self.bases {
            base.restore();
        }
        self.red_spawn_index = 0;
        self.blue_spawn_index = 0;

        if self.blue_frontier < 0 {
            self.red_score += 1;
            self.done = true;
            info!("Team blue has lost all bases");
        } else if self.red_frontier >= NUM_BASES as i32 {
            self.blue_score += 1;
            self.done = true;
            info!("Team red has lost all bases");
        } else {
            self.register_frontiers(projectiles);
        }

        events.push(HandlerEvent::BaseCaptured {
            old_team,
            new_team,
            base: base.event_id(),
            by: tank.id(),
        });
    }

    fn base_checks(&mut self, now: u64, events: &mut Vec<HandlerEvent>) {
        for base in &self.bases {
            let mut state = base.state.lock();
            if state.health == 0 {
                if !state.regenerating {
                    state.regenerating = true;
                    state.regenerates_at = now + DEFAULT_REGEN_TIME_MS;
                } else if now >= state.regenerates_at {
                    state.regenerating = false;
                    state.health = DEFAULT_BASE_HEALTH;
                    debug!(base = base.index, "Base regenerated");
                    events.push(HandlerEvent::BaseStatus {
                        team: state.team,
                        base: base.event_id(),
                        health: state.health,
                    });
                }
            } else if state.regenerating {
                state.regenerating = false;
            }
        }
    }
}
