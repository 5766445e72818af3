//! Capture the flag
//!
//! Each flag runs its own small state machine:
//!
//! ```text
//! Despawned --(respawn timer)--> Stationary --(enemy touches)--> Held
//!     ^                              ^                            |
//!     |                              +--(holder dies or leaves)---+
//!     +-----------------(carried to the enemy flag stand)---------+
//! ```
//!
//! A flag lying away from its stand goes home when a teammate touches it.

use std::sync::Arc;

use tracing::debug;

use super::HandlerEvent;
use crate::game::geometry::circle_collision;
use crate::game::map::{events, Map};
use crate::game::{Alliance, Point, Tank, TankId, TANK_SPHERE_RADIUS};

pub const FLAG_RADIUS: f64 = 30.0;
/// Pickup radius while the flag sits on its stand
pub const FLAG_SPAWN_RADIUS: f64 = 40.0;
pub const DESPAWN_TIME_MS: u64 = 5000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagState {
    Despawned,
    Stationary,
    Held,
}

#[derive(Debug, Clone)]
pub struct Flag {
    pub team: Alliance,
    pub state: FlagState,
    pub position: Point,
    pub home: Point,
    pub holder: Option<TankId>,
    pub at_home: bool,
}

impl Flag {
    fn new(team: Alliance, home: Point) -> Self {
        Self {
            team,
            state: FlagState::Stationary,
            position: home,
            home,
            holder: None,
            at_home: true,
        }
    }

    fn reset(&mut self) {
        self.state = FlagState::Stationary;
        self.position = self.home;
        self.holder = None;
        self.at_home = true;
    }
}

#[derive(Debug)]
pub struct CtfHandler {
    red: Flag,
    blue: Flag,
    red_score: i32,
    blue_score: i32,
    next_spawn: u64,
}

impl CtfHandler {
    pub fn new(map: &Map) -> Self {
        let red_home = map.event_positions(events::RED_FLAG);
        let blue_home = map.event_positions(events::BLUE_FLAG);
        debug_assert_eq!(red_home.len(), 1);
        debug_assert_eq!(blue_home.len(), 1);

        let red = Flag::new(Alliance::Red, red_home.first().copied().unwrap_or_default());
        let blue = Flag::new(Alliance::Blue, blue_home.first().copied().unwrap_or_default());
        debug!(
            red_x = red.home.x,
            red_y = red.home.y,
            blue_x = blue.home.x,
            blue_y = blue.home.y,
            "Flags placed"
        );

        Self {
            red,
            blue,
            red_score: 0,
            blue_score: 0,
            next_spawn: 0,
        }
    }

    pub fn red_score(&self) -> i32 {
        self.red_score
    }

    pub fn blue_score(&self) -> i32 {
        self.blue_score
    }

    pub fn flag(&self, team: Alliance) -> &Flag {
        match team {
            Alliance::Red => &self.red,
            _ => &self.blue,
        }
    }

    fn flag_mut(&mut self, team: Alliance) -> &mut Flag {
        match team {
            Alliance::Red => &mut self.red,
            _ => &mut self.blue,
        }
    }

    pub fn status(&self) -> Vec<HandlerEvent> {
        let mut status = Vec::with_capacity(4);
        for flag in [&self.red, &self.blue] {
            status.push(HandlerEvent::FlagSpawned {
                flag: flag.team,
                position: flag.position,
            });
        }
        for flag in [&self.red, &self.blue] {
            if let Some(holder) = flag.holder {
                status.push(HandlerEvent::FlagPickedUp {
                    flag: flag.team,
                    holder,
                });
            }
        }
        status
    }

    pub fn update(&mut self, tanks: &[Arc<Tank>], now: u64) -> Vec<HandlerEvent> {
        let mut events = Vec::new();
        self.process_flag(Alliance::Red, tanks, now, &mut events);
        self.process_flag(Alliance::Blue, tanks, now, &mut events);
        events
    }

    fn process_flag(
        &mut self,
        color: Alliance,
        tanks: &[Arc<Tank>],
        now: u64,
        events: &mut Vec<HandlerEvent>,
    ) {
        let state = self.flag(color).state;
        match state {
            FlagState::Despawned => {
                if now >= self.next_spawn {
                    self.red.reset();
                    self.blue.reset();
                    for flag in [&self.red, &self.blue] {
                        events.push(HandlerEvent::FlagSpawned {
                            flag: flag.team,
                            position: flag.position,
                        });
                    }
                    debug!("Both flags respawned");
                }
            }
            FlagState::Stationary => self.stationary(color, tanks, events),
            FlagState::Held => self.held(color, tanks, now, events),
        }
    }

    fn stationary(&mut self, color: Alliance, tanks: &[Arc<Tank>], events: &mut Vec<HandlerEvent>) {
        let flag = self.flag_mut(color);
        debug_assert!(flag.holder.is_none());

        let radius = if flag.at_home {
            FLAG_SPAWN_RADIUS
        } else {
            FLAG_RADIUS
        };

        let thief = tanks.iter().find(|tank| {
            tank.team() == color.opponent()
                && tank.alive()
                && circle_collision(tank.position(), TANK_SPHERE_RADIUS, flag.position, radius)
        });
        if let Some(tank) = thief {
            flag.state = FlagState::Held;
            flag.holder = Some(tank.id());
            flag.position = tank.position();
            flag.at_home = false;
            debug!(tank_id = tank.id(), flag = ?color, "Flag picked up");
            events.push(HandlerEvent::FlagPickedUp {
                flag: color,
                holder: tank.id(),
            });
            return;
        }

        if flag.at_home {
            return;
        }

        let rescuer = tanks.iter().find(|tank| {
            tank.team() == color
                && tank.alive()
                && circle_collision(tank.position(), TANK_SPHERE_RADIUS, flag.position, FLAG_RADIUS)
        });
        if let Some(tank) = rescuer {
            flag.reset();
            debug!(tank_id = tank.id(), flag = ?color, "Flag returned");
            events.push(HandlerEvent::FlagReturned {
                flag: color,
                by: tank.id(),
            });
        }
    }

    fn held(&mut self, color: Alliance, tanks: &[Arc<Tank>], now: u64, events: &mut Vec<HandlerEvent>) {
        let both_away = !self.red.at_home && !self.blue.at_home;
        let enemy_stand = self.flag(color.opponent()).home;

        let flag = self.flag_mut(color);
        debug_assert!(!flag.at_home);
        let Some(holder_id) = flag.holder else {
            flag.state = FlagState::Stationary;
            return;
        };

        let holder = tanks
            .iter()
            .find(|tank| tank.id() == holder_id && tank.team() == color.opponent());
        let Some(holder) = holder else {
            // Carrier left the game; the flag stays where it was last seen
            flag.holder = None;
            flag.state = FlagState::Stationary;
            debug!(tank_id = holder_id, flag = ?color, "Flag carrier left");
            events.push(HandlerEvent::FlagSpawned {
                flag: color,
                position: flag.position,
            });
            return;
        };

        flag.position = holder.position();
        if !holder.alive() {
            flag.holder = None;
            flag.state = FlagState::Stationary;
            debug!(tank_id = holder_id, flag = ?color, "Flag dropped");
            events.push(HandlerEvent::FlagDropped {
                flag: color,
                holder: holder_id,
                position: flag.position,
            });
            return;
        }

        if !both_away {
            return;
        }

        if circle_collision(flag.position, FLAG_RADIUS, enemy_stand, FLAG_SPAWN_RADIUS) {
            match holder.team() {
                Alliance::Red => self.red_score += 1,
                _ => self.blue_score += 1,
            }
            self.red.state = FlagState::Despawned;
            self.blue.state = FlagState::Despawned;
            self.red.holder = None;
            self.blue.holder = None;
            self.next_spawn = now + DESPAWN_TIME_MS;

            debug!(tank_id = holder_id, flag = ?color, "Flag captured");
            events.push(HandlerEvent::FlagCaptured {
                flag: color,
                by: holder_id,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::data::fixtures;

    /// Red stand at tile (2, 2), blue stand at tile (12, 2)
    fn map() -> Map {
        let mut map = Map::create(15, 5, "ctf").unwrap();
        map.set_tile_event(2, 2, events::RED_FLAG).unwrap();
        map.set_tile_event(12, 2, events::BLUE_FLAG).unwrap();
        map.set_tile_event(0, 0, events::RED_SPAWN_AREA).unwrap();
        map.set_tile_event(14, 4, events::BLUE_SPAWN_AREA).unwrap();
        map
    }

    fn tank(id: TankId, team: Alliance, position: Point) -> Arc<Tank> {
        let weapon = Arc::new(fixtures::weapon(1, fixtures::projectile(1)));
        let tank = Arc::new(Tank::new(id, format!("t{id}"), weapon, 1.0, 1.0, team, 0));
        tank.set_position(position);
        tank
    }

    fn red_stand() -> Point {
        Point::tile_center(2, 2)
    }

    fn blue_stand() -> Point {
        Point::tile_center(12, 2)
    }

    fn middle() -> Point {
        Point::tile_center(7, 2)
    }

    #[test]
    fn flags_start_on_their_stands() {
        let ctf = CtfHandler::new(&map());
        assert_eq!(ctf.flag(Alliance::Red).position, red_stand());
        assert_eq!(ctf.flag(Alliance::Blue).position, blue_stand());
        assert_eq!(ctf.status().len(), 2);
    }

    #[test]
    fn full_capture_cycle() {
        let mut ctf = CtfHandler::new(&map());
        let blue_runner = tank(1, Alliance::Blue, red_stand());
        let red_runner = tank(2, Alliance::Red, blue_stand());
        let tanks = vec![blue_runner.clone(), red_runner.clone()];

        let events = ctf.update(&tanks, 0);
        assert!(events.contains(&HandlerEvent::FlagPickedUp { flag: Alliance::Red, holder: 1 }));
        assert!(events.contains(&HandlerEvent::FlagPickedUp { flag: Alliance::Blue, holder: 2 }));
        assert_eq!(ctf.status().len(), 4);

        // Blue brings the red flag to its own stand while both flags are out
        blue_runner.set_position(blue_stand());
        red_runner.set_position(middle());
        let events = ctf.update(&tanks, 100);
        assert!(events.contains(&HandlerEvent::FlagCaptured { flag: Alliance::Red, by: 1 }));
        assert_eq!((ctf.red_score(), ctf.blue_score()), (0, 1));
        assert_eq!(ctf.flag(Alliance::Red).state, FlagState::Despawned);
        assert_eq!(ctf.flag(Alliance::Blue).state, FlagState::Despawned);
        assert_eq!(events[0].objective_capturer(), Some(1));

        assert!(ctf.update(&tanks, 100 + DESPAWN_TIME_MS - 1).is_empty());
        let events = ctf.update(&tanks, 100 + DESPAWN_TIME_MS);
        assert_eq!(
            events[..2],
            [
                HandlerEvent::FlagSpawned { flag: Alliance::Red, position: red_stand() },
                HandlerEvent::FlagSpawned { flag: Alliance::Blue, position: blue_stand() },
            ]
        );
    }

    #[test]
    fn capture_needs_both_flags_in_play() {
        let mut ctf = CtfHandler::new(&map());
        let runner = tank(1, Alliance::Blue, red_stand());
        let tanks = vec![runner.clone()];

        ctf.update(&tanks, 0);
        runner.set_position(blue_stand());
        let events = ctf.update(&tanks, 10);

        assert!(events.is_empty());
        assert_eq!(ctf.flag(Alliance::Red).state, FlagState::Held);
        assert_eq!(ctf.blue_score(), 0);
    }

    #[test]
    fn dead_carriers_drop_and_teammates_return() {
        let mut ctf = CtfHandler::new(&map());
        let runner = tank(1, Alliance::Blue, red_stand());
        let defender = tank(2, Alliance::Red, Point::tile_center(0, 4));
        let tanks = vec![runner.clone(), defender.clone()];
        ctf.update(&tanks, 0);

        runner.set_position(middle());
        runner.set_alive(false, 50);
        let events = ctf.update(&tanks, 50);
        assert_eq!(
            events,
            vec![HandlerEvent::FlagDropped { flag: Alliance::Red, holder: 1, position: middle() }]
        );

        defender.set_position(middle());
        let events = ctf.update(&tanks, 60);
        assert_eq!(events, vec![HandlerEvent::FlagReturned { flag: Alliance::Red, by: 2 }]);
        assert!(ctf.flag(Alliance::Red).at_home);
        assert_eq!(ctf.flag(Alliance::Red).position, red_stand());
    }

    #[test]
    fn leaving_carrier_leaves_the_flag_behind() {
        let mut ctf = CtfHandler::new(&map());
        let runner = tank(1, Alliance::Blue, red_stand());
        ctf.update(&[runner.clone()], 0);
        runner.set_position(middle());
        ctf.update(&[runner], 10);

        let events = ctf.update(&[], 20);
        assert_eq!(
            events,
            vec![HandlerEvent::FlagSpawned { flag: Alliance::Red, position: middle() }]
        );
        assert!(!ctf.flag(Alliance::Red).at_home);
    }
}
