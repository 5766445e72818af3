//! Game mode controllers
//!
//! One handler exists per round and is replaced wholesale when the map rotates.

pub mod ctb;
pub mod ctf;

use std::sync::Arc;

use super::map::{GameMode, Map};
use super::projectile::ProjectileManager;
use super::{Alliance, Point, Tank, TankId};

pub use ctb::CtbHandler;
pub use ctf::CtfHandler;

/// Objective state changes clients need to hear about
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerEvent {
    FlagSpawned {
        flag: Alliance,
        position: Point,
    },
    FlagPickedUp {
        flag: Alliance,
        holder: TankId,
    },
    FlagDropped {
        flag: Alliance,
        holder: TankId,
        position: Point,
    },
    FlagReturned {
        flag: Alliance,
        by: TankId,
    },
    FlagCaptured {
        flag: Alliance,
        by: TankId,
    },
    BaseStatus {
        team: Alliance,
        base: u16,
        health: i32,
    },
    BaseCaptured {
        old_team: Alliance,
        new_team: Alliance,
        base: u16,
        by: TankId,
    },
}

impl HandlerEvent {
    /// Tank that earns an objective-captured point for this event
    pub fn objective_capturer(&self) -> Option<TankId> {
        match self {
            HandlerEvent::FlagCaptured { by, .. } => Some(*by),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub enum GameHandler {
    /// Deathmatch and team deathmatch have no objectives
    Deathmatch,
    CaptureTheFlag(CtfHandler),
    CaptureTheBase(CtbHandler),
}

impl GameHandler {
    pub fn create(mode: GameMode, map: &Map, projectiles: &ProjectileManager) -> Self {
        match mode {
            GameMode::Deathmatch | GameMode::TeamDeathmatch => GameHandler::Deathmatch,
            GameMode::CaptureTheFlag => GameHandler::CaptureTheFlag(CtfHandler::new(map)),
            GameMode::CaptureTheBase => {
                GameHandler::CaptureTheBase(CtbHandler::new(map, projectiles))
            }
        }
    }

    pub fn has_custom_spawn_points(&self) -> bool {
        matches!(self, GameHandler::CaptureTheBase(_))
    }

    /// Next custom spawn for `tank`, if this mode places players itself
    pub fn spawn(&mut self, tank: &Tank) -> Option<Point> {
        match self {
            GameHandler::CaptureTheBase(ctb) => ctb.next_spawn(tank.team()),
            _ => None,
        }
    }

    pub fn update(
        &mut self,
        tanks: &[Arc<Tank>],
        projectiles: &ProjectileManager,
        now: u64,
    ) -> Vec<HandlerEvent> {
        match self {
            GameHandler::Deathmatch => Vec::new(),
            GameHandler::CaptureTheFlag(ctf) => ctf.update(tanks, now),
            GameHandler::CaptureTheBase(ctb) => ctb.update(tanks, projectiles, now),
        }
    }

    /// True once the mode has decided the round on its own
    pub fn round_over(&self) -> bool {
        match self {
            GameHandler::CaptureTheBase(ctb) => ctb.is_done(),
            _ => false,
        }
    }

    pub fn red_score(&self) -> i32 {
        match self {
            GameHandler::Deathmatch => 0,
            GameHandler::CaptureTheFlag(ctf) => ctf.red_score(),
            GameHandler::CaptureTheBase(ctb) => ctb.red_score(),
        }
    }

    pub fn blue_score(&self) -> i32 {
        match self {
            GameHandler::Deathmatch => 0,
            GameHandler::CaptureTheFlag(ctf) => ctf.blue_score(),
            GameHandler::CaptureTheBase(ctb) => ctb.blue_score(),
        }
    }

    pub fn winning_team(&self) -> Alliance {
        winner_by_score(self.red_score(), self.blue_score())
    }

    /// Current objective state for a late joiner
    pub fn status(&self) -> Vec<HandlerEvent> {
        match self {
            GameHandler::Deathmatch => Vec::new(),
            GameHandler::CaptureTheFlag(ctf) => ctf.status(),
            GameHandler::CaptureTheBase(ctb) => ctb.status(),
        }
    }
}

fn winner_by_score(red: i32, blue: i32) -> Alliance {
    match red.cmp(&blue) {
        std::cmp::Ordering::Greater => Alliance::Red,
        std::cmp::Ordering::Less => Alliance::Blue,
        std::cmp::Ordering::Equal => Alliance::None,
    }
}
