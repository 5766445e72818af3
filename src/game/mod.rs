//! Game simulation modules

pub mod clock_sync;
pub mod combat;
pub mod commands;
pub mod data;
pub mod environment;
pub mod frame;
pub mod geometry;
pub mod handler;
pub mod map;
pub mod map_manager;
pub mod node;
pub mod players;
pub mod points;
pub mod projectile;
pub mod tank;
pub mod tank_manager;
pub mod utility;
pub mod world;

use serde::{Deserialize, Serialize};

pub use tank::Tank;
pub use tank_manager::TankManager;
pub use world::GameWorld;

/// Stable integer handle for a joined player
pub type TankId = i32;

/// Width and height of a single map tile in world units
pub const TILE_SIZE: f64 = 64.0;
/// Width of a spatial partition node in world units
pub const NODE_WIDTH: f64 = 832.0;
/// Height of a spatial partition node in world units
pub const NODE_HEIGHT: f64 = 640.0;

pub const DEFAULT_VELOCITY: f64 = 275.0;
pub const DEFAULT_ANGULAR_VELOCITY: f64 = 2.666666667;
pub const TANK_SPHERE_RADIUS: f64 = 25.0;
pub const DEFAULT_MAX_HEALTH: i32 = 200;
/// Ceiling used when an instant health utility is applied
pub const MAX_UTILITY_HEALTH: i32 = 100;
pub const DEFAULT_RESPAWN_TIME_MS: u64 = 5000;
pub const PROJECTILE_SPAWN_OFFSET: f64 = 50.0;
pub const MAX_LEGAL_DISTANCE: f64 = 1000.0;
/// Gravity applied to arc-fired projectiles (world units / s^2)
pub const GRAVITY: f64 = -1500.0;

/// A 2D world position. The y axis grows upward, so map rows sit at negative y.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    /// Move `distance` units along `angle` (radians)
    pub fn offset(&self, angle: f64, distance: f64) -> Point {
        Point::new(
            self.x + angle.cos() * distance,
            self.y + angle.sin() * distance,
        )
    }

    /// World-space center of the tile at grid coordinates (x, y)
    pub fn tile_center(x: i32, y: i32) -> Point {
        Point::new(
            f64::from(x) * TILE_SIZE + TILE_SIZE / 2.0,
            -(f64::from(y) * TILE_SIZE + TILE_SIZE / 2.0),
        )
    }
}

/// 3D vector used by arc-fired projectiles
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Team membership
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Alliance {
    /// Free for all
    #[default]
    None,
    Red,
    Blue,
}

impl Alliance {
    /// True when both sides are on the same real team
    pub fn is_allied_with(self, other: Alliance) -> bool {
        self != Alliance::None && self == other
    }

    pub fn opponent(self) -> Alliance {
        match self {
            Alliance::Red => Alliance::Blue,
            Alliance::Blue => Alliance::Red,
            Alliance::None => Alliance::None,
        }
    }
}

/// Movement or rotation direction requested by a player
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    None,
    Forward,
    Reverse,
    Left,
    Right,
}

/// Advance a position or angle by one movement step.
///
/// FORWARD/REVERSE move `position` along `angle`; LEFT/RIGHT turn `angle`.
pub fn advance_position(
    position: &mut Point,
    angle: &mut f64,
    direction: Direction,
    speed: f64,
    delta: f64,
) {
    let step = speed * delta;
    match direction {
        Direction::Forward => {
            position.x += angle.cos() * step;
            position.y += angle.sin() * step;
        }
        Direction::Reverse => {
            position.x -= angle.cos() * step;
            position.y -= angle.sin() * step;
        }
        Direction::Left => *angle += step,
        Direction::Right => *angle -= step,
        Direction::None => {}
    }
}

/// Simulation errors
#[derive(Debug, thiserror::Error)]
pub enum GameError {
    #[error("Tank #{0} does not exist")]
    TankNotFound(TankId),

    #[error("Unknown weapon id {0}")]
    UnknownWeapon(i32),

    #[error("Unknown environment property id {0}")]
    UnknownEnvironment(i32),

    #[error("Bad information: {0}")]
    BadInformation(&'static str),

    #[error("That session key is invalid")]
    PermissionDenied,

    #[error("The server is full")]
    ServerFull,

    #[error("No map is loaded")]
    NoMapLoaded,

    #[error("No usable map could be loaded")]
    NoLegalMaps,

    #[error("Client transport has shut down")]
    TransportClosed,
}
