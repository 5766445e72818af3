//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};

use crate::game::combat::{CombatEvent, DamageSource};
use crate::game::data::UtilityType;
use crate::game::handler::HandlerEvent;
use crate::game::map::GameMode;
use crate::game::points::Statistics;
use crate::game::utility::ActiveUtility;
use crate::game::{Alliance, Direction, Point, TankId};

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Client finished loading the map and wants objective state
    Ready,

    /// Keeps the idle timer from expiring
    KeepAlive,

    /// Movement start/stop. `timestamp` is the client clock in ms.
    Move {
        timestamp: i64,
        position: Point,
        direction: Direction,
    },

    /// Rotation start/stop
    Rotate {
        timestamp: i64,
        angle: f64,
        direction: Direction,
    },

    /// Fire toward a world point
    Fire {
        timestamp: i64,
        target: Point,
    },

    /// Begin charging a charge weapon
    StartCharging,

    Chat {
        message: String,
    },

    /// Answer to a `clock_sync_request`
    ClockSyncReply {
        seq: u32,
        /// Client clock in ms when the request arrived
        client_time: i64,
    },

    GetScoreboard,

    GetPlayerList,

    /// Leave the game
    Leave,
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Sent once after joining
    Welcome {
        you: PlayerInfo,
        players: Vec<PlayerInfo>,
        map: String,
        mode: GameMode,
        time_left: f64,
        server_time: u64,
    },

    PlayerJoined {
        player: PlayerInfo,
    },

    PlayerLeft {
        id: TankId,
    },

    PlayerMoved {
        id: TankId,
        position: Point,
        direction: Direction,
    },

    PlayerRotated {
        id: TankId,
        angle: f64,
        direction: Direction,
    },

    PlayerRespawned {
        id: TankId,
        position: Point,
    },

    PlayerDamaged {
        victim: TankId,
        hit: HitSource,
        damage: i32,
        killing_blow: bool,
    },

    /// The server rejected a move; snap back to `position`
    ResetPosition {
        position: Point,
    },

    ProjectileCreated {
        projectile: ProjectileInfo,
    },

    /// Several projectiles from one shot, staggered by `spawn_time_ms`
    ProjectilesCreated {
        projectiles: Vec<ProjectileInfo>,
    },

    EnvironmentSpawned {
        effect_id: i32,
        property_id: i32,
        owner: TankId,
        position: Point,
    },

    BaseDamaged {
        team: Alliance,
        base: i32,
        hit: HitSource,
        damage: i32,
        destroyed: bool,
    },

    UtilitySpawned {
        utility_id: i32,
        utility: UtilityType,
        position: Point,
    },

    UtilityApplied {
        tank_id: TankId,
        utility_id: i32,
        utility: UtilityType,
    },

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

    RoundEnded {
        winner: Alliance,
    },

    MapRotated {
        map: String,
        mode: GameMode,
    },

    ClockSyncRequest {
        seq: u32,
    },

    Chat {
        message: String,
    },

    Scoreboard {
        statistics: Vec<Statistics>,
        red_score: i32,
        blue_score: i32,
    },

    PlayerList {
        players: Vec<PlayerInfo>,
    },

    /// Error message
    Error {
        code: String,
        message: String,
    },
}

/// Public view of a tank
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub id: TankId,
    pub name: String,
    pub weapon_id: i32,
    pub team: Alliance,
    pub position: Point,
    pub angle: f64,
    pub health: i32,
    pub alive: bool,
}

/// A projectile announced to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectileInfo {
    pub owner: TankId,
    pub projectile_id: i32,
    pub projectile_type_id: i32,
    pub target: Point,
    #[serde(default)]
    pub spawn_time_ms: i64,
}

/// What landed a blow
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HitSource {
    Projectile { owner: TankId, projectile_id: i32 },
    Environment { owner: TankId, effect_id: i32 },
}

impl From<DamageSource> for HitSource {
    fn from(source: DamageSource) -> Self {
        match source {
            DamageSource::Projectile {
                owner,
                projectile_id,
                ..
            } => HitSource::Projectile {
                owner,
                projectile_id,
            },
            DamageSource::Environment { owner, effect_id } => {
                HitSource::Environment { owner, effect_id }
            }
        }
    }
}

impl From<HandlerEvent> for ServerMsg {
    fn from(event: HandlerEvent) -> Self {
        match event {
            HandlerEvent::FlagSpawned { flag, position } => ServerMsg::FlagSpawned { flag, position },
            HandlerEvent::FlagPickedUp { flag, holder } => ServerMsg::FlagPickedUp { flag, holder },
            HandlerEvent::FlagDropped {
                flag,
                holder,
                position,
            } => ServerMsg::FlagDropped {
                flag,
                holder,
                position,
            },
            HandlerEvent::FlagReturned { flag, by } => ServerMsg::FlagReturned { flag, by },
            HandlerEvent::FlagCaptured { flag, by } => ServerMsg::FlagCaptured { flag, by },
            HandlerEvent::BaseStatus { team, base, health } => {
                ServerMsg::BaseStatus { team, base, health }
            }
            HandlerEvent::BaseCaptured {
                old_team,
                new_team,
                base,
                by,
            } => ServerMsg::BaseCaptured {
                old_team,
                new_team,
                base,
                by,
            },
        }
    }
}

impl ServerMsg {
    /// Client-facing form of a combat event. Kills have none; they only
    /// feed the scoreboard.
    pub fn from_combat(event: &CombatEvent) -> Option<Self> {
        let msg = match event {
            CombatEvent::ProjectileCreated {
                owner,
                projectile_id,
                projectile_type_id,
                target,
            } => ServerMsg::ProjectileCreated {
                projectile: ProjectileInfo {
                    owner: *owner,
                    projectile_id: *projectile_id,
                    projectile_type_id: *projectile_type_id,
                    target: *target,
                    spawn_time_ms: 0,
                },
            },
            CombatEvent::PlayerDamaged {
                victim,
                source,
                damage,
                killing_blow,
            } => ServerMsg::PlayerDamaged {
                victim: *victim,
                hit: (*source).into(),
                damage: *damage,
                killing_blow: *killing_blow,
            },
            CombatEvent::ObjectDamaged {
                object_id,
                team,
                source,
                damage,
                destroyed,
            } => ServerMsg::BaseDamaged {
                team: *team,
                base: *object_id,
                hit: (*source).into(),
                damage: *damage,
                destroyed: *destroyed,
            },
            CombatEvent::EnvironmentSpawned {
                effect_id,
                property_id,
                owner,
                position,
            } => ServerMsg::EnvironmentSpawned {
                effect_id: *effect_id,
                property_id: *property_id,
                owner: *owner,
                position: *position,
            },
            CombatEvent::Killed(_) => return None,
        };
        Some(msg)
    }

    pub fn utility_spawned(active: &ActiveUtility) -> Self {
        ServerMsg::UtilitySpawned {
            utility_id: active.id,
            utility: active.utility.clone(),
            position: active.position,
        }
    }

    pub fn error(code: &str, message: impl Into<String>) -> Self {
        ServerMsg::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}
