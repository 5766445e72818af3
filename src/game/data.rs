//! Static weapon, projectile, environment and utility tables
//!
//! Loaded once at startup from a JSON file; treated as immutable afterwards.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::GameError;

/// Charge time used when a weapon does not set one
pub const DEFAULT_MAX_CHARGE_TIME_MS: f64 = 3000.0;

/// Timed area effect left behind by some projectiles
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentProperty {
    pub id: i32,
    pub name: String,
    #[serde(default)]
    pub spawn_on_wall_hit: bool,
    #[serde(default)]
    pub spawn_on_player_hit: bool,
    #[serde(default)]
    pub spawn_on_expiration: bool,
    pub duration_seconds: f64,
    pub interval_seconds: f64,
    pub aoe_radius: f64,
    #[serde(default)]
    pub aoe_decay: f64,
    pub minimum_damage: i32,
    pub maximum_damage: i32,
    /// When false a new effect may not overlap an active one of the same property
    #[serde(default = "default_true")]
    pub allow_overlap: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectileType {
    pub id: i32,
    pub name: String,
    #[serde(default)]
    pub aoe_radius: f64,
    #[serde(default)]
    pub aoe_decay: f64,
    /// Spread in degrees
    #[serde(default)]
    pub cone_radius: f64,
    #[serde(default)]
    pub cone_damage_full_area: bool,
    pub minimum_damage: i32,
    pub maximum_damage: i32,
    #[serde(default)]
    pub is_instantaneous: bool,
    pub initial_velocity: f64,
    pub terminal_velocity: f64,
    #[serde(default)]
    pub acceleration: f64,
    pub range: i32,
    #[serde(default)]
    pub range_variation: i32,
    pub collision_radius: f64,
    #[serde(default = "default_one")]
    pub object_damage_factor: f64,
    #[serde(default)]
    pub environment_property: Option<i32>,
}

/// Weapon as written in the data file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeaponRecord {
    pub id: i32,
    pub name: String,
    #[serde(default)]
    pub cooldown: f64,
    /// Degrees above the ground; zero for direct fire
    #[serde(default)]
    pub launch_angle: f64,
    #[serde(default)]
    pub max_charge_time_seconds: f64,
    #[serde(default = "default_projectiles_per_shot")]
    pub projectiles_per_shot: i32,
    #[serde(default)]
    pub interval_between_projectile_seconds: f64,
    #[serde(default = "default_one")]
    pub linear_factor: f64,
    #[serde(default = "default_one")]
    pub exponent: f64,
    pub projectile: i32,
}

/// Weapon with its projectile resolved and angles in radians
#[derive(Debug, Clone)]
pub struct Weapon {
    pub id: i32,
    pub name: String,
    pub cooldown: f64,
    pub launch_angle: f64,
    pub max_charge_time_seconds: f64,
    pub projectiles_per_shot: i32,
    pub interval_between_projectile_seconds: f64,
    pub linear_factor: f64,
    pub exponent: f64,
    pub projectile: ProjectileType,
}

impl Weapon {
    pub fn is_arc(&self) -> bool {
        self.launch_angle > 0.0
    }

    pub fn can_charge(&self) -> bool {
        self.max_charge_time_seconds > 0.0
    }

    pub fn max_charge_time_ms(&self) -> f64 {
        if self.can_charge() {
            self.max_charge_time_seconds * 1000.0
        } else {
            DEFAULT_MAX_CHARGE_TIME_MS
        }
    }
}

/// Power-up definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UtilityType {
    pub id: i32,
    pub model: String,
    /// Seconds; zero applies the effect instantly
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub damage_factor: f64,
    #[serde(default)]
    pub speed_factor: f64,
    #[serde(default)]
    pub rate_factor: f64,
    #[serde(default)]
    pub health_increase: i32,
    #[serde(default)]
    pub health_factor: f64,
}

fn default_true() -> bool {
    true
}

fn default_one() -> f64 {
    1.0
}

fn default_projectiles_per_shot() -> i32 {
    1
}

/// On-disk layout of the data file
#[derive(Debug, Deserialize)]
struct DataFile {
    #[serde(default)]
    environment_properties: Vec<EnvironmentProperty>,
    projectiles: Vec<ProjectileType>,
    weapons: Vec<WeaponRecord>,
    #[serde(default)]
    utilities: Vec<UtilityType>,
}

/// Static data errors
#[derive(Debug, thiserror::Error)]
pub enum DataError {
    #[error("Failed to read game data: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse game data: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Duplicate {kind} id {id}")]
    Duplicate { kind: &'static str, id: i32 },

    #[error("{kind} #{id} references missing {target} #{target_id}")]
    MissingReference {
        kind: &'static str,
        id: i32,
        target: &'static str,
        target_id: i32,
    },
}

/// Immutable lookup tables keyed by id
#[derive(Debug, Default)]
pub struct GameData {
    weapons: HashMap<i32, Arc<Weapon>>,
    environments: HashMap<i32, Arc<EnvironmentProperty>>,
    utilities: Vec<UtilityType>,
}

impl GameData {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DataError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, DataError> {
        let file: DataFile = serde_json::from_str(text)?;

        let mut environments = HashMap::new();
        for env in file.environment_properties {
            let id = env.id;
            if environments.insert(id, Arc::new(env)).is_some() {
                return Err(DataError::Duplicate {
                    kind: "environment property",
                    id,
                });
            }
        }

        let mut projectiles = HashMap::new();
        for projectile in file.projectiles {
            if let Some(env_id) = projectile.environment_property {
                if !environments.contains_key(&env_id) {
                    return Err(DataError::MissingReference {
                        kind: "projectile",
                        id: projectile.id,
                        target: "environment property",
                        target_id: env_id,
                    });
                }
            }
            let id = projectile.id;
            if projectiles.insert(id, projectile).is_some() {
                return Err(DataError::Duplicate {
                    kind: "projectile",
                    id,
                });
            }
        }

        let mut weapons = HashMap::new();
        for record in file.weapons {
            let projectile = projectiles.get(&record.projectile).cloned().ok_or(
                DataError::MissingReference {
                    kind: "weapon",
                    id: record.id,
                    target: "projectile",
                    target_id: record.projectile,
                },
            )?;

            let weapon = Weapon {
                id: record.id,
                name: record.name,
                cooldown: record.cooldown,
                launch_angle: record.launch_angle.to_radians(),
                max_charge_time_seconds: record.max_charge_time_seconds,
                projectiles_per_shot: record.projectiles_per_shot.max(1),
                interval_between_projectile_seconds: record.interval_between_projectile_seconds,
                linear_factor: record.linear_factor,
                exponent: record.exponent,
                projectile,
            };

            if weapons.insert(record.id, Arc::new(weapon)).is_some() {
                return Err(DataError::Duplicate {
                    kind: "weapon",
                    id: record.id,
                });
            }
        }

        Ok(Self {
            weapons,
            environments,
            utilities: file.utilities,
        })
    }

    pub fn weapon(&self, id: i32) -> Result<Arc<Weapon>, GameError> {
        self.weapons
            .get(&id)
            .cloned()
            .ok_or(GameError::UnknownWeapon(id))
    }

    pub fn environment(&self, id: i32) -> Result<Arc<EnvironmentProperty>, GameError> {
        self.environments
            .get(&id)
            .cloned()
            .ok_or(GameError::UnknownEnvironment(id))
    }

    pub fn utilities(&self) -> &[UtilityType] {
        &self.utilities
    }

    pub fn weapon_count(&self) -> usize {
        self.weapons.len()
    }

    /// Register a weapon directly, bypassing the data file
    #[cfg(test)]
    pub fn insert_weapon(&mut self, weapon: Weapon) {
        self.weapons.insert(weapon.id, Arc::new(weapon));
    }

    #[cfg(test)]
    pub fn insert_environment(&mut self, env: EnvironmentProperty) {
        self.environments.insert(env.id, Arc::new(env));
    }

    #[cfg(test)]
    pub fn insert_utility(&mut self, utility: UtilityType) {
        self.utilities.push(utility);
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    const SAMPLE: &str = r#"{
        "environment_properties": [
            { "id": 1, "name": "Fire", "spawn_on_wall_hit": true, "duration_seconds": 4,
              "interval_seconds": 0.5, "aoe_radius": 40, "minimum_damage": 2, "maximum_damage": 4 }
        ],
        "projectiles": [
            { "id": 3, "name": "Shell", "minimum_damage": 20, "maximum_damage": 30,
              "initial_velocity": 400, "terminal_velocity": 400, "range": 900,
              "collision_radius": 6, "environment_property": 1 }
        ],
        "weapons": [
            { "id": 7, "name": "Mortar", "launch_angle": 45, "projectile": 3 }
        ],
        "utilities": [
            { "id": 1, "model": "speed", "duration": 10, "speed_factor": 0.5 }
        ]
    }"#;

    #[test]
    fn loads_and_resolves_references() {
        let data = GameData::from_json(SAMPLE).unwrap();

        let weapon = data.weapon(7).unwrap();
        assert_eq!(weapon.projectile.id, 3);
        assert_approx_eq!(weapon.launch_angle, std::f64::consts::FRAC_PI_4);
        assert!(weapon.is_arc());
        assert_eq!(weapon.projectiles_per_shot, 1);
        assert_approx_eq!(weapon.max_charge_time_ms(), DEFAULT_MAX_CHARGE_TIME_MS);

        let env = data.environment(1).unwrap();
        assert!(env.allow_overlap);
        assert_eq!(data.utilities().len(), 1);
    }

    #[test]
    fn missing_lookups_are_errors() {
        let data = GameData::from_json(SAMPLE).unwrap();
        assert!(matches!(data.weapon(99), Err(GameError::UnknownWeapon(99))));
        assert!(matches!(
            data.environment(5),
            Err(GameError::UnknownEnvironment(5))
        ));
    }

    #[test]
    fn rejects_dangling_projectile() {
        let text = SAMPLE.replace("\"projectile\": 3", "\"projectile\": 4");
        assert!(matches!(
            GameData::from_json(&text),
            Err(DataError::MissingReference { id: 7, .. })
        ));
    }
}
