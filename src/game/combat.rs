//! Damage plumbing shared by tanks, bases and the projectile pipeline

use serde::Serialize;

use super::{Alliance, Point, TankId};

/// Who or what dealt a blow
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DamageSource {
    Projectile {
        owner: TankId,
        projectile_id: i32,
        /// Multiplier applied when the target is a structure
        object_damage_factor: f64,
    },
    Environment {
        owner: TankId,
        effect_id: i32,
    },
}

impl DamageSource {
    pub fn owner(&self) -> TankId {
        match self {
            Self::Projectile { owner, .. } | Self::Environment { owner, .. } => *owner,
        }
    }
}

/// Death of a tank with credit for everyone involved
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Kill {
    pub victim: TankId,
    pub killer: TankId,
    pub assists: Vec<TankId>,
}

/// Result of a single `inflict_damage` call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DamageOutcome {
    /// Damage actually applied after any target-specific scaling
    pub dealt: i32,
    /// The blow took the target to zero health
    pub destroyed: bool,
    pub kill: Option<Kill>,
}

/// Anything projectiles and environment effects can hurt
pub trait Damageable: Send + Sync {
    fn object_id(&self) -> i32;
    fn position(&self) -> Point;
    fn radius(&self) -> f64;
    fn team(&self) -> Alliance;
    fn is_alive(&self) -> bool;
    fn armor_factor(&self) -> f64;
    fn inflict_damage(&self, damage: i32, source: &DamageSource, now: u64) -> DamageOutcome;
}

/// Something that happened while resolving projectiles or area effects.
///
/// The projectile pipeline only produces these; crediting points and
/// notifying clients is left to the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum CombatEvent {
    /// Instant weapons report their endpoint once resolved
    ProjectileCreated {
        owner: TankId,
        projectile_id: i32,
        projectile_type_id: i32,
        target: Point,
    },
    PlayerDamaged {
        victim: TankId,
        source: DamageSource,
        damage: i32,
        killing_blow: bool,
    },
    ObjectDamaged {
        object_id: i32,
        team: Alliance,
        source: DamageSource,
        damage: i32,
        destroyed: bool,
    },
    EnvironmentSpawned {
        effect_id: i32,
        property_id: i32,
        owner: TankId,
        position: Point,
    },
    Killed(Kill),
}

/// Record the outcome of hitting a tank
pub fn player_damage_events(
    events: &mut Vec<CombatEvent>,
    victim: TankId,
    source: DamageSource,
    outcome: DamageOutcome,
) {
    events.push(CombatEvent::PlayerDamaged {
        victim,
        source,
        damage: outcome.dealt,
        killing_blow: outcome.kill.is_some(),
    });
    if let Some(kill) = outcome.kill {
        events.push(CombatEvent::Killed(kill));
    }
}

/// Record the outcome of hitting a structure
pub fn object_damage_events(
    events: &mut Vec<CombatEvent>,
    object_id: i32,
    team: Alliance,
    source: DamageSource,
    outcome: DamageOutcome,
) {
    events.push(CombatEvent::ObjectDamaged {
        object_id,
        team,
        source,
        damage: outcome.dealt,
        destroyed: outcome.destroyed,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kill_events_follow_damage() {
        let mut events = Vec::new();
        let source = DamageSource::Environment {
            owner: 3,
            effect_id: 0,
        };
        let outcome = DamageOutcome {
            dealt: 40,
            destroyed: true,
            kill: Some(Kill {
                victim: 1,
                killer: 3,
                assists: vec![2],
            }),
        };

        player_damage_events(&mut events, 1, source, outcome);

        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[0],
            CombatEvent::PlayerDamaged {
                victim: 1,
                damage: 40,
                killing_blow: true,
                ..
            }
        ));
        assert!(matches!(&events[1], CombatEvent::Killed(kill) if kill.assists == vec![2]));
        assert_eq!(source.owner(), 3);
    }
}
