//! Timed area effects (burning ground and the like) left by projectiles

use std::collections::BTreeMap;
use std::sync::Arc;

use rand::Rng;
use tracing::debug;

use super::combat::{
    object_damage_events, player_damage_events, CombatEvent, DamageSource, Damageable,
};
use super::data::EnvironmentProperty;
use super::geometry::circle_collision;
use super::node::NodeManager;
use super::{Alliance, Point, TankId, TankManager};

/// One effect currently on the map
#[derive(Debug, Clone)]
pub struct ActiveEnvironmentEffect {
    pub id: i32,
    pub owner: TankId,
    pub property: Arc<EnvironmentProperty>,
    pub team: Alliance,
    pub position: Point,
    expires_at: u64,
    next_damage_at: u64,
    interval_flag: bool,
}

impl ActiveEnvironmentEffect {
    fn new(
        id: i32,
        property: Arc<EnvironmentProperty>,
        team: Alliance,
        position: Point,
        owner: TankId,
        now: u64,
    ) -> Self {
        Self {
            id,
            owner,
            expires_at: now + (property.duration_seconds * 1000.0) as u64,
            next_damage_at: now + (property.interval_seconds * 1000.0) as u64,
            property,
            team,
            position,
            interval_flag: false,
        }
    }

    pub fn radius(&self) -> f64 {
        self.property.aoe_radius
    }

    /// Latches once the damage interval passes and schedules the next one
    pub fn interval_reached(&mut self, now: u64) -> bool {
        if self.interval_flag {
            return true;
        }
        if now >= self.next_damage_at {
            self.interval_flag = true;
            self.next_damage_at = now + (self.property.interval_seconds * 1000.0) as u64;
            return true;
        }
        false
    }

    /// Damage for this interval; only valid after `interval_reached`
    pub fn take_damage(&mut self, rng: &mut impl Rng) -> i32 {
        debug_assert!(self.interval_flag);
        self.interval_flag = false;
        random_between(rng, self.property.minimum_damage, self.property.maximum_damage)
    }

    pub fn has_expired(&self, now: u64) -> bool {
        now >= self.expires_at
    }

    fn source(&self) -> DamageSource {
        DamageSource::Environment {
            owner: self.owner,
            effect_id: self.id,
        }
    }
}

/// Inclusive uniform pick that tolerates swapped bounds
pub fn random_between(rng: &mut impl Rng, a: i32, b: i32) -> i32 {
    let (low, high) = if a <= b { (a, b) } else { (b, a) };
    rng.gen_range(low..=high)
}

#[derive(Debug, Default)]
pub struct EnvironmentManager {
    effects: BTreeMap<i32, ActiveEnvironmentEffect>,
}

impl EnvironmentManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_free_id(&self) -> i32 {
        (0..)
            .find(|id| !self.effects.contains_key(id))
            .unwrap_or_default()
    }

    /// Place a new effect. Returns `None` when the property forbids overlapping
    /// an active effect of the same kind.
    pub fn spawn(
        &mut self,
        property: Arc<EnvironmentProperty>,
        team: Alliance,
        position: Point,
        owner: TankId,
        now: u64,
    ) -> Option<i32> {
        if !property.allow_overlap {
            let overlaps = self.effects.values().any(|effect| {
                effect.property.id == property.id
                    && circle_collision(
                        effect.position,
                        effect.radius(),
                        position,
                        property.aoe_radius,
                    )
            });
            if overlaps {
                debug!(property = property.id, "Rejected overlapping environment effect");
                return None;
            }
        }

        let id = self.next_free_id();
        debug!(effect_id = id, x = position.x as i32, y = position.y as i32, "Environment effect spawned");
        self.effects.insert(
            id,
            ActiveEnvironmentEffect::new(id, property, team, position, owner, now),
        );
        Some(id)
    }

    pub fn remove(&mut self, id: i32) -> bool {
        self.effects.remove(&id).is_some()
    }

    pub fn clear(&mut self) {
        self.effects.clear();
    }

    pub fn len(&self) -> usize {
        self.effects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    pub fn effects(&self) -> impl Iterator<Item = &ActiveEnvironmentEffect> {
        self.effects.values()
    }

    /// Damage everything standing in an effect whose interval has come up,
    /// then drop expired effects.
    pub fn update(
        &mut self,
        tanks: &TankManager,
        nodes: &NodeManager,
        objects: &BTreeMap<i32, Arc<dyn Damageable>>,
        rng: &mut impl Rng,
        now: u64,
        events: &mut Vec<CombatEvent>,
    ) {
        let mut expired = Vec::new();

        for effect in self.effects.values_mut() {
            if effect.interval_reached(now) {
                let damage = effect.take_damage(rng);
                let source = effect.source();
                let node_id = nodes.node_at(effect.position);

                for tank in nodes
                    .relevant_players(node_id)
                    .into_iter()
                    .filter_map(|id| tanks.find(id))
                {
                    if !tank.alive()
                        || effect.team.is_allied_with(tank.team())
                        || effect.owner == tank.id()
                    {
                        continue;
                    }
                    if circle_collision(
                        tank.position(),
                        Damageable::radius(&*tank),
                        effect.position,
                        effect.radius(),
                    ) {
                        debug!(effect_id = effect.id, tank_id = tank.id(), damage, "Environment hit tank");
                        let outcome = tank.inflict_damage(damage, &source, now);
                        player_damage_events(events, tank.id(), source, outcome);
                    }
                }

                for object in objects.values() {
                    if !object.is_alive() || effect.team.is_allied_with(object.team()) {
                        continue;
                    }
                    if circle_collision(
                        object.position(),
                        object.radius(),
                        effect.position,
                        effect.radius(),
                    ) {
                        debug!(effect_id = effect.id, object_id = object.object_id(), damage, "Environment hit object");
                        let outcome = object.inflict_damage(damage, &source, now);
                        object_damage_events(events, object.object_id(), object.team(), source, outcome);
                    }
                }
            }

            if effect.has_expired(now) {
                expired.push(effect.id);
            }
        }

        for id in expired {
            debug!(effect_id = id, "Environment effect expired");
            self.effects.remove(&id);
        }
    }
}
