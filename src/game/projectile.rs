//! In-flight projectiles: kinematics, collisions and damage
//!
//! Three flight models exist:
//! - instant weapons resolve along a ray on their first tick
//! - arc weapons follow a closed-form ballistic path and land on the ground
//! - everything else flies straight, accelerating toward terminal velocity
//!
//! Resolution never talks to clients directly. Every hit, kill and spawned
//! effect is returned as a [`CombatEvent`] for the caller to credit and
//! broadcast.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use super::combat::{
    object_damage_events, player_damage_events, CombatEvent, DamageSource, Damageable,
};
use super::data::{GameData, Weapon};
use super::environment::{random_between, EnvironmentManager};
use super::geometry::{
    aoe_damage, circle_collision, circle_to_rectangle, line_circle_collision, round_half_up, Rect,
};
use super::map::Map;
use super::node::NodeManager;
use super::{
    Alliance, Point, Tank, TankId, TankManager, Vector3, GRAVITY, TANK_SPHERE_RADIUS, TILE_SIZE,
};

/// Length of the barrel used to place the launch tip of arc weapons
const CANNON_LENGTH: f64 = 60.0;
/// Step used when tracing instant weapons through the tile grid
const RAY_STEP: f64 = 12.0;
/// Hit radius of a tank against instant weapons
const INSTANT_TANK_RADIUS: f64 = TANK_SPHERE_RADIUS + 15.0;

/// A projectile that has been fired and not yet resolved
#[derive(Debug, Clone)]
pub struct ActiveProjectile {
    pub id: i32,
    pub owner: TankId,
    /// Owner's team when fired
    pub team: Alliance,
    pub alive_ms: i64,
    pub expire_ms: i64,
    pub angle: f64,
    pub velocity: f64,
    pub node_id: i32,
    pub origin: Point,
    pub target: Point,
    pub position: Point,
    pub weapon: Arc<Weapon>,
    pub damage: f64,
    pub tip: Vector3,
    pub velocity_component: Vector3,
}

impl ActiveProjectile {
    fn new(
        id: i32,
        owner: &Tank,
        angle: f64,
        position: Point,
        target: Point,
        weapon: Arc<Weapon>,
    ) -> Self {
        let projectile = &weapon.projectile;
        let expire_ms =
            (f64::from(projectile.range) / projectile.initial_velocity * 1000.0) as i64;

        Self {
            id,
            owner: owner.id(),
            team: owner.team(),
            alive_ms: 0,
            expire_ms,
            angle,
            velocity: projectile.initial_velocity,
            node_id: -1,
            origin: position,
            target,
            position,
            weapon,
            damage: 0.0,
            tip: Vector3::default(),
            velocity_component: Vector3::default(),
        }
    }

    /// Arc projectiles only end by landing
    pub fn expired(&self) -> bool {
        self.alive_ms >= self.expire_ms && !self.weapon.is_arc()
    }

    /// Point at the front edge of the projectile
    fn leading_point(&self) -> Point {
        self.position
            .offset(self.angle, self.weapon.projectile.collision_radius)
    }

    fn source(&self) -> DamageSource {
        DamageSource::Projectile {
            owner: self.owner,
            projectile_id: self.id,
            object_damage_factor: self.weapon.projectile.object_damage_factor,
        }
    }
}

/// Result of firing one projectile
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fired {
    /// `None` for instant weapons, which resolve on the next tick
    pub id: Option<i32>,
    /// Target after spread and range variation
    pub target: Point,
}

/// World state a tick of projectile processing reads from
pub struct CombatContext<'a> {
    pub tanks: &'a TankManager,
    pub nodes: &'a NodeManager,
    pub map: &'a Map,
    pub now: u64,
}

struct ProjectileState {
    projectiles: BTreeMap<i32, ActiveProjectile>,
    damageables: BTreeMap<i32, Arc<dyn Damageable>>,
    environment: EnvironmentManager,
    rng: ChaCha8Rng,
}

/// Owns every live projectile, the damageable-object registry and the
/// environment effects projectiles leave behind
pub struct ProjectileManager {
    data: Arc<GameData>,
    state: Mutex<ProjectileState>,
}

impl ProjectileManager {
    pub fn new(data: Arc<GameData>) -> Self {
        Self::with_rng(data, ChaCha8Rng::from_entropy())
    }

    /// Deterministic damage, spread and range sampling
    pub fn with_seed(data: Arc<GameData>, seed: u64) -> Self {
        Self::with_rng(data, ChaCha8Rng::seed_from_u64(seed))
    }

    fn with_rng(data: Arc<GameData>, rng: ChaCha8Rng) -> Self {
        Self {
            data,
            state: Mutex::new(ProjectileState {
                projectiles: BTreeMap::new(),
                damageables: BTreeMap::new(),
                environment: EnvironmentManager::new(),
                rng,
            }),
        }
    }

    /// Fire a projectile from `position` toward `target`
    pub fn add(
        &self,
        owner: &Tank,
        angle: f64,
        position: Point,
        target: Point,
        now: u64,
    ) -> Fired {
        let weapon = owner.weapon().clone();
        let instant = weapon.projectile.is_instantaneous;

        let mut state = self.state.lock();
        let id = (0..)
            .find(|id| !state.projectiles.contains_key(id))
            .unwrap_or_default();

        let mut projectile = ActiveProjectile::new(id, owner, angle, position, target, weapon);
        initial_calculations(&mut projectile, owner, &mut state.rng, now);

        let target = projectile.target;
        state.projectiles.insert(id, projectile);

        Fired {
            id: (!instant).then_some(id),
            target,
        }
    }

    pub fn get(&self, id: i32) -> Option<ActiveProjectile> {
        self.state.lock().projectiles.get(&id).cloned()
    }

    pub fn remove(&self, id: i32) -> bool {
        self.state.lock().projectiles.remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.state.lock().projectiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().projectiles.is_empty()
    }

    pub fn environment_count(&self) -> usize {
        self.state.lock().environment.len()
    }

    /// Drop projectiles, registered objects and environment effects
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.projectiles.clear();
        state.damageables.clear();
        state.environment.clear();
    }

    pub fn add_damageable(&self, object: Arc<dyn Damageable>) {
        let id = object.object_id();
        debug_assert!(id >= 0);
        self.state.lock().damageables.insert(id, object);
    }

    pub fn remove_damageable(&self, id: i32) -> bool {
        self.state.lock().damageables.remove(&id).is_some()
    }

    pub fn damageable_ids(&self) -> Vec<i32> {
        self.state.lock().damageables.keys().copied().collect()
    }

    /// Advance every projectile by `delta` seconds and resolve collisions
    pub fn process(&self, ctx: &CombatContext<'_>, delta: f64) -> Vec<CombatEvent> {
        let mut events = Vec::new();
        let delta_ms = (delta * 1000.0) as i64;

        let mut guard = self.state.lock();
        let ProjectileState {
            projectiles,
            damageables,
            environment,
            rng,
        } = &mut *guard;

        let mut resolver = Resolver {
            ctx,
            data: &self.data,
            damageables,
            environment,
            rng,
            events: &mut events,
        };

        let mut finished = Vec::new();
        for projectile in projectiles.values_mut() {
            // Shots from a player who has left do nothing
            if !ctx.tanks.contains(projectile.owner) {
                debug!(
                    owner = projectile.owner,
                    projectile_id = projectile.id,
                    "Owner gone, dropping projectile"
                );
                finished.push(projectile.id);
                continue;
            }
            if !resolver.advance(projectile, delta) {
                finished.push(projectile.id);
                continue;
            }

            projectile.alive_ms += delta_ms;
            if projectile.expired() {
                resolver.expire(projectile);
                finished.push(projectile.id);
                continue;
            }

            projectile.node_id = ctx.nodes.node_at(projectile.position);
            if projectile.weapon.is_arc() {
                continue;
            }

            if wall_collision(projectile, ctx.map) {
                if projectile.weapon.projectile.aoe_radius > 0.0 {
                    resolver.splash(projectile);
                }
                finished.push(projectile.id);
            } else if resolver.collision_check(projectile) {
                finished.push(projectile.id);
            }
        }

        for id in finished {
            projectiles.remove(&id);
        }

        environment.update(ctx.tanks, ctx.nodes, damageables, rng, ctx.now, &mut events);
        events
    }
}

/// Spread, range variation, damage and ballistic setup performed once at fire time
fn initial_calculations(
    projectile: &mut ActiveProjectile,
    owner: &Tank,
    rng: &mut impl Rng,
    now: u64,
) {
    let weapon = projectile.weapon.clone();
    let data = &weapon.projectile;

    if data.cone_radius > 0.0 && !data.cone_damage_full_area {
        let cone = data.cone_radius.to_radians();
        let variance = rng.gen_range(0.0..=cone * 2.0) - cone;
        projectile.angle += variance;
        projectile.target = projectile
            .position
            .offset(projectile.angle, f64::from(data.range));
    }

    if data.range_variation > 0 {
        let new_range = random_between(rng, data.range, data.range + data.range_variation);
        let difference = f64::from(new_range - data.range);
        projectile.target = projectile.target.offset(projectile.angle, difference);
    }

    let actual_damage = f64::from(random_between(rng, data.minimum_damage, data.maximum_damage));
    let mut raw_damage = actual_damage + actual_damage * owner.damage_factor();

    if weapon.can_charge() {
        if let Some(charged) = owner.release_charge(raw_damage.trunc(), now) {
            raw_damage = f64::from(charged);
        }
    }
    projectile.damage = raw_damage;

    if weapon.is_arc() {
        let distance = projectile
            .target
            .distance(&projectile.origin)
            .min(f64::from(data.range));

        let tilt = weapon.launch_angle;
        let swivel = projectile.angle;
        let projection = CANNON_LENGTH * tilt.cos();
        projectile.tip = Vector3 {
            x: -projection * swivel.cos(),
            y: -projection * swivel.sin(),
            z: (CANNON_LENGTH * tilt.sin()).abs(),
        };

        let offset = if tilt > 45f64.to_radians() { 1.6 } else { 1.1 };
        let muzzle_velocity = (-GRAVITY * distance * offset).sqrt();
        projectile.velocity_component = Vector3 {
            x: muzzle_velocity * tilt.cos() * swivel.cos(),
            y: muzzle_velocity * tilt.cos() * swivel.sin(),
            z: muzzle_velocity * tilt.sin(),
        };
    }
}

/// Leading edge of the projectile against impassable tiles
fn wall_collision(projectile: &ActiveProjectile, map: &Map) -> bool {
    let radius = projectile.weapon.projectile.collision_radius;
    let circle = projectile.leading_point();

    let min_x = ((circle.x - radius) / TILE_SIZE).floor() as i32;
    let max_x = ((circle.x + radius) / TILE_SIZE).floor() as i32;
    let min_y = ((-circle.y - radius) / TILE_SIZE).floor() as i32;
    let max_y = ((-circle.y + radius) / TILE_SIZE).floor() as i32;

    for y in min_y.max(0)..=max_y.min(map.height() - 1) {
        for x in min_x.max(0)..=max_x.min(map.width() - 1) {
            let Some(tile) = map.tile(x, y) else {
                continue;
            };
            if tile.passable {
                continue;
            }
            let rect = Rect::new(
                f64::from(x) * TILE_SIZE,
                -(f64::from(y) * TILE_SIZE + TILE_SIZE),
                TILE_SIZE,
                TILE_SIZE,
            );
            if circle_to_rectangle(circle, radius, &rect) {
                return true;
            }
        }
    }
    false
}

/// Leading circle against a body made of two circles along `facing`
fn body_collision(projectile: &ActiveProjectile, center: Point, facing: f64, radius: f64) -> bool {
    let bullet_radius = projectile.weapon.projectile.collision_radius;
    let leading = projectile.leading_point();
    let front = center.offset(facing, radius);
    let back = center.offset(facing, -radius);

    circle_collision(leading, bullet_radius, front, radius)
        || circle_collision(leading, bullet_radius, back, radius)
}

/// Borrowed pieces of the manager needed while resolving one tick
struct Resolver<'r, 'a> {
    ctx: &'r CombatContext<'a>,
    data: &'r GameData,
    damageables: &'r BTreeMap<i32, Arc<dyn Damageable>>,
    environment: &'r mut EnvironmentManager,
    rng: &'r mut ChaCha8Rng,
    events: &'r mut Vec<CombatEvent>,
}

impl Resolver<'_, '_> {
    /// Move the projectile for this tick. False means it is finished.
    fn advance(&mut self, projectile: &mut ActiveProjectile, delta: f64) -> bool {
        let weapon = projectile.weapon.clone();
        let data = &weapon.projectile;

        if data.is_instantaneous {
            self.resolve_instant(projectile);
            return false;
        }

        if weapon.is_arc() {
            let t = projectile.alive_ms as f64 / 1000.0;
            let tip = projectile.tip;
            let v = projectile.velocity_component;
            let x = projectile.origin.x + tip.x + v.x * t;
            let y = projectile.origin.y + tip.y + v.y * t;
            let z = tip.z + v.z * t + 0.5 * GRAVITY * t * t;
            projectile.position = Point::new(x, y);

            if z <= 0.0 {
                self.splash(projectile);
                self.spawn_environment(projectile, |env| env.spawn_on_wall_hit);
                return false;
            }

            let tile_x = round_half_up(x / TILE_SIZE);
            let tile_y = round_half_up(-y / TILE_SIZE);
            if let Some(tile) = self.ctx.map.tile(tile_x, tile_y) {
                if tile.height > 0 && z <= f64::from(tile.height) * TILE_SIZE {
                    // Only the bottom of a wall takes the blast
                    if z < TILE_SIZE {
                        self.splash(projectile);
                    }
                    return false;
                }
            }
            return true;
        }

        if data.initial_velocity != data.terminal_velocity
            && (data.terminal_velocity - projectile.velocity).abs() > 0.001
        {
            projectile.velocity += data.acceleration * delta;
            if projectile.velocity > data.terminal_velocity {
                projectile.velocity = data.terminal_velocity;
            }
        }
        projectile.position = projectile
            .position
            .offset(projectile.angle, projectile.velocity * delta);
        true
    }

    fn expire(&mut self, projectile: &ActiveProjectile) {
        self.spawn_environment(projectile, |env| env.spawn_on_expiration);
    }

    /// Trace the ray through the tile grid and hit the closest target on it
    fn resolve_instant(&mut self, projectile: &mut ActiveProjectile) {
        let range = f64::from(projectile.weapon.projectile.range);
        let angle = projectile.angle;
        let start = projectile.position;
        let mut end = start.offset(angle, range);

        let map = self.ctx.map;
        let (dx, dy) = (angle.cos() * RAY_STEP, angle.sin() * RAY_STEP);
        let mut point = start;
        let mut travelled = 0.0;
        let mut last_tile = (-1, -1);

        while travelled + RAY_STEP <= range {
            point.x += dx;
            point.y += dy;
            travelled += RAY_STEP;

            let tile_x = (point.x / TILE_SIZE).floor() as i32;
            let tile_y = (-point.y / TILE_SIZE).floor() as i32;
            if (tile_x, tile_y) == last_tile {
                continue;
            }
            last_tile = (tile_x, tile_y);

            match map.tile(tile_x, tile_y) {
                None => {
                    end = point;
                    break;
                }
                Some(tile) if !tile.passable => {
                    end = Point::new(point.x + dx, point.y + dy);
                    break;
                }
                Some(_) => {}
            }
        }
        projectile.target = end;

        let mut closest = f64::MAX;
        let mut hit_tank: Option<Arc<Tank>> = None;
        let mut hit_object: Option<Arc<dyn Damageable>> = None;

        for tank in self.ctx.tanks.all() {
            if projectile.team.is_allied_with(tank.team())
                || !tank.alive()
                || tank.id() == projectile.owner
            {
                continue;
            }
            let position = tank.position();
            if line_circle_collision(position, INSTANT_TANK_RADIUS, start, end) {
                let distance = start.distance(&position);
                if distance < closest {
                    closest = distance;
                    hit_tank = Some(tank);
                }
            }
        }

        for object in self.damageables.values() {
            if !object.is_alive() || projectile.team.is_allied_with(object.team()) {
                continue;
            }
            let position = object.position();
            if line_circle_collision(position, object.radius(), start, end) {
                let distance = start.distance(&position);
                if distance < closest {
                    closest = distance;
                    hit_object = Some(object.clone());
                }
            }
        }

        if let Some(object) = hit_object {
            // Objects do not report beam hits themselves
            self.events.push(CombatEvent::ProjectileCreated {
                owner: projectile.owner,
                projectile_id: projectile.id,
                projectile_type_id: projectile.weapon.projectile.id,
                target: object.position(),
            });
            self.hit_object(projectile, object.as_ref());
        } else if let Some(tank) = hit_tank {
            self.hit_tank(projectile, &tank);
        } else {
            self.events.push(CombatEvent::ProjectileCreated {
                owner: projectile.owner,
                projectile_id: projectile.id,
                projectile_type_id: projectile.weapon.projectile.id,
                target: end,
            });
        }
    }

    /// Check nearby tanks first, then registered objects
    fn collision_check(&mut self, projectile: &mut ActiveProjectile) -> bool {
        let ctx = self.ctx;
        let nearby = ctx.nodes.relevant_players(projectile.node_id);
        for tank in nearby.into_iter().filter_map(|id| ctx.tanks.find(id)) {
            if !tank.alive()
                || tank.id() == projectile.owner
                || projectile.team.is_allied_with(tank.team())
            {
                continue;
            }
            if body_collision(projectile, tank.position(), tank.angle(), TANK_SPHERE_RADIUS) {
                self.hit_tank(projectile, &tank);
                self.spawn_environment(projectile, |env| env.spawn_on_player_hit);
                return true;
            }
        }

        let damageables = self.damageables;
        for object in damageables.values() {
            if !object.is_alive() || projectile.team.is_allied_with(object.team()) {
                continue;
            }
            if body_collision(projectile, object.position(), 0.0, object.radius()) {
                self.hit_object(projectile, object.as_ref());
                self.spawn_environment(projectile, |env| env.spawn_on_wall_hit);
                return true;
            }
        }
        false
    }

    fn hit_tank(&mut self, projectile: &ActiveProjectile, victim: &Tank) {
        if projectile.weapon.projectile.aoe_radius > 0.0 {
            self.splash(projectile);
            return;
        }

        let damage = round_half_up(projectile.damage / victim.armor_factor());
        let outcome = victim.inflict_damage(damage, &projectile.source(), self.ctx.now);
        if outcome.kill.is_some() {
            debug!(killer = projectile.owner, victim = victim.id(), damage, "Killing blow");
        }
        player_damage_events(self.events, victim.id(), projectile.source(), outcome);
    }

    fn hit_object(&mut self, projectile: &mut ActiveProjectile, object: &dyn Damageable) {
        if projectile.weapon.projectile.aoe_radius > 0.0 {
            projectile.position = object.position();
            self.splash(projectile);
            return;
        }

        let damage = round_half_up(projectile.damage / object.armor_factor());
        let outcome = object.inflict_damage(damage, &projectile.source(), self.ctx.now);
        if outcome.destroyed {
            debug!(owner = projectile.owner, object_id = object.object_id(), damage, "Object destroyed");
        }
        object_damage_events(
            self.events,
            object.object_id(),
            object.team(),
            projectile.source(),
            outcome,
        );
    }

    /// Area damage around the projectile's position
    fn splash(&mut self, projectile: &ActiveProjectile) {
        let data = &projectile.weapon.projectile;
        let center = projectile.position;
        let source = projectile.source();
        let node = self.ctx.nodes.node_at(center);

        for tank in self
            .ctx
            .nodes
            .relevant_players(node)
            .into_iter()
            .filter_map(|id| self.ctx.tanks.find(id))
        {
            if !tank.alive()
                || projectile.team.is_allied_with(tank.team())
                || tank.id() == projectile.owner
            {
                continue;
            }
            let position = tank.position();
            if !circle_collision(center, data.aoe_radius, position, TANK_SPHERE_RADIUS) {
                continue;
            }

            let raw = if position == center {
                projectile.damage
            } else {
                aoe_damage(
                    projectile.damage,
                    data.aoe_decay,
                    data.aoe_radius,
                    center.distance(&position),
                )
            };
            let damage = round_half_up(raw / tank.armor_factor());
            // The decayed edge of the blast does not count as a hit
            if damage <= 0 {
                continue;
            }
            let outcome = tank.inflict_damage(damage, &source, self.ctx.now);
            player_damage_events(self.events, tank.id(), source, outcome);
        }

        for object in self.damageables.values() {
            if !object.is_alive() || projectile.team.is_allied_with(object.team()) {
                continue;
            }
            let position = object.position();
            if !circle_collision(center, data.aoe_radius, position, object.radius()) {
                continue;
            }

            let raw = aoe_damage(
                projectile.damage,
                data.aoe_decay,
                data.aoe_radius,
                center.distance(&position),
            );
            let damage = round_half_up(raw / object.armor_factor());
            if damage <= 0 {
                continue;
            }
            let outcome = object.inflict_damage(damage, &source, self.ctx.now);
            object_damage_events(self.events, object.object_id(), object.team(), source, outcome);
        }
    }

    /// Leave the projectile's environment effect behind when `trigger` allows it
    fn spawn_environment(
        &mut self,
        projectile: &ActiveProjectile,
        trigger: impl Fn(&super::data::EnvironmentProperty) -> bool,
    ) {
        let Some(env_id) = projectile.weapon.projectile.environment_property else {
            return;
        };
        let property = match self.data.environment(env_id) {
            Ok(property) => property,
            Err(e) => {
                tracing::error!(error = %e, "Projectile references missing environment");
                return;
            }
        };
        if !trigger(&property) {
            return;
        }

        if let Some(effect_id) = self.environment.spawn(
            property.clone(),
            projectile.team,
            projectile.position,
            projectile.owner,
            self.ctx.now,
        ) {
            self.events.push(CombatEvent::EnvironmentSpawned {
                effect_id,
                property_id: property.id,
                owner: projectile.owner,
                position: projectile.position,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::data::{fixtures, ProjectileType};
    use crate::game::map::Tile;
    use assert_approx_eq::assert_approx_eq;

    struct Arena {
        tanks: TankManager,
        nodes: NodeManager,
        map: Map,
        data: Arc<GameData>,
    }

    impl Arena {
        fn new(projectile: ProjectileType, launch_angle: f64) -> Self {
            let map = Map::create(40, 40, "arena").unwrap();
            let nodes = NodeManager::new();
            nodes.set_map(&map);

            let mut data = GameData::default();
            data.insert_environment(fixtures::environment(1));
            data.insert_weapon(Weapon {
                launch_angle,
                ..fixtures::weapon(1, projectile)
            });

            Self {
                tanks: TankManager::new(),
                nodes,
                map,
                data: Arc::new(data),
            }
        }

        fn spawn(&self, id: TankId, position: Point, armor: f64) -> Arc<Tank> {
            let weapon = self.data.weapon(1).unwrap();
            let tank = Arc::new(Tank::new(id, format!("t{id}"), weapon, 1.0, armor, Alliance::None, 0));
            tank.set_position(position);
            self.nodes.process_position(&tank);
            self.tanks.add(tank.clone());
            tank
        }

        fn ctx(&self, now: u64) -> CombatContext<'_> {
            CombatContext {
                tanks: &self.tanks,
                nodes: &self.nodes,
                map: &self.map,
                now,
            }
        }

        fn manager(&self) -> ProjectileManager {
            ProjectileManager::with_seed(self.data.clone(), 11)
        }
    }

    fn damage_to(events: &[CombatEvent], victim: TankId) -> Option<i32> {
        events.iter().find_map(|event| match event {
            CombatEvent::PlayerDamaged { victim: v, damage, .. } if *v == victim => Some(*damage),
            _ => None,
        })
    }

    #[test]
    fn ids_reuse_the_smallest_free_slot() {
        let arena = Arena::new(fixtures::projectile(1), 0.0);
        let shooter = arena.spawn(0, Point::new(100.0, -100.0), 1.0);
        let manager = arena.manager();

        let target = Point::new(500.0, -100.0);
        let a = manager.add(&shooter, 0.0, shooter.position(), target, 0);
        let b = manager.add(&shooter, 0.0, shooter.position(), target, 0);
        assert_eq!((a.id, b.id), (Some(0), Some(1)));

        assert!(manager.remove(0));
        let c = manager.add(&shooter, 0.0, shooter.position(), target, 0);
        assert_eq!(c.id, Some(0));
        assert_eq!(c.target, target);
    }

    #[test]
    fn direct_hit_is_scaled_by_armor() {
        let arena = Arena::new(fixtures::projectile(1), 0.0);
        let shooter = arena.spawn(0, Point::new(100.0, -100.0), 1.0);
        let victim = arena.spawn(1, Point::new(200.0, -100.0), 2.0);
        let manager = arena.manager();

        manager.add(&shooter, 0.0, Point::new(150.0, -100.0), victim.position(), 0);
        let events = manager.process(&arena.ctx(5), 0.005);

        assert_eq!(damage_to(&events, 1), Some(5));
        assert_eq!(victim.health(), 195);
        assert!(manager.is_empty());
    }

    #[test]
    fn straight_projectiles_travel_and_expire() {
        let projectile = ProjectileType {
            range: 100,
            initial_velocity: 100.0,
            terminal_velocity: 100.0,
            ..fixtures::projectile(1)
        };
        let arena = Arena::new(projectile, 0.0);
        let shooter = arena.spawn(0, Point::new(100.0, -100.0), 1.0);
        let manager = arena.manager();

        let fired = manager.add(&shooter, 0.0, Point::new(150.0, -100.0), Point::new(250.0, -100.0), 0);
        let id = fired.id.unwrap();

        manager.process(&arena.ctx(500), 0.5);
        let flying = manager.get(id).unwrap();
        assert_approx_eq!(flying.position.x, 200.0);
        assert_eq!(flying.alive_ms, 500);

        manager.process(&arena.ctx(1000), 0.5);
        assert!(manager.get(id).is_none());
    }

    #[test]
    fn accelerating_projectiles_cap_at_terminal_velocity() {
        let projectile = ProjectileType {
            initial_velocity: 100.0,
            terminal_velocity: 150.0,
            acceleration: 100.0,
            ..fixtures::projectile(1)
        };
        let arena = Arena::new(projectile, 0.0);
        let shooter = arena.spawn(0, Point::new(100.0, -100.0), 1.0);
        let manager = arena.manager();

        let id = manager
            .add(&shooter, 0.0, Point::new(150.0, -100.0), Point::new(900.0, -100.0), 0)
            .id
            .unwrap();
        manager.process(&arena.ctx(1000), 1.0);
        assert_approx_eq!(manager.get(id).unwrap().velocity, 150.0);
    }

    #[test]
    fn walls_stop_projectiles() {
        let mut arena = Arena::new(fixtures::projectile(1), 0.0);
        arena
            .map
            .set_tile(4, 1, Tile { passable: false, ..Tile::default() })
            .unwrap();
        let shooter = arena.spawn(0, Point::new(100.0, -96.0), 1.0);
        let manager = arena.manager();

        manager.add(&shooter, 0.0, Point::new(250.0, -96.0), Point::new(600.0, -96.0), 0);
        manager.process(&arena.ctx(5), 0.005);
        assert!(manager.is_empty());
    }

    #[test]
    fn splash_damage_decays_with_distance() {
        let projectile = ProjectileType {
            aoe_radius: 100.0,
            aoe_decay: 0.0,
            minimum_damage: 40,
            maximum_damage: 40,
            ..fixtures::projectile(1)
        };
        let arena = Arena::new(projectile, 0.0);
        let shooter = arena.spawn(0, Point::new(100.0, -500.0), 1.0);
        let victim = arena.spawn(1, Point::new(400.0, -500.0), 1.0);
        let bystander = arena.spawn(2, Point::new(400.0, -550.0), 1.0);
        let far = arena.spawn(3, Point::new(400.0, -700.0), 1.0);
        let manager = arena.manager();

        manager.add(&shooter, 0.0, Point::new(370.0, -500.0), victim.position(), 0);
        let events = manager.process(&arena.ctx(5), 0.001);

        // The splash is centered on the projectile, 30 units short of the victim
        assert_eq!(damage_to(&events, 1), Some(28));
        assert!(bystander.health() < 200);
        assert_eq!(far.health(), 200);
        assert_eq!(damage_to(&events, 0), None);
    }

    #[test]
    fn instant_weapons_hit_the_closest_tank() {
        let projectile = ProjectileType {
            is_instantaneous: true,
            range: 800,
            ..fixtures::projectile(1)
        };
        let arena = Arena::new(projectile, 0.0);
        let shooter = arena.spawn(0, Point::new(100.0, -300.0), 1.0);
        let near = arena.spawn(1, Point::new(400.0, -300.0), 1.0);
        let behind = arena.spawn(2, Point::new(600.0, -300.0), 1.0);
        let manager = arena.manager();

        let fired = manager.add(&shooter, 0.0, Point::new(150.0, -300.0), Point::new(900.0, -300.0), 0);
        assert_eq!(fired.id, None);

        let events = manager.process(&arena.ctx(5), 0.005);
        assert_eq!(near.health(), 190);
        assert_eq!(behind.health(), 200);
        assert!(damage_to(&events, 1).is_some());
        assert!(manager.is_empty());
    }

    #[test]
    fn instant_misses_report_the_endpoint() {
        let projectile = ProjectileType {
            is_instantaneous: true,
            range: 120,
            ..fixtures::projectile(1)
        };
        let arena = Arena::new(projectile, 0.0);
        let shooter = arena.spawn(0, Point::new(100.0, -300.0), 1.0);
        let manager = arena.manager();

        manager.add(&shooter, 0.0, Point::new(150.0, -300.0), Point::new(900.0, -300.0), 0);
        let events = manager.process(&arena.ctx(5), 0.005);

        match &events[..] {
            [CombatEvent::ProjectileCreated { target, owner: 0, .. }] => {
                assert_approx_eq!(target.x, 270.0);
            }
            other => panic!("unexpected events {other:?}"),
        }
    }

    #[test]
    fn arc_projectiles_land_and_leave_fire() {
        let projectile = ProjectileType {
            aoe_radius: 60.0,
            range: 600,
            environment_property: Some(1),
            ..fixtures::projectile(1)
        };
        let arena = Arena::new(projectile, 45f64.to_radians());
        let shooter = arena.spawn(0, Point::new(100.0, -300.0), 1.0);
        let manager = arena.manager();

        let fired = manager.add(&shooter, 0.0, Point::new(150.0, -300.0), Point::new(450.0, -300.0), 0);
        let id = fired.id.unwrap();
        let arc = manager.get(id).unwrap();
        assert!(arc.velocity_component.z > 0.0);
        assert_approx_eq!(arc.tip.x, -60.0 * 45f64.to_radians().cos());

        let mut events = Vec::new();
        for tick in 1..=400 {
            events.extend(manager.process(&arena.ctx(tick * 10), 0.01));
            if manager.get(id).is_none() {
                break;
            }
        }

        assert!(manager.get(id).is_none());
        assert!(events
            .iter()
            .any(|e| matches!(e, CombatEvent::EnvironmentSpawned { property_id: 1, .. })));
        assert_eq!(manager.environment_count(), 1);
    }

    #[test]
    fn projectiles_of_departed_players_do_no_damage() {
        let arena = Arena::new(fixtures::projectile(1), 0.0);
        let shooter = arena.spawn(0, Point::new(100.0, -100.0), 1.0);
        let victim = arena.spawn(1, Point::new(200.0, -100.0), 1.0);
        let manager = arena.manager();

        manager.add(&shooter, 0.0, Point::new(150.0, -100.0), victim.position(), 0);
        arena.nodes.unregister(&shooter);
        arena.tanks.remove(shooter.id());

        let events = manager.process(&arena.ctx(5), 0.005);
        assert_eq!(damage_to(&events, 1), None);
        assert_eq!(victim.health(), 200);
        assert!(victim.alive());
        assert!(manager.is_empty());
    }

    #[test]
    fn overkill_leaves_health_at_zero() {
        let projectile = ProjectileType {
            minimum_damage: 500,
            maximum_damage: 500,
            ..fixtures::projectile(1)
        };
        let arena = Arena::new(projectile, 0.0);
        let shooter = arena.spawn(0, Point::new(100.0, -100.0), 1.0);
        let victim = arena.spawn(1, Point::new(200.0, -100.0), 1.0);
        let manager = arena.manager();

        manager.add(&shooter, 0.0, Point::new(150.0, -100.0), victim.position(), 0);
        let events = manager.process(&arena.ctx(5), 0.005);

        assert_eq!(damage_to(&events, 1), Some(500));
        assert_eq!(victim.health(), 0);
        assert!(!victim.alive());
    }

    #[test]
    fn reset_clears_everything() {
        let arena = Arena::new(fixtures::projectile(1), 0.0);
        let shooter = arena.spawn(0, Point::new(100.0, -100.0), 1.0);
        let manager = arena.manager();
        manager.add(&shooter, 0.0, shooter.position(), Point::new(400.0, -100.0), 0);
        manager.add_damageable(shooter.clone());

        manager.reset();
        assert!(manager.is_empty());
        assert!(manager.damageable_ids().is_empty());
    }
}
