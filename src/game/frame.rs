//! The fixed-interval simulation frame
//!
//! One frame: advance the round clock, resolve projectiles, update the
//! objective handler, integrate tank movement, spawn and collect utilities,
//! and rotate to a new round once the clock runs out.

use std::panic::AssertUnwindSafe;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::combat::CombatEvent;
use super::handler::GameHandler;
use super::projectile::CombatContext;
use super::{GameWorld, Tank};
use crate::report::RoundReport;
use crate::util::time::unix_millis;
use crate::ws::protocol::ServerMsg;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Continue,
    /// The transport shut down; no one is left to notify
    Stop,
}

/// Drive `run_frame` every `FRAME_INTERVAL_MS` until the transport closes
pub fn spawn_frame_loop(world: GameWorld) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = Duration::from_millis(world.config.frame_interval_ms.max(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(interval_ms = period.as_millis() as u64, "Frame loop started");
        loop {
            interval.tick().await;

            let frame = AssertUnwindSafe(async { run_frame(&world, unix_millis()) });
            match frame.catch_unwind().await {
                Ok(FrameOutcome::Continue) => {}
                Ok(FrameOutcome::Stop) => break,
                Err(_) => error!("Frame panicked, continuing with the next frame"),
            }
        }
        info!("Frame loop stopped");
    })
}

pub fn run_frame(world: &GameWorld, now: u64) -> FrameOutcome {
    if world.notifier.is_closed() {
        return FrameOutcome::Stop;
    }

    let delta = {
        let mut timer = world.timer.lock();
        timer.advance(now);
        timer.delta()
    };

    process_projectiles(world, now, delta);

    update_handler(world, now);

    let tanks = world.tanks.all();
    for tank in &tanks {
        process_tank(world, tank, now, delta);
    }

    if let Some(spawned) = world.utilities.try_spawn(now) {
        debug!(utility_id = spawned.id, model = %spawned.utility.model, "Utility spawned");
        world
            .notifier
            .broadcast(ServerMsg::utility_spawned(&spawned));
    }

    for pickup in world.utilities.check_pickups(&tanks, now) {
        world.notifier.broadcast(ServerMsg::UtilityApplied {
            tank_id: pickup.tank,
            utility_id: pickup.utility.id,
            utility: pickup.utility.utility,
        });
    }

    if world.timer.lock().expired() {
        reset_round(world, now);
    }

    FrameOutcome::Continue
}

fn process_projectiles(world: &GameWorld, now: u64, delta: f64) {
    let map = match world.maps.map() {
        Ok(map) => map,
        Err(e) => {
            warn!(error = %e, "Skipping projectiles without a map");
            return;
        }
    };

    let ctx = CombatContext {
        tanks: &world.tanks,
        nodes: &world.nodes,
        map: &map,
        now,
    };
    for event in world.projectiles.process(&ctx, delta) {
        if let CombatEvent::Killed(kill) = &event {
            debug!(victim = kill.victim, killer = kill.killer, "Tank destroyed");
            world.points.add_kill(kill.killer);
            world.points.add_death(kill.victim);
            for &assist in &kill.assists {
                world.points.add_assist(assist);
            }
        }
        if let Some(msg) = ServerMsg::from_combat(&event) {
            world.notifier.broadcast(msg);
        }
    }
}

fn update_handler(world: &GameWorld, now: u64) {
    let tanks = world.tanks.all();
    let mut handler = world.handler.lock();

    for event in handler.update(&tanks, &world.projectiles, now) {
        if let Some(capturer) = event.objective_capturer() {
            world.points.add_objective_captured(capturer);
        }
        world.notifier.broadcast(event.into());
    }

    if handler.round_over() {
        info!("Objective decided the round");
        world.timer.lock().force_to_zero();
    }
}

fn process_tank(world: &GameWorld, tank: &Tank, now: u64, delta: f64) {
    if tank.alive() {
        tank.check_utility(now);
        if tank.advance(delta) {
            world.nodes.process_position(tank);
        }
        return;
    }

    if now < tank.respawn_time() {
        return;
    }

    let Some(position) = world.spawn_tank(tank) else {
        warn!(tank_id = tank.id(), "No spawn point available for respawn");
        return;
    };
    world.nodes.process_position(tank);
    tank.respawn();
    debug!(tank_id = tank.id(), x = position.x, y = position.y, "Tank respawned");
    world.notifier.broadcast(ServerMsg::PlayerRespawned {
        id: tank.id(),
        position,
    });
}

/// End the round and set up the next one
pub fn reset_round(world: &GameWorld, now: u64) {
    let winner = world.handler.lock().winning_team();
    let finished_map = world.maps.current_filename();
    let finished_mode = world.maps.current_mode();
    info!(map = %finished_map, winner = ?winner, "Round over");

    for tank in world.tanks.all() {
        if tank.team().is_allied_with(winner) {
            world.points.add_objective_completed(tank.id());
        }
    }
    world.notifier.broadcast(ServerMsg::RoundEnded { winner });

    world.maps.set_rotating(true);
    *world.handler.lock() = GameHandler::Deathmatch;

    if let Err(e) = world.maps.rotate() {
        error!(error = %e, "Map rotation failed, replaying the current map");
    }
    let map = match world.maps.map() {
        Ok(map) => map,
        Err(e) => {
            error!(error = %e, "No map after rotation");
            world.timer.lock().reset(now);
            world.maps.set_rotating(false);
            return;
        }
    };
    let mode = world.maps.current_mode();

    world.nodes.set_map(&map);
    world.utilities.update_map(&map);
    world.utilities.clear();
    world.projectiles.reset();

    world
        .tanks
        .organize_teams(mode, &mut *world.rng.lock());
    *world.handler.lock() = GameHandler::create(mode, &map, &world.projectiles);

    let statistics = world.points.compile_and_calculate();
    if let Some(reporter) = &world.reporter {
        if !statistics.is_empty() {
            reporter.spawn_send(RoundReport {
                map: finished_map,
                mode: finished_mode,
                winner,
                finished_at: Utc::now(),
                statistics,
            });
        }
    }
    world.points.reset();

    for tank in world.tanks.all() {
        tank.reset_for_round();
        tank.set_last_sync(now);
        world.clock.start(tank.clone(), world.notifier.clone());
        // Node ids from the previous map are meaningless on the new grid
        tank.set_node_id(-1);
        world.spawn_tank(&tank);
        world.nodes.process_position(&tank);
        world.points.add_player(tank.id(), tank.name());
    }

    world.timer.lock().reset(now);
    world.maps.set_rotating(false);

    let filename = world.maps.current_filename();
    info!(map = %filename, mode = %mode, "New round started");
    world
        .notifier
        .broadcast(ServerMsg::MapRotated { map: filename, mode });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::data::UtilityType;
    use crate::game::world::fixtures::{add_tank, connect, drain, world};
    use crate::game::{Alliance, Direction, Point};
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn closed_transport_stops_the_loop() {
        let (world, _gone) = world();
        world.notifier.close();
        assert_eq!(run_frame(&world, 1_000), FrameOutcome::Stop);
    }

    #[test]
    fn alive_tanks_drive_forward() {
        let (world, _gone) = world();
        let tank = add_tank(&world, 0, Point::new(200.0, -200.0));
        tank.set_move_direction(Direction::Forward);

        assert_eq!(run_frame(&world, 1_000), FrameOutcome::Continue);

        assert_approx_eq!(tank.position().x, 475.0);
        assert_approx_eq!(world.time_left(), 273.0);
    }

    #[test]
    fn dead_tanks_respawn_after_delay() {
        let (world, _gone) = world();
        let tank = add_tank(&world, 0, Point::new(200.0, -200.0));
        let mut rx = connect(&world, 0);
        tank.set_health(0);
        tank.set_alive(false, 0);

        run_frame(&world, 1_000);
        assert!(!tank.alive());

        run_frame(&world, 5_000);
        assert!(tank.alive());
        assert!(drain(&mut rx)
            .iter()
            .any(|m| matches!(m, ServerMsg::PlayerRespawned { id: 0, .. })));
        assert!([Point::tile_center(1, 1), Point::tile_center(8, 8)].contains(&tank.position()));
    }

    #[test]
    fn utilities_spawn_and_get_picked_up() {
        let (world, _gone) = world();
        world.utilities.set_types(vec![UtilityType {
            id: 4,
            model: "speed".into(),
            duration: 10.0,
            damage_factor: 0.0,
            speed_factor: 0.5,
            rate_factor: 0.0,
            health_increase: 0,
            health_factor: 0.0,
        }]);
        let tank = add_tank(&world, 0, Point::tile_center(5, 5));
        let mut rx = connect(&world, 0);

        run_frame(&world, 30_000);

        let messages = drain(&mut rx);
        assert!(messages
            .iter()
            .any(|m| matches!(m, ServerMsg::UtilitySpawned { utility_id: 0, .. })));
        assert!(messages
            .iter()
            .any(|m| matches!(m, ServerMsg::UtilityApplied { tank_id: 0, .. })));
        assert_eq!(tank.applied_utilities().len(), 1);
        assert!(world.utilities.active().is_empty());
    }

    #[test]
    fn utilities_spawn_after_tanks_are_processed() {
        let (world, _gone) = world();
        world.utilities.set_types(vec![UtilityType {
            id: 2,
            model: "armor".into(),
            duration: 5.0,
            damage_factor: 0.0,
            speed_factor: 0.0,
            rate_factor: 0.0,
            health_increase: 0,
            health_factor: 0.0,
        }]);
        let tank = add_tank(&world, 0, Point::new(200.0, -200.0));
        let mut rx = connect(&world, 0);
        tank.set_health(0);
        tank.set_alive(false, 0);

        run_frame(&world, 30_000);

        let messages = drain(&mut rx);
        let respawned = messages
            .iter()
            .position(|m| matches!(m, ServerMsg::PlayerRespawned { id: 0, .. }));
        let spawned = messages
            .iter()
            .position(|m| matches!(m, ServerMsg::UtilitySpawned { .. }));
        assert!(respawned.is_some() && spawned.is_some());
        assert!(respawned < spawned);
    }

    #[tokio::test]
    async fn expired_round_rotates_and_resets() {
        let (world, _gone) = world();
        let tank = add_tank(&world, 0, Point::new(200.0, -200.0));
        let mut rx = connect(&world, 0);
        tank.set_health(20);
        tank.set_ready(true);
        world.points.add_kill(0);

        world.timer.lock().force_to_zero();
        run_frame(&world, 1_000);

        assert!(!world.maps.is_rotating());
        assert_approx_eq!(world.time_left(), 274.0);
        assert_eq!(tank.health(), crate::game::DEFAULT_MAX_HEALTH);
        assert!(!tank.is_ready());
        assert!(tank.node_id() >= 0);
        assert_eq!(world.points.get(0).map(|s| s.kills), Some(0));
        assert_eq!(tank.team(), Alliance::None);

        let messages = drain(&mut rx);
        assert!(messages
            .iter()
            .any(|m| matches!(m, ServerMsg::RoundEnded { winner: Alliance::None })));
        assert!(matches!(
            messages.last(),
            Some(ServerMsg::MapRotated { map, .. }) if map == "test.vtmap"
        ));
        world.clock.stop(0);
    }
}
