//! Player command processing
//!
//! Inbound client messages become `PlayerCommand`s and run as independent
//! tasks, bounded by a semaphore sized from `GAME_THREADS`. Each task looks
//! its tank up again, so a player removed in the meantime is simply skipped.

use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::players::{ready, remove_player};
use super::{
    advance_position, Direction, GameError, GameWorld, Point, Tank, TankId, MAX_LEGAL_DISTANCE,
    PROJECTILE_SPAWN_OFFSET,
};
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, ProjectileInfo, ServerMsg};

#[derive(Debug)]
pub struct PlayerCommand {
    pub tank_id: TankId,
    pub msg: ClientMsg,
    pub received_at: u64,
}

impl PlayerCommand {
    pub fn new(tank_id: TankId, msg: ClientMsg) -> Self {
        Self {
            tank_id,
            msg,
            received_at: unix_millis(),
        }
    }
}

/// Run commands from `rx` until every sender is gone
pub fn spawn_dispatcher(world: GameWorld, mut rx: mpsc::Receiver<PlayerCommand>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let permits = Arc::new(Semaphore::new(world.config.game_threads.max(1)));

        while let Some(cmd) = rx.recv().await {
            let Ok(permit) = permits.clone().acquire_owned().await else {
                break;
            };
            let world = world.clone();
            tokio::spawn(async move {
                let tank_id = cmd.tank_id;
                if let Err(e) = handle(&world, cmd).await {
                    match e {
                        GameError::TankNotFound(_) => {
                            debug!(tank_id, "Command for a tank that already left")
                        }
                        e => {
                            warn!(tank_id, error = %e, "Command rejected");
                            world
                                .notifier
                                .send(tank_id, ServerMsg::error(error_code(&e), e.to_string()));
                        }
                    }
                }
                drop(permit);
            });
        }
        debug!("Command dispatcher stopped");
    })
}

fn error_code(error: &GameError) -> &'static str {
    match error {
        GameError::BadInformation(_) => "bad_information",
        GameError::PermissionDenied => "permission_denied",
        GameError::ServerFull => "server_full",
        GameError::TankNotFound(_) => "tank_not_found",
        _ => "internal",
    }
}

pub async fn handle(world: &GameWorld, cmd: PlayerCommand) -> Result<(), GameError> {
    let tank = world.tanks.get(cmd.tank_id)?;
    let now = cmd.received_at;
    tank.touch(now);

    match cmd.msg {
        ClientMsg::KeepAlive => Ok(()),
        ClientMsg::Ready => {
            ready(world, &tank).await;
            Ok(())
        }
        ClientMsg::Move {
            timestamp,
            position,
            direction,
        } => {
            world.wait_while_rotating().await;
            move_tank(world, &tank, timestamp, position, direction, now)
        }
        ClientMsg::Rotate {
            timestamp: _,
            angle,
            direction,
        } => {
            world.wait_while_rotating().await;
            rotate_tank(world, &tank, angle, direction)
        }
        ClientMsg::Fire { timestamp: _, target } => {
            world.wait_while_rotating().await;
            fire(world, &tank, target, now);
            Ok(())
        }
        ClientMsg::StartCharging => {
            world.wait_while_rotating().await;
            if tank.weapon().can_charge() {
                tank.start_charging(now);
            }
            Ok(())
        }
        ClientMsg::Chat { message } => {
            chat(world, &tank, message);
            Ok(())
        }
        ClientMsg::ClockSyncReply { seq, client_time } => {
            world.clock.reply(tank.id(), seq, client_time);
            Ok(())
        }
        ClientMsg::GetScoreboard => {
            let (red_score, blue_score) = world.scores();
            world.notifier.send(
                tank.id(),
                ServerMsg::Scoreboard {
                    statistics: world.points.compile(Some(&world.tanks)),
                    red_score,
                    blue_score,
                },
            );
            Ok(())
        }
        ClientMsg::GetPlayerList => {
            let players = world.tanks.all().iter().map(|t| t.info()).collect();
            world
                .notifier
                .send(tank.id(), ServerMsg::PlayerList { players });
            Ok(())
        }
        ClientMsg::Leave => {
            remove_player(world, tank.id());
            Ok(())
        }
    }
}

/// Accept the client's position if it is plausible from where the server
/// last had the tank
fn move_tank(
    world: &GameWorld,
    tank: &Tank,
    timestamp: i64,
    reported: Point,
    direction: Direction,
    now: u64,
) -> Result<(), GameError> {
    if matches!(direction, Direction::Left | Direction::Right) {
        return Err(GameError::BadInformation("move direction must be forward, reverse or none"));
    }
    if !tank.alive() {
        return Ok(());
    }

    tank.set_move_direction(direction);

    let sent_at = tank.transform_time(timestamp);
    let delta = ((now as i64 - sent_at) as f64 / 1000.0).max(0.0);
    let mut position = reported;
    let mut angle = tank.angle();
    advance_position(&mut position, &mut angle, direction, tank.velocity(), delta);

    let server_position = tank.position();
    if position.distance(&server_position) > MAX_LEGAL_DISTANCE {
        info!(
            tank_id = tank.id(),
            x = position.x,
            y = position.y,
            "Illegal move, resetting position"
        );
        world.notifier.send(
            tank.id(),
            ServerMsg::ResetPosition {
                position: server_position,
            },
        );
        return Ok(());
    }

    tank.set_position(position);
    world.nodes.process_position(tank);
    world.notifier.broadcast_except(
        tank.id(),
        ServerMsg::PlayerMoved {
            id: tank.id(),
            position,
            direction,
        },
    );
    Ok(())
}

fn rotate_tank(
    world: &GameWorld,
    tank: &Tank,
    angle: f64,
    direction: Direction,
) -> Result<(), GameError> {
    if matches!(direction, Direction::Forward | Direction::Reverse) {
        return Err(GameError::BadInformation("rotate direction must be left, right or none"));
    }

    tank.set_rotate_direction(direction);

    let delta = world.timer.lock().delta();
    let mut angle = angle;
    let mut unused = Point::default();
    advance_position(&mut unused, &mut angle, direction, tank.angular_velocity(), delta);
    tank.set_angle(angle);

    world.notifier.broadcast_except(
        tank.id(),
        ServerMsg::PlayerRotated {
            id: tank.id(),
            angle,
            direction,
        },
    );
    Ok(())
}

fn fire(world: &GameWorld, tank: &Tank, target: Point, now: u64) {
    if !tank.alive() {
        return;
    }

    let position = tank.position();
    let angle = (target.y - position.y).atan2(target.x - position.x);
    let origin = position.offset(angle, PROJECTILE_SPAWN_OFFSET);

    let weapon = tank.weapon().clone();
    let count = weapon.projectiles_per_shot.max(1);
    let interval_ms = weapon.interval_between_projectile_seconds * 1000.0;

    let mut created = Vec::new();
    for i in 0..count {
        let fired = world.projectiles.add(tank, angle, origin, target, now);
        // Instant hits are announced when they resolve
        if let Some(projectile_id) = fired.id {
            created.push(ProjectileInfo {
                owner: tank.id(),
                projectile_id,
                projectile_type_id: weapon.projectile.id,
                target: fired.target,
                spawn_time_ms: (interval_ms * f64::from(i)) as i64,
            });
        }
    }

    match created.len() {
        0 => {}
        1 if count == 1 => {
            if let Some(projectile) = created.pop() {
                world
                    .notifier
                    .broadcast(ServerMsg::ProjectileCreated { projectile });
            }
        }
        _ => world
            .notifier
            .broadcast(ServerMsg::ProjectilesCreated { projectiles: created }),
    }
}

fn chat(world: &GameWorld, tank: &Tank, message: String) {
    let reply = |text: String| {
        world
            .notifier
            .send(tank.id(), ServerMsg::Chat { message: text });
    };

    match message.trim() {
        "/nodes" => {
            for (node, ids) in world.nodes.registrations() {
                reply(format!("node {node}: {ids:?}"));
            }
        }
        "/positions" | "/pos" => {
            for other in world.tanks.all() {
                let position = other.position();
                reply(format!(
                    "{} ({}): {:.1}, {:.1} node {}",
                    other.name(),
                    other.id(),
                    position.x,
                    position.y,
                    other.node_id()
                ));
            }
        }
        "/rotate" | "/forcerotate" => {
            info!(tank_id = tank.id(), name = tank.name(), "Map rotation forced from chat");
            world.timer.lock().force_to_zero();
        }
        _ => {
            let message = format!("{}: {}", tank.name(), message);
            world.notifier.broadcast(ServerMsg::Chat { message });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::data::fixtures as data_fixtures;
    use crate::game::world::fixtures::{add_tank, connect, drain, world};
    use assert_approx_eq::assert_approx_eq;
    use tokio_test::{assert_err, assert_ok};

    fn command(tank_id: TankId, msg: ClientMsg) -> PlayerCommand {
        PlayerCommand {
            tank_id,
            msg,
            received_at: 10_000,
        }
    }

    #[tokio::test]
    async fn unknown_tank_is_not_found() {
        let (world, _gone) = world();
        let error = assert_err!(handle(&world, command(5, ClientMsg::KeepAlive)).await);
        assert!(matches!(error, GameError::TankNotFound(5)));
    }

    #[tokio::test]
    async fn every_command_refreshes_idle_time() {
        let (world, _gone) = world();
        let tank = add_tank(&world, 0, Point::new(100.0, -100.0));
        assert_ok!(handle(&world, command(0, ClientMsg::KeepAlive)).await);
        assert_eq!(tank.last_action(), 10_000);
    }

    #[tokio::test]
    async fn move_rejects_turning_directions() {
        let (world, _gone) = world();
        add_tank(&world, 0, Point::new(100.0, -100.0));
        let result = handle(
            &world,
            command(
                0,
                ClientMsg::Move {
                    timestamp: 10_000,
                    position: Point::new(100.0, -100.0),
                    direction: Direction::Left,
                },
            ),
        )
        .await;
        assert!(matches!(result, Err(GameError::BadInformation(_))));
    }

    #[tokio::test]
    async fn move_advances_reported_position_by_latency() {
        let (world, _gone) = world();
        let tank = add_tank(&world, 0, Point::new(100.0, -100.0));
        let mut other = connect(&world, 1);
        add_tank(&world, 1, Point::new(300.0, -300.0));

        handle(
            &world,
            command(
                0,
                ClientMsg::Move {
                    timestamp: 9_800,
                    position: Point::new(100.0, -100.0),
                    direction: Direction::Forward,
                },
            ),
        )
        .await
        .unwrap();

        // 200ms at 275 units/s along angle 0
        assert_approx_eq!(tank.position().x, 155.0);
        assert_approx_eq!(tank.position().y, -100.0);
        assert_eq!(tank.move_direction(), Direction::Forward);
        assert!(drain(&mut other)
            .iter()
            .any(|m| matches!(m, ServerMsg::PlayerMoved { id: 0, .. })));
    }

    #[tokio::test]
    async fn far_moves_are_reset() {
        let (world, _gone) = world();
        let tank = add_tank(&world, 0, Point::new(100.0, -100.0));
        let mut rx = connect(&world, 0);

        handle(
            &world,
            command(
                0,
                ClientMsg::Move {
                    timestamp: 10_000,
                    position: Point::new(5000.0, -100.0),
                    direction: Direction::None,
                },
            ),
        )
        .await
        .unwrap();

        assert_eq!(tank.position(), Point::new(100.0, -100.0));
        assert!(matches!(
            rx.try_recv(),
            Ok(ServerMsg::ResetPosition { position }) if position == Point::new(100.0, -100.0)
        ));
    }

    #[tokio::test]
    async fn rotate_rejects_driving_directions() {
        let (world, _gone) = world();
        add_tank(&world, 0, Point::new(100.0, -100.0));
        let result = handle(
            &world,
            command(
                0,
                ClientMsg::Rotate {
                    timestamp: 0,
                    angle: 0.0,
                    direction: Direction::Forward,
                },
            ),
        )
        .await;
        assert!(matches!(result, Err(GameError::BadInformation(_))));
    }

    #[tokio::test]
    async fn rotate_sets_angle_and_notifies_others() {
        let (world, _gone) = world();
        let tank = add_tank(&world, 0, Point::new(100.0, -100.0));
        let mut own = connect(&world, 0);
        let mut other = connect(&world, 1);

        handle(
            &world,
            command(
                0,
                ClientMsg::Rotate {
                    timestamp: 0,
                    angle: 1.0,
                    direction: Direction::Left,
                },
            ),
        )
        .await
        .unwrap();

        // No frame has run yet, so the delta is zero
        assert_approx_eq!(tank.angle(), 1.0);
        assert_eq!(tank.rotate_direction(), Direction::Left);
        assert!(drain(&mut own).is_empty());
        assert!(matches!(
            other.try_recv(),
            Ok(ServerMsg::PlayerRotated { id: 0, .. })
        ));
    }

    #[tokio::test]
    async fn fire_broadcasts_projectile() {
        let (world, _gone) = world();
        add_tank(&world, 0, Point::new(100.0, -100.0));
        let mut rx = connect(&world, 0);

        handle(
            &world,
            command(
                0,
                ClientMsg::Fire {
                    timestamp: 10_000,
                    target: Point::new(400.0, -100.0),
                },
            ),
        )
        .await
        .unwrap();

        assert_eq!(world.projectiles.len(), 1);
        assert!(matches!(
            rx.try_recv(),
            Ok(ServerMsg::ProjectileCreated { projectile }) if projectile.owner == 0
        ));
    }

    #[tokio::test]
    async fn multi_shot_weapons_stagger_spawn_times() {
        let (mut world, _gone) = world();
        let mut data = data_fixtures::game_data();
        let mut weapon = data_fixtures::weapon(2, data_fixtures::projectile(1));
        weapon.projectiles_per_shot = 3;
        weapon.interval_between_projectile_seconds = 0.1;
        data.insert_weapon(weapon);
        world.data = Arc::new(data);

        let tank = Arc::new(Tank::new(
            0,
            "burst",
            world.data.weapon(2).unwrap(),
            1.0,
            1.0,
            crate::game::Alliance::None,
            0,
        ));
        tank.set_position(Point::new(100.0, -100.0));
        world.tanks.add(tank.clone());
        let mut rx = connect(&world, 0);

        fire(&world, &tank, Point::new(400.0, -100.0), 10_000);

        match rx.try_recv() {
            Ok(ServerMsg::ProjectilesCreated { projectiles }) => {
                let times: Vec<i64> = projectiles.iter().map(|p| p.spawn_time_ms).collect();
                assert_eq!(times, vec![0, 100, 200]);
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[tokio::test]
    async fn chat_is_broadcast_with_name() {
        let (world, _gone) = world();
        add_tank(&world, 0, Point::new(100.0, -100.0));
        let mut rx = connect(&world, 1);

        handle(
            &world,
            command(
                0,
                ClientMsg::Chat {
                    message: "gg".into(),
                },
            ),
        )
        .await
        .unwrap();

        assert!(matches!(
            rx.try_recv(),
            Ok(ServerMsg::Chat { message }) if message == "tank-0: gg"
        ));
    }

    #[tokio::test]
    async fn rotate_chat_command_ends_the_round() {
        let (world, _gone) = world();
        add_tank(&world, 0, Point::new(100.0, -100.0));

        handle(
            &world,
            command(
                0,
                ClientMsg::Chat {
                    message: "/rotate".into(),
                },
            ),
        )
        .await
        .unwrap();

        assert!(world.timer.lock().expired());
    }

    #[tokio::test]
    async fn leave_removes_the_tank() {
        let (world, _gone) = world();
        add_tank(&world, 0, Point::new(100.0, -100.0));
        assert_ok!(handle(&world, command(0, ClientMsg::Leave)).await);
        assert!(!world.tanks.contains(0));
    }
}
