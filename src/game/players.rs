//! Joining, leaving and idle management of players

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::clock_sync::RESYNC_INTERVAL_MS;
use super::{GameError, GameWorld, Tank, TankId};
use crate::util::time::unix_millis;
use crate::ws::protocol::ServerMsg;

/// How often idle players are looked for
pub const IDLE_SCAN_INTERVAL: Duration = Duration::from_secs(1);

/// A player the session authority has vouched for but who has not joined yet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingSession {
    pub session_key: String,
    pub name: String,
    pub weapon_id: i32,
    #[serde(default = "default_factor")]
    pub speed_factor: f64,
    #[serde(default = "default_factor")]
    pub armor_factor: f64,
}

fn default_factor() -> f64 {
    1.0
}

/// Pending sessions keyed by session key
#[derive(Debug, Default)]
pub struct SessionStore {
    pending: Mutex<HashMap<String, (PendingSession, u64)>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, session: PendingSession, now: u64) {
        let key = session.session_key.clone();
        if self.pending.lock().insert(key, (session, now)).is_some() {
            warn!("Pending session key already existed, old value was overwritten");
        }
    }

    /// Consume the session for `key`
    pub fn take(&self, key: &str) -> Result<PendingSession, GameError> {
        match self.pending.lock().remove(key) {
            Some((session, _)) => {
                info!(name = %session.name, "Pending session claimed");
                Ok(session)
            }
            None => {
                warn!("Join attempted with an unknown session key");
                Err(GameError::PermissionDenied)
            }
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.pending.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

/// Turn a pending session into a tank in the game. `tx` receives every
/// notification for the new player, starting with a welcome.
pub async fn join(
    world: &GameWorld,
    session_key: &str,
    tx: mpsc::Sender<ServerMsg>,
) -> Result<Arc<Tank>, GameError> {
    world.wait_while_rotating().await;
    if world.notifier.is_closed() {
        return Err(GameError::TransportClosed);
    }

    let session = world.sessions.take(session_key)?;
    let weapon = world.data.weapon(session.weapon_id)?;
    let now = unix_millis();

    let tank = {
        let _membership = world.membership.lock();

        let existing = world.tanks.find_by_name(&session.name);
        let occupied = world.tanks.len() - usize::from(existing.is_some());
        if occupied >= world.config.player_limit {
            warn!(name = %session.name, limit = world.config.player_limit, "Server full");
            return Err(GameError::ServerFull);
        }
        if let Some(existing) = existing {
            info!(name = %session.name, "Player had already joined, replacing the old tank");
            remove_locked(world, existing.id());
        }

        let id = world.tanks.next_free_id();
        let mode = world.maps.current_mode();
        let team = world
            .tanks
            .next_team_assignment(mode, &mut *world.rng.lock());

        let tank = Arc::new(Tank::new(
            id,
            session.name,
            weapon,
            session.speed_factor,
            session.armor_factor,
            team,
            now,
        ));
        world.spawn_tank(&tank);
        world.nodes.process_position(&tank);

        world.notifier.broadcast(ServerMsg::PlayerJoined { player: tank.info() });
        world.tanks.add(tank.clone());
        world.points.add_player(id, tank.name());
        world.notifier.register(id, tx);
        tank
    };

    let players = world.tanks.all().iter().map(|t| t.info()).collect();
    world.notifier.send(
        tank.id(),
        ServerMsg::Welcome {
            you: tank.info(),
            players,
            map: world.maps.current_filename(),
            mode: world.maps.current_mode(),
            time_left: world.time_left(),
            server_time: now,
        },
    );
    world.clock.start(tank.clone(), world.notifier.clone());

    info!(tank_id = tank.id(), name = tank.name(), team = ?tank.team(), "Player joined");
    Ok(tank)
}

/// Take a player out of the game. Returns false if no such tank exists.
pub fn remove_player(world: &GameWorld, id: TankId) -> bool {
    let _membership = world.membership.lock();
    remove_locked(world, id)
}

fn remove_locked(world: &GameWorld, id: TankId) -> bool {
    let Some(tank) = world.tanks.find(id) else {
        warn!(tank_id = id, "Couldn't find player to remove");
        return false;
    };

    info!(tank_id = id, name = tank.name(), "Removing player");
    world.nodes.unregister(&tank);
    world.tanks.remove(id);
    world.notifier.unregister(id);
    world.clock.stop(id);
    world.notifier.broadcast(ServerMsg::PlayerLeft { id });
    true
}

/// The client has loaded the map: send it the objective state and the
/// utilities lying around
pub async fn ready(world: &GameWorld, tank: &Tank) {
    world.wait_while_rotating().await;

    tank.set_ready(true);
    let status = world.handler.lock().status();
    for event in status {
        world.notifier.send(tank.id(), event.into());
    }
    for active in world.utilities.active() {
        world
            .notifier
            .send(tank.id(), ServerMsg::utility_spawned(&active));
    }
}

/// Remove idle players and re-sync stale clocks
pub fn manage_players(world: &GameWorld, now: u64) {
    let idle_timeout = world.config.idle_timeout_ms;

    for tank in world.tanks.all() {
        if now.saturating_sub(tank.last_action()) > idle_timeout {
            info!(tank_id = tank.id(), name = tank.name(), "Removing idle player");
            remove_player(world, tank.id());
            continue;
        }

        if now.saturating_sub(tank.last_sync()) > RESYNC_INTERVAL_MS {
            debug!(tank_id = tank.id(), "Clock sync is stale, re-synchronizing");
            tank.set_last_sync(now);
            world.clock.start(tank, world.notifier.clone());
        }
    }
}

/// Periodic idle scan; stops once the transport has shut down
pub fn spawn_idle_manager(world: GameWorld) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(IDLE_SCAN_INTERVAL);
        loop {
            interval.tick().await;
            if world.notifier.is_closed() {
                break;
            }
            manage_players(&world, unix_millis());
        }
    })
}

/// Remove every player the notifier reports as gone
pub fn spawn_reaper(world: GameWorld, mut gone: mpsc::UnboundedReceiver<TankId>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(id) = gone.recv().await {
            debug!(tank_id = id, "Reaping disconnected player");
            remove_player(&world, id);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::world::fixtures::{add_tank, connect, drain, world};
    use crate::game::Point;

    fn session(key: &str, name: &str) -> PendingSession {
        PendingSession {
            session_key: key.into(),
            name: name.into(),
            weapon_id: 1,
            speed_factor: 1.0,
            armor_factor: 1.0,
        }
    }

    #[tokio::test]
    async fn join_requires_a_pending_session() {
        let (world, _gone) = world();
        let (tx, _rx) = mpsc::channel(8);

        let result = join(&world, "nope", tx).await;
        assert!(matches!(result, Err(GameError::PermissionDenied)));
    }

    #[tokio::test]
    async fn join_creates_spawns_and_welcomes() {
        let (world, _gone) = world();
        let mut watcher = connect(&world, 9);
        add_tank(&world, 9, Point::new(100.0, -100.0));

        world.sessions.add(session("k1", "alpha"), 0);
        let (tx, mut rx) = mpsc::channel(8);
        let tank = join(&world, "k1", tx).await.unwrap();

        assert_eq!(tank.id(), 0);
        assert!(world.tanks.contains(0));
        assert!(world.points.get(0).is_some());
        assert!(tank.node_id() >= 0);
        assert!(!world.sessions.contains("k1"));

        assert!(matches!(rx.try_recv(), Ok(ServerMsg::Welcome { ref players, .. }) if players.len() == 2));
        assert!(drain(&mut watcher)
            .iter()
            .any(|m| matches!(m, ServerMsg::PlayerJoined { player } if player.name == "alpha")));
        world.clock.stop(0);
    }

    #[tokio::test]
    async fn rejoining_replaces_the_old_tank() {
        let (world, _gone) = world();
        world.sessions.add(session("a", "alpha"), 0);
        world.sessions.add(session("b", "alpha"), 0);

        let (tx1, _rx1) = mpsc::channel(8);
        let (tx2, _rx2) = mpsc::channel(8);
        let first = join(&world, "a", tx1).await.unwrap();
        let second = join(&world, "b", tx2).await.unwrap();

        assert_eq!(world.tanks.len(), 1);
        assert_eq!(first.id(), second.id());
        assert!(Arc::ptr_eq(&world.tanks.get(second.id()).unwrap(), &second));
        world.clock.stop(second.id());
    }

    #[tokio::test]
    async fn player_limit_is_enforced() {
        let (world, _gone) = world();
        for id in 0..world.config.player_limit as TankId {
            add_tank(&world, id, Point::new(100.0, -100.0));
        }
        world.sessions.add(session("late", "latecomer"), 0);

        let (tx, _rx) = mpsc::channel(8);
        assert!(matches!(
            join(&world, "late", tx).await,
            Err(GameError::ServerFull)
        ));
    }

    #[test]
    fn removal_unregisters_everywhere() {
        let (world, _gone) = world();
        let mut watcher = connect(&world, 1);
        add_tank(&world, 1, Point::new(100.0, -100.0));
        let leaving = add_tank(&world, 2, Point::new(120.0, -100.0));
        let _rx = connect(&world, 2);
        let node = leaving.node_id();

        assert!(remove_player(&world, 2));
        assert!(!world.tanks.contains(2));
        assert!(!world.notifier.is_registered(2));
        assert!(!world.nodes.relevant_players(node).contains(&2));
        assert!(drain(&mut watcher)
            .iter()
            .any(|m| matches!(m, ServerMsg::PlayerLeft { id: 2 })));

        assert!(!remove_player(&world, 2));
    }

    #[test]
    fn idle_players_are_removed() {
        let (world, _gone) = world();
        let idle = add_tank(&world, 0, Point::new(100.0, -100.0));
        let active = add_tank(&world, 1, Point::new(100.0, -100.0));
        idle.touch(0);
        idle.set_last_sync(0);
        active.touch(20_000);
        active.set_last_sync(20_000);

        manage_players(&world, 20_000);

        assert!(!world.tanks.contains(0));
        assert!(world.tanks.contains(1));
    }

    #[tokio::test]
    async fn ready_sends_active_utilities() {
        let (world, _gone) = world();
        let tank = add_tank(&world, 0, Point::new(100.0, -100.0));
        let mut rx = connect(&world, 0);
        world.utilities.set_types(vec![crate::game::data::UtilityType {
            id: 1,
            model: "health".into(),
            duration: 0.0,
            damage_factor: 0.0,
            speed_factor: 0.0,
            rate_factor: 0.0,
            health_increase: 10,
            health_factor: 0.0,
        }]);
        world.utilities.try_spawn(1_000_000).unwrap();

        ready(&world, &tank).await;

        assert!(tank.is_ready());
        assert!(drain(&mut rx)
            .iter()
            .any(|m| matches!(m, ServerMsg::UtilitySpawned { .. })));
    }
}
