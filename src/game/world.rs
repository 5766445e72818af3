//! The shared game world
//!
//! Every service the simulation needs is constructed once here and handed
//! to the frame loop, the command dispatcher and the transport by cloning
//! the `Arc` handles.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tokio::sync::mpsc;

use super::clock_sync::ClockSync;
use super::data::GameData;
use super::handler::GameHandler;
use super::map_manager::MapManager;
use super::node::NodeManager;
use super::players::SessionStore;
use super::points::PointManager;
use super::projectile::ProjectileManager;
use super::utility::UtilityManager;
use super::{GameError, Point, Tank, TankId, TankManager};
use crate::config::Config;
use crate::notify::Notifier;
use crate::report::StatsReporter;
use crate::util::time::GameTimer;

/// Poll period while waiting for a map rotation to finish
const ROTATION_POLL: Duration = Duration::from_millis(10);

#[derive(Clone)]
pub struct GameWorld {
    pub config: Arc<Config>,
    pub data: Arc<GameData>,
    pub tanks: Arc<TankManager>,
    pub maps: Arc<MapManager>,
    pub nodes: Arc<NodeManager>,
    pub projectiles: Arc<ProjectileManager>,
    pub points: Arc<PointManager>,
    pub utilities: Arc<UtilityManager>,
    /// Replaced wholesale on every map rotation
    pub handler: Arc<Mutex<GameHandler>>,
    pub timer: Arc<Mutex<GameTimer>>,
    pub notifier: Arc<Notifier>,
    pub sessions: Arc<SessionStore>,
    pub clock: Arc<ClockSync>,
    pub reporter: Option<StatsReporter>,
    /// Team assignment
    pub rng: Arc<Mutex<ChaCha8Rng>>,
    /// Serializes joins and removals
    pub(crate) membership: Arc<Mutex<()>>,
}

impl GameWorld {
    /// Build the world around the map `maps` currently has loaded. Also
    /// returns the stream of peers the notifier found to be gone.
    pub fn new(
        config: Config,
        data: GameData,
        maps: MapManager,
        now: u64,
    ) -> Result<(Self, mpsc::UnboundedReceiver<TankId>), GameError> {
        let data = Arc::new(data);
        let projectiles = ProjectileManager::new(data.clone());
        let utilities = UtilityManager::new(data.utilities().to_vec(), now);
        Self::assemble(config, data, maps, projectiles, utilities, ChaCha8Rng::from_entropy(), now)
    }

    /// Deterministic variant for tests and replays
    pub fn with_seed(
        config: Config,
        data: GameData,
        maps: MapManager,
        seed: u64,
        now: u64,
    ) -> Result<(Self, mpsc::UnboundedReceiver<TankId>), GameError> {
        let data = Arc::new(data);
        let projectiles = ProjectileManager::with_seed(data.clone(), seed);
        let utilities = UtilityManager::with_seed(data.utilities().to_vec(), seed, now);
        Self::assemble(
            config,
            data,
            maps,
            projectiles,
            utilities,
            ChaCha8Rng::seed_from_u64(seed),
            now,
        )
    }

    fn assemble(
        config: Config,
        data: Arc<GameData>,
        maps: MapManager,
        projectiles: ProjectileManager,
        utilities: UtilityManager,
        rng: ChaCha8Rng,
        now: u64,
    ) -> Result<(Self, mpsc::UnboundedReceiver<TankId>), GameError> {
        let map = maps.map()?;

        let nodes = NodeManager::new();
        nodes.set_map(&map);
        utilities.update_map(&map);
        let handler = GameHandler::create(maps.current_mode(), &map, &projectiles);
        let timer = GameTimer::new(config.round_length_ms, now);
        let reporter = config.stats_url.as_deref().map(StatsReporter::new);
        let (notifier, gone_rx) = Notifier::new();

        let world = Self {
            config: Arc::new(config),
            data,
            tanks: Arc::new(TankManager::new()),
            maps: Arc::new(maps),
            nodes: Arc::new(nodes),
            projectiles: Arc::new(projectiles),
            points: Arc::new(PointManager::new()),
            utilities: Arc::new(utilities),
            handler: Arc::new(Mutex::new(handler)),
            timer: Arc::new(Mutex::new(timer)),
            notifier: Arc::new(notifier),
            sessions: Arc::new(SessionStore::new()),
            clock: Arc::new(ClockSync::new()),
            reporter,
            rng: Arc::new(Mutex::new(rng)),
            membership: Arc::new(Mutex::new(())),
        };
        Ok((world, gone_rx))
    }

    /// Block the caller while the map is being swapped
    pub async fn wait_while_rotating(&self) {
        while self.maps.is_rotating() {
            tokio::time::sleep(ROTATION_POLL).await;
        }
    }

    /// Place `tank` at the game mode's spawn point, or the map's default
    /// spawn for its team
    pub fn spawn_tank(&self, tank: &Tank) -> Option<Point> {
        let custom = {
            let mut handler = self.handler.lock();
            handler
                .has_custom_spawn_points()
                .then(|| handler.spawn(tank))
        };

        let position = match custom {
            Some(position) => position,
            None => self.maps.spawn_position(tank.team()),
        };
        if let Some(position) = position {
            tank.set_position(position);
        }
        position
    }

    pub fn time_left(&self) -> f64 {
        self.timer.lock().time_left()
    }

    pub fn scores(&self) -> (i32, i32) {
        let handler = self.handler.lock();
        (handler.red_score(), handler.blue_score())
    }
}

/// Worlds and maps shared by simulation tests
#[cfg(test)]
pub mod fixtures {
    use super::*;
    use crate::game::data::fixtures as data_fixtures;
    use crate::game::map::{events, GameMode, Map};
    use crate::game::map_manager::SelectionMode;
    use crate::game::Alliance;

    /// 10x10 deathmatch arena with spawn points in two corners
    pub fn deathmatch_map() -> Map {
        let mut map = Map::create(10, 10, "test arena").unwrap();
        map.set_tile_event(1, 1, events::SPAWN_POINT).unwrap();
        map.set_tile_event(8, 8, events::SPAWN_POINT).unwrap();
        map.set_tile_event(5, 5, events::UTILITY).unwrap();
        map.set_supported_modes(vec![GameMode::Deathmatch]);
        map
    }

    pub fn world_with_map(map: Map) -> (GameWorld, mpsc::UnboundedReceiver<TankId>) {
        let maps = MapManager::with_seed("maps", SelectionMode::RoundRobin, 1);
        maps.load_map(map, "test.vtmap");
        GameWorld::with_seed(
            Config::for_tests(),
            data_fixtures::game_data(),
            maps,
            1,
            0,
        )
        .unwrap()
    }

    pub fn world() -> (GameWorld, mpsc::UnboundedReceiver<TankId>) {
        world_with_map(deathmatch_map())
    }

    /// Add a tank directly, bypassing sessions and notifications
    pub fn add_tank(world: &GameWorld, id: TankId, position: Point) -> Arc<Tank> {
        let weapon = world.data.weapon(1).unwrap();
        let tank = Arc::new(Tank::new(
            id,
            format!("tank-{id}"),
            weapon,
            1.0,
            1.0,
            Alliance::None,
            0,
        ));
        tank.set_position(position);
        world.nodes.process_position(&tank);
        world.tanks.add(tank.clone());
        world.points.add_player(id, tank.name());
        tank
    }

    /// Register an outbound channel for `id`
    pub fn connect(
        world: &GameWorld,
        id: TankId,
    ) -> mpsc::Receiver<crate::ws::protocol::ServerMsg> {
        let (tx, rx) = mpsc::channel(64);
        world.notifier.register(id, tx);
        rx
    }

    /// Everything queued for a client so far
    pub fn drain(
        rx: &mut mpsc::Receiver<crate::ws::protocol::ServerMsg>,
    ) -> Vec<crate::ws::protocol::ServerMsg> {
        let mut messages = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            messages.push(msg);
        }
        messages
    }
}
