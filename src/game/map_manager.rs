//! Map selection, loading and default spawn placement
//!
//! The active map is swapped under a write lock, so readers see either the
//! previous map or the fully loaded next one.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::map::{events, GameMode, Map, MapError, MAP_EXTENSION};
use super::{Alliance, GameError, Point};

/// How the next map is picked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionMode {
    /// Any map except the one just played
    Random,
    /// Walk the map list in order
    RoundRobin,
}

impl FromStr for SelectionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "random" => Ok(SelectionMode::Random),
            "round_robin" | "round-robin" | "roundrobin" => Ok(SelectionMode::RoundRobin),
            other => Err(format!("unknown map selection mode '{other}'")),
        }
    }
}

/// Shuffled spawn points with a cursor; reshuffled after each full cycle
#[derive(Debug, Default)]
struct SpawnCycle {
    points: Vec<Point>,
    cursor: usize,
}

impl SpawnCycle {
    fn new(mut points: Vec<Point>, rng: &mut ChaCha8Rng) -> Self {
        points.shuffle(rng);
        Self { points, cursor: 0 }
    }

    fn next(&mut self, rng: &mut ChaCha8Rng) -> Option<Point> {
        let point = *self.points.get(self.cursor)?;
        self.cursor += 1;
        if self.cursor >= self.points.len() {
            self.points.shuffle(rng);
            self.cursor = 0;
        }
        Some(point)
    }
}

#[derive(Debug)]
struct MapState {
    map_list: Vec<String>,
    current: Option<Arc<Map>>,
    current_file: String,
    current_index: Option<usize>,
    mode: GameMode,
    spawns: SpawnCycle,
    red_spawns: SpawnCycle,
    blue_spawns: SpawnCycle,
    rng: ChaCha8Rng,
}

pub struct MapManager {
    dir: PathBuf,
    selection: SelectionMode,
    rotating: AtomicBool,
    state: RwLock<MapState>,
}

impl MapManager {
    pub fn new(dir: impl Into<PathBuf>, selection: SelectionMode) -> Self {
        Self::with_rng(dir.into(), selection, ChaCha8Rng::from_entropy())
    }

    pub fn with_seed(dir: impl Into<PathBuf>, selection: SelectionMode, seed: u64) -> Self {
        Self::with_rng(dir.into(), selection, ChaCha8Rng::seed_from_u64(seed))
    }

    fn with_rng(dir: PathBuf, selection: SelectionMode, rng: ChaCha8Rng) -> Self {
        Self {
            dir,
            selection,
            rotating: AtomicBool::new(false),
            state: RwLock::new(MapState {
                map_list: Vec::new(),
                current: None,
                current_file: String::new(),
                current_index: None,
                mode: GameMode::Deathmatch,
                spawns: SpawnCycle::default(),
                red_spawns: SpawnCycle::default(),
                blue_spawns: SpawnCycle::default(),
                rng,
            }),
        }
    }

    /// Rescan the map directory. Returns the number of map files found.
    pub fn refresh_map_list(&self) -> Result<usize, MapError> {
        let mut list = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(MAP_EXTENSION) {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                list.push(name.to_string());
            }
        }
        list.sort();

        info!(dir = %self.dir.display(), count = list.len(), "Map list refreshed");
        let count = list.len();
        self.state.write().map_list = list;
        Ok(count)
    }

    pub fn map_list(&self) -> Vec<String> {
        self.state.read().map_list.clone()
    }

    pub fn is_rotating(&self) -> bool {
        self.rotating.load(Ordering::Acquire)
    }

    pub fn set_rotating(&self, rotating: bool) {
        self.rotating.store(rotating, Ordering::Release);
    }

    pub fn current_map(&self) -> Option<Arc<Map>> {
        self.state.read().current.clone()
    }

    pub fn map(&self) -> Result<Arc<Map>, GameError> {
        self.current_map().ok_or(GameError::NoMapLoaded)
    }

    pub fn current_filename(&self) -> String {
        self.state.read().current_file.clone()
    }

    pub fn current_mode(&self) -> GameMode {
        self.state.read().mode
    }

    /// Switch to the next playable map. Maps that fail to load or declare no
    /// modes are skipped; if none is usable the previous map is kept.
    pub fn rotate(&self) -> Result<Arc<Map>, GameError> {
        let mut state = self.state.write();
        let candidates = self.candidates(&mut state);

        for index in candidates {
            let file = state.map_list[index].clone();
            let map = match load_with_digest(&self.dir.join(&file)) {
                Ok(map) => map,
                Err(e) => {
                    warn!(map = %file, error = %e, "Failed to load map");
                    continue;
                }
            };
            if !map.is_legal() {
                debug!(map = %file, "Skipping map without game modes");
                continue;
            }
            if !map.validate_supported_game_modes() {
                warn!(map = %file, "Skipping map missing markers for its game modes");
                continue;
            }

            let mode = select_game_mode(&map);
            let map = Arc::new(map);
            install(&mut state, map.clone(), file, Some(index), mode);
            info!(map = %state.current_file, title = %map.title(), mode = %mode, "Rotated to the next map");
            return Ok(map);
        }

        Err(GameError::NoLegalMaps)
    }

    /// Order in which maps are tried this rotation
    fn candidates(&self, state: &mut MapState) -> Vec<usize> {
        let count = state.map_list.len();
        if count == 0 {
            return Vec::new();
        }

        match self.selection {
            SelectionMode::Random => {
                let mut order: Vec<usize> = (0..count).collect();
                order.shuffle(&mut state.rng);
                // The map just played is only a last resort
                if let Some(last) = state.current_index {
                    if let Some(pos) = order.iter().position(|&i| i == last) {
                        let last = order.remove(pos);
                        order.push(last);
                    }
                }
                order
            }
            SelectionMode::RoundRobin => {
                let start = match state.current_index {
                    Some(index) => index + 1,
                    None => state.rng.gen_range(0..count),
                };
                (0..count).map(|offset| (start + offset) % count).collect()
            }
        }
    }

    /// Install an in-memory map directly, bypassing the map directory
    pub fn load_map(&self, map: Map, name: &str) -> Arc<Map> {
        let mode = select_game_mode(&map);
        let map = Arc::new(map);
        let mut state = self.state.write();
        install(&mut state, map.clone(), name.to_string(), None, mode);
        map
    }

    /// Next default spawn point for a tank on `team`
    pub fn spawn_position(&self, team: Alliance) -> Option<Point> {
        let mut guard = self.state.write();
        let MapState {
            mode,
            spawns,
            red_spawns,
            blue_spawns,
            rng,
            ..
        } = &mut *guard;

        if *mode == GameMode::Deathmatch {
            return spawns.next(rng);
        }

        let point = match team {
            Alliance::Red => red_spawns.next(rng),
            Alliance::Blue => blue_spawns.next(rng),
            Alliance::None => None,
        };
        point
            .or_else(|| spawns.next(rng))
            .or_else(|| red_spawns.next(rng))
    }
}

fn install(state: &mut MapState, map: Arc<Map>, file: String, index: Option<usize>, mode: GameMode) {
    let rng = &mut state.rng;
    state.spawns = SpawnCycle::new(map.event_positions(events::SPAWN_POINT), rng);
    state.red_spawns = SpawnCycle::new(map.event_positions(events::RED_SPAWN_AREA), rng);
    state.blue_spawns = SpawnCycle::new(map.event_positions(events::BLUE_SPAWN_AREA), rng);
    state.current = Some(map);
    state.current_file = file;
    state.current_index = index;
    state.mode = mode;
}

fn load_with_digest(path: &Path) -> Result<Map, MapError> {
    let data = std::fs::read(path)?;
    let digest = hex::encode(Sha256::digest(&data));
    debug!(path = %path.display(), sha256 = %digest, "Loading map");
    Map::from_bytes(&data)
}

/// Objective modes win over plain deathmatch
pub fn select_game_mode(map: &Map) -> GameMode {
    [
        GameMode::CaptureTheBase,
        GameMode::CaptureTheFlag,
        GameMode::TeamDeathmatch,
    ]
    .into_iter()
    .find(|&mode| map.supports(mode))
    .unwrap_or(GameMode::Deathmatch)
}
