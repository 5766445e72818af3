//! Per-round statistics and point calculation

use std::collections::BTreeMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::{TankId, TankManager};

pub const KILL_VALUE: i32 = 10;
pub const ASSIST_VALUE: i32 = 5;
pub const OBJECTIVE_CAPTURED_VALUE: i32 = 20;
pub const OBJECTIVE_COMPLETED_VALUE: i32 = 20;

/// One player's scoreboard row
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistics {
    pub tank_name: String,
    pub kills: i32,
    pub deaths: i32,
    pub assists: i32,
    pub objectives_captured: i32,
    pub objectives_completed: i32,
    pub calculated_points: i32,
}

impl Statistics {
    fn new(tank_name: impl Into<String>) -> Self {
        Self {
            tank_name: tank_name.into(),
            ..Default::default()
        }
    }

    fn is_empty(&self) -> bool {
        self.kills == 0
            && self.assists == 0
            && self.deaths == 0
            && self.objectives_captured == 0
            && self.objectives_completed == 0
    }

    fn calculate_points(&mut self) {
        self.calculated_points = self.kills * KILL_VALUE
            + self.assists * ASSIST_VALUE
            + self.objectives_completed * OBJECTIVE_COMPLETED_VALUE
            + self.objectives_captured * OBJECTIVE_CAPTURED_VALUE;
    }
}

/// Statistics keyed by tank id. Updates for unregistered tanks are dropped.
#[derive(Debug, Default)]
pub struct PointManager {
    statistics: RwLock<BTreeMap<TankId, Statistics>>,
}

impl PointManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&self) {
        self.statistics.write().clear();
    }

    /// Register a tank; existing rows are kept
    pub fn add_player(&self, id: TankId, name: &str) {
        self.statistics
            .write()
            .entry(id)
            .or_insert_with(|| Statistics::new(name));
    }

    fn update(&self, id: TankId, apply: impl FnOnce(&mut Statistics)) {
        if let Some(stats) = self.statistics.write().get_mut(&id) {
            apply(stats);
        }
    }

    pub fn add_kill(&self, id: TankId) {
        self.update(id, |s| s.kills += 1);
    }

    pub fn add_assist(&self, id: TankId) {
        self.update(id, |s| s.assists += 1);
    }

    pub fn add_death(&self, id: TankId) {
        self.update(id, |s| s.deaths += 1);
    }

    pub fn add_objective_captured(&self, id: TankId) {
        self.update(id, |s| s.objectives_captured += 1);
    }

    pub fn add_objective_completed(&self, id: TankId) {
        self.update(id, |s| s.objectives_completed += 1);
    }

    pub fn get(&self, id: TankId) -> Option<Statistics> {
        self.statistics.read().get(&id).cloned()
    }

    /// Current scoreboard, optionally limited to tanks still in the game
    pub fn compile(&self, tanks: Option<&TankManager>) -> Vec<Statistics> {
        self.statistics
            .read()
            .iter()
            .filter(|(id, _)| tanks.map_or(true, |tanks| tanks.contains(**id)))
            .map(|(_, stats)| {
                let mut stats = stats.clone();
                stats.calculate_points();
                stats
            })
            .collect()
    }

    /// End-of-round report: points filled in, idle players left out
    pub fn compile_and_calculate(&self) -> Vec<Statistics> {
        let mut statistics = self.statistics.write();
        statistics
            .values_mut()
            .filter_map(|stats| {
                stats.calculate_points();
                (!stats.is_empty()).then(|| stats.clone())
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.statistics.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.statistics.read().is_empty()
    }
}
