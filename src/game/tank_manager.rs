//! Registry of joined tanks

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use rand::Rng;
use tracing::warn;

use super::map::GameMode;
use super::{Alliance, GameError, Tank, TankId};

/// Thread-safe id -> tank lookup; reads run concurrently, writes exclusively
#[derive(Debug, Default)]
pub struct TankManager {
    tanks: RwLock<HashMap<TankId, Arc<Tank>>>,
}

impl TankManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, tank: Arc<Tank>) {
        let id = tank.id();
        if self.tanks.write().insert(id, tank).is_some() {
            warn!(tank_id = id, "Replaced an existing tank with the same id");
        }
    }

    /// Returns true if a tank was removed
    pub fn remove(&self, id: TankId) -> bool {
        self.tanks.write().remove(&id).is_some()
    }

    pub fn find(&self, id: TankId) -> Option<Arc<Tank>> {
        self.tanks.read().get(&id).cloned()
    }

    pub fn get(&self, id: TankId) -> Result<Arc<Tank>, GameError> {
        self.find(id).ok_or(GameError::TankNotFound(id))
    }

    pub fn contains(&self, id: TankId) -> bool {
        self.tanks.read().contains_key(&id)
    }

    pub fn find_by_name(&self, name: &str) -> Option<Arc<Tank>> {
        self.tanks
            .read()
            .values()
            .find(|tank| tank.name() == name)
            .cloned()
    }

    /// Snapshot of every tank, ordered by id
    pub fn all(&self) -> Vec<Arc<Tank>> {
        let mut tanks: Vec<_> = self.tanks.read().values().cloned().collect();
        tanks.sort_by_key(|tank| tank.id());
        tanks
    }

    pub fn ids(&self) -> Vec<TankId> {
        let mut ids: Vec<_> = self.tanks.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.tanks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tanks.read().is_empty()
    }

    /// Smallest id not currently in use
    pub fn next_free_id(&self) -> TankId {
        let tanks = self.tanks.read();
        (0..).find(|id| !tanks.contains_key(id)).unwrap_or_default()
    }

    fn team_counts(&self) -> (usize, usize) {
        self.tanks
            .read()
            .values()
            .fold((0, 0), |(red, blue), tank| match tank.team() {
                Alliance::Red => (red + 1, blue),
                Alliance::Blue => (red, blue + 1),
                Alliance::None => (red, blue),
            })
    }

    /// Shuffle everyone into balanced teams, or clear teams for deathmatch
    pub fn organize_teams(&self, mode: GameMode, rng: &mut impl Rng) {
        let tanks = self.all();

        if !mode.is_team_based() {
            for tank in &tanks {
                tank.set_team(Alliance::None);
            }
            return;
        }

        let (mut red, mut blue) = (0usize, 0usize);
        for tank in &tanks {
            let team = pick_smaller(red, blue, rng);
            match team {
                Alliance::Red => red += 1,
                _ => blue += 1,
            }
            tank.set_team(team);
        }
    }

    /// Team a newly joined tank should be placed on
    pub fn next_team_assignment(&self, mode: GameMode, rng: &mut impl Rng) -> Alliance {
        if !mode.is_team_based() {
            return Alliance::None;
        }

        let (red, blue) = self.team_counts();
        if !self.is_empty() && red == 0 && blue == 0 {
            // Teams have not been organized yet
            return Alliance::None;
        }

        pick_smaller(red, blue, rng)
    }
}

fn pick_smaller(red: usize, blue: usize, rng: &mut impl Rng) -> Alliance {
    match red.cmp(&blue) {
        std::cmp::Ordering::Less => Alliance::Red,
        std::cmp::Ordering::Greater => Alliance::Blue,
        std::cmp::Ordering::Equal => {
            if rng.gen_bool(0.5) {
                Alliance::Red
            } else {
                Alliance::Blue
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::data::fixtures;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn tank(id: TankId, team: Alliance) -> Arc<Tank> {
        let weapon = Arc::new(fixtures::weapon(1, fixtures::projectile(1)));
        Arc::new(Tank::new(id, format!("t{id}"), weapon, 1.0, 1.0, team, 0))
    }

    #[test]
    fn lookups() {
        let manager = TankManager::new();
        manager.add(tank(0, Alliance::None));
        manager.add(tank(2, Alliance::None));

        assert!(manager.get(0).is_ok());
        assert!(matches!(manager.get(1), Err(GameError::TankNotFound(1))));
        assert_eq!(manager.next_free_id(), 1);
        assert_eq!(manager.find_by_name("t2").map(|t| t.id()), Some(2));

        assert!(manager.remove(0));
        assert!(!manager.remove(0));
        assert_eq!(manager.next_free_id(), 0);
    }

    #[test]
    fn organized_teams_are_balanced() {
        let manager = TankManager::new();
        for id in 0..7 {
            manager.add(tank(id, Alliance::None));
        }
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        manager.organize_teams(GameMode::CaptureTheFlag, &mut rng);

        let (red, blue) = manager.team_counts();
        assert_eq!(red + blue, 7);
        assert!(red.abs_diff(blue) <= 1);

        manager.organize_teams(GameMode::Deathmatch, &mut rng);
        assert_eq!(manager.team_counts(), (0, 0));
    }

    #[test]
    fn new_players_join_the_smaller_team() {
        let manager = TankManager::new();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert_eq!(
            manager.next_team_assignment(GameMode::Deathmatch, &mut rng),
            Alliance::None
        );

        manager.add(tank(0, Alliance::Red));
        manager.add(tank(1, Alliance::Red));
        manager.add(tank(2, Alliance::Blue));
        assert_eq!(
            manager.next_team_assignment(GameMode::TeamDeathmatch, &mut rng),
            Alliance::Blue
        );

        let unorganized = TankManager::new();
        unorganized.add(tank(0, Alliance::None));
        assert_eq!(
            unorganized.next_team_assignment(GameMode::TeamDeathmatch, &mut rng),
            Alliance::None
        );
    }
}
