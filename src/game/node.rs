//! Spatial partitioning of the map into coarse nodes
//!
//! Each node covers `NODE_WIDTH x NODE_HEIGHT` world units. Tanks are
//! registered by id in the node containing them, so "who is near" queries
//! only look at a 3x3 neighborhood instead of every tank.

use std::collections::BTreeSet;

use parking_lot::Mutex;

use super::map::Map;
use super::{Point, Tank, TankId, NODE_HEIGHT, NODE_WIDTH, TILE_SIZE};

#[derive(Debug, Default)]
pub struct Node {
    id: i32,
    tanks: BTreeSet<TankId>,
}

impl Node {
    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn tanks(&self) -> impl Iterator<Item = TankId> + '_ {
        self.tanks.iter().copied()
    }
}

#[derive(Debug, Default)]
struct Grid {
    width: i32,
    height: i32,
    nodes: Vec<Node>,
}

impl Grid {
    fn size(&self) -> i32 {
        self.nodes.len() as i32
    }

    fn node_at(&self, position: Point) -> i32 {
        let x = (position.x / NODE_WIDTH).floor();
        let y = (-position.y / NODE_HEIGHT).floor();
        if x < 0.0 || y < 0.0 || x >= f64::from(self.width) || y >= f64::from(self.height) {
            return -1;
        }
        y as i32 * self.width + x as i32
    }

    fn node_mut(&mut self, id: i32) -> Option<&mut Node> {
        if id < 0 {
            return None;
        }
        self.nodes.get_mut(id as usize)
    }

    fn holds(&self, node_id: i32, tank: TankId) -> bool {
        node_id >= 0
            && self
                .nodes
                .get(node_id as usize)
                .is_some_and(|node| node.tanks.contains(&tank))
    }

    /// Drop every registration of `tank`, starting with the node it claims
    fn detach(&mut self, tank: TankId, node_id: i32) {
        let removed = self
            .node_mut(node_id)
            .is_some_and(|node| node.tanks.remove(&tank));
        if !removed {
            for node in &mut self.nodes {
                node.tanks.remove(&tank);
            }
        }
    }
}

/// Node grid; every operation takes one mutex and is O(1)
#[derive(Debug, Default)]
pub struct NodeManager {
    grid: Mutex<Grid>,
}

impl NodeManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the grid for a newly loaded map, dropping all registrations
    pub fn set_map(&self, map: &Map) {
        let map_width = f64::from(map.width()) * TILE_SIZE;
        let map_height = f64::from(map.height()) * TILE_SIZE;
        let width = (map_width / NODE_WIDTH).ceil() as i32;
        let height = (map_height / NODE_HEIGHT).ceil() as i32;
        debug_assert!(width > 0 && height > 0);

        let nodes = (0..width * height)
            .map(|id| Node {
                id,
                tanks: BTreeSet::new(),
            })
            .collect();

        *self.grid.lock() = Grid {
            width,
            height,
            nodes,
        };
    }

    pub fn width(&self) -> i32 {
        self.grid.lock().width
    }

    pub fn height(&self) -> i32 {
        self.grid.lock().height
    }

    pub fn size(&self) -> i32 {
        self.grid.lock().size()
    }

    /// Node index containing `position`, or -1 outside the grid
    pub fn node_at(&self, position: Point) -> i32 {
        self.grid.lock().node_at(position)
    }

    /// Move a tank's registration to the node matching its current position.
    /// Calling this again without moving is a no-op.
    pub fn process_position(&self, tank: &Tank) {
        // Position and node id are read under the grid lock so concurrent
        // callers for the same tank serialize
        let mut grid = self.grid.lock();
        let position = tank.position();
        let current = tank.node_id();
        let node = grid.node_at(position);

        if node == current && grid.holds(node, tank.id()) {
            return;
        }

        grid.detach(tank.id(), current);
        if let Some(new) = grid.node_mut(node) {
            new.tanks.insert(tank.id());
        }
        tank.set_node_id(node);
    }

    pub fn unregister(&self, tank: &Tank) {
        let mut grid = self.grid.lock();
        grid.detach(tank.id(), tank.node_id());
        tank.set_node_id(-1);
    }

    /// Tanks in `node_id` and its eight neighbors, clockwise from the northwest
    pub fn relevant_players(&self, node_id: i32) -> Vec<TankId> {
        if node_id < 0 {
            return Vec::new();
        }

        let grid = self.grid.lock();
        let top = node_id - grid.width;
        let bottom = node_id + grid.width;
        let neighborhood = [
            top - 1,
            top,
            top + 1,
            node_id + 1,
            bottom + 1,
            bottom,
            bottom - 1,
            node_id - 1,
            node_id,
        ];

        neighborhood
            .iter()
            .filter(|&&id| id >= 0 && id < grid.size())
            .flat_map(|&id| grid.nodes[id as usize].tanks.iter().copied())
            .collect()
    }

    /// Adjacency by index arithmetic. Row edges are not special-cased, so the
    /// last node of one row counts as near the first node of the next.
    pub fn is_near(&self, node1: i32, node2: i32) -> bool {
        let width = self.grid.lock().width;
        node1 == node2
            || node1 - width == node2
            || node1 + width == node2
            || node1 + 1 == node2
            || node1 - 1 == node2
            || node1 - width - 1 == node2
            || node1 + width - 1 == node2
            || node1 - width + 1 == node2
            || node1 + width + 1 == node2
    }

    /// Registered tank ids per node, for diagnostics and tests
    pub fn registrations(&self) -> Vec<(i32, Vec<TankId>)> {
        self.grid
            .lock()
            .nodes
            .iter()
            .filter(|node| !node.tanks.is_empty())
            .map(|node| (node.id, node.tanks().collect()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::data::fixtures;
    use crate::game::Alliance;
    use proptest::prelude::*;
    use std::sync::{Arc, Barrier};
    use std::thread;

    /// 4x4 node grid
    fn manager() -> NodeManager {
        let map = Map::create(52, 40, "nodes").unwrap();
        let nodes = NodeManager::new();
        nodes.set_map(&map);
        nodes
    }

    fn tank(id: TankId, position: Point) -> Tank {
        let weapon = Arc::new(fixtures::weapon(1, fixtures::projectile(1)));
        let tank = Tank::new(id, "t", weapon, 1.0, 1.0, Alliance::None, 0);
        tank.set_position(position);
        tank
    }

    #[test]
    fn grid_dimensions() {
        let nodes = manager();
        assert_eq!(nodes.width(), 4);
        assert_eq!(nodes.height(), 4);

        let odd = Map::create(53, 41, "odd").unwrap();
        nodes.set_map(&odd);
        assert_eq!(nodes.size(), 25);
    }

    #[test]
    fn node_indices() {
        let nodes = manager();
        assert_eq!(nodes.node_at(Point::new(0.0, 0.0)), 0);
        assert_eq!(nodes.node_at(Point::new(832.0, 0.0)), 1);
        assert_eq!(nodes.node_at(Point::new(832.0, -640.0)), 5);
        assert_eq!(nodes.node_at(Point::new(-1.0, 0.0)), -1);
        assert_eq!(nodes.node_at(Point::new(10.0, 1.0)), -1);
        assert_eq!(nodes.node_at(Point::new(4000.0, -10.0)), -1);
    }

    #[test]
    fn process_position_is_idempotent() {
        let nodes = manager();
        let tank = tank(3, Point::new(900.0, -700.0));

        nodes.process_position(&tank);
        nodes.process_position(&tank);
        assert_eq!(tank.node_id(), 5);
        assert_eq!(nodes.registrations(), vec![(5, vec![3])]);

        tank.set_position(Point::new(100.0, -100.0));
        nodes.process_position(&tank);
        assert_eq!(nodes.registrations(), vec![(0, vec![3])]);

        tank.set_position(Point::new(-500.0, 0.0));
        nodes.process_position(&tank);
        assert_eq!(tank.node_id(), -1);
        assert!(nodes.registrations().is_empty());
    }

    #[test]
    fn concurrent_updates_keep_one_registration() {
        let nodes = Arc::new(manager());
        let tank = Arc::new(tank(0, Point::new(100.0, -100.0)));
        nodes.process_position(&tank);

        for _ in 0..500 {
            let barrier = Arc::new(Barrier::new(2));
            let workers: Vec<_> = [100.0, 900.0]
                .into_iter()
                .map(|x| {
                    let (nodes, tank, barrier) = (nodes.clone(), tank.clone(), barrier.clone());
                    thread::spawn(move || {
                        barrier.wait();
                        tank.set_position(Point::new(x, -100.0));
                        nodes.process_position(&tank);
                    })
                })
                .collect();
            for worker in workers {
                worker.join().unwrap();
            }

            let registrations = nodes.registrations();
            assert_eq!(registrations.len(), 1);
            let (node, ids) = &registrations[0];
            assert_eq!(ids, &vec![0]);
            assert_eq!(*node, tank.node_id());
        }
    }

    #[test]
    fn unregister_clears_stale_entries() {
        let nodes = manager();
        let tank = tank(4, Point::new(100.0, -100.0));
        nodes.process_position(&tank);
        tank.set_node_id(9);

        nodes.unregister(&tank);
        assert!(nodes.registrations().is_empty());
        assert_eq!(tank.node_id(), -1);
    }

    #[test]
    fn relevant_players_cover_the_neighborhood() {
        let nodes = manager();
        let near = tank(1, Point::new(10.0, -10.0));
        let diagonal = tank(2, Point::new(1700.0, -1300.0));
        let far = tank(3, Point::new(3000.0, -2500.0));
        for t in [&near, &diagonal, &far] {
            nodes.process_position(t);
        }

        let mut around_five = nodes.relevant_players(5);
        around_five.sort_unstable();
        assert_eq!(around_five, vec![1, 2]);
        assert!(nodes.relevant_players(-1).is_empty());
    }

    #[test]
    fn nearness_wraps_rows() {
        let nodes = manager();
        assert!(nodes.is_near(5, 0));
        assert!(nodes.is_near(5, 10));
        assert!(!nodes.is_near(5, 7));
        // Right edge of row 0 and left edge of row 1
        assert!(nodes.is_near(3, 4));
    }

    proptest! {
        #[test]
        fn positions_inside_the_grid_map_to_valid_nodes(
            x in 0.0f64..(4.0 * NODE_WIDTH),
            y in 0.0f64..(4.0 * NODE_HEIGHT),
        ) {
            let nodes = manager();
            let node = nodes.node_at(Point::new(x, -y));
            prop_assert!((0..16).contains(&node));
        }

        #[test]
        fn positions_outside_the_grid_have_no_node(
            x in 4.0 * NODE_WIDTH..10_000.0f64,
            y in -10_000.0f64..10_000.0,
        ) {
            let nodes = manager();
            prop_assert_eq!(nodes.node_at(Point::new(x, y)), -1);
            prop_assert_eq!(nodes.node_at(Point::new(-x, y)), -1);
        }
    }
}
