//! Tile map model and its binary `.vtmap` codec
//!
//! Layout (little-endian):
//! - 1 byte format version
//! - title, terminated by `\n`
//! - width and height as 4-byte integers
//! - one byte per supported game mode, terminated by `\n`
//! - `width * height` tiles of 12 bytes each, row-major

use std::fmt;
use std::path::Path;

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use super::Point;

pub const FORMAT_VERSION: u8 = 1;
pub const TILE_BYTE_SIZE: usize = 12;
pub const MAP_EXTENSION: &str = "vtmap";

/// Tile event markers
pub mod events {
    pub const SPAWN_POINT: u16 = 1;
    pub const RED_SPAWN_AREA: u16 = 2;
    pub const BLUE_SPAWN_AREA: u16 = 3;
    pub const RED_FLAG: u16 = 4;
    pub const BLUE_FLAG: u16 = 5;
    pub const UTILITY: u16 = 7;
    pub const BASE_BLUE_1: u16 = 8;
    pub const BASE_BLUE_2: u16 = 9;
    pub const BASE_BLUE_3: u16 = 10;
    pub const BASE_RED_1: u16 = 11;
    pub const BASE_RED_2: u16 = 12;
    pub const BASE_RED_3: u16 = 13;

    pub const BASES: [u16; 6] = [
        BASE_BLUE_1,
        BASE_BLUE_2,
        BASE_BLUE_3,
        BASE_RED_1,
        BASE_RED_2,
        BASE_RED_3,
    ];
}

/// Game modes a map can declare support for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum GameMode {
    Deathmatch = 0,
    TeamDeathmatch = 1,
    CaptureTheFlag = 2,
    CaptureTheBase = 3,
}

impl GameMode {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Deathmatch),
            1 => Some(Self::TeamDeathmatch),
            2 => Some(Self::CaptureTheFlag),
            3 => Some(Self::CaptureTheBase),
            _ => None,
        }
    }

    /// Modes played in teams
    pub fn is_team_based(self) -> bool {
        !matches!(self, Self::Deathmatch)
    }
}

impl fmt::Display for GameMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Deathmatch => "Deathmatch",
            Self::TeamDeathmatch => "Team Deathmatch",
            Self::CaptureTheFlag => "Capture the Flag",
            Self::CaptureTheBase => "Capture the Base",
        };
        f.write_str(name)
    }
}

/// A single map cell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tile {
    pub tile_id: i32,
    pub object_id: u16,
    pub event_id: u16,
    pub passable: bool,
    /// Wall height in tiles; arc projectiles collide below it
    pub height: u8,
    pub tile_type: u8,
    pub effect: u8,
}

impl Default for Tile {
    fn default() -> Self {
        Self {
            tile_id: 0,
            object_id: 0,
            event_id: 0,
            passable: true,
            height: 0,
            tile_type: 0,
            effect: 0,
        }
    }
}

impl Tile {
    fn decode(buf: &mut &[u8]) -> Self {
        Self {
            tile_id: buf.get_i32_le(),
            object_id: buf.get_u16_le(),
            event_id: buf.get_u16_le(),
            passable: buf.get_u8() != 0,
            height: buf.get_u8(),
            tile_type: buf.get_u8(),
            effect: buf.get_u8(),
        }
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_i32_le(self.tile_id);
        buf.put_u16_le(self.object_id);
        buf.put_u16_le(self.event_id);
        buf.put_u8(u8::from(self.passable));
        buf.put_u8(self.height);
        buf.put_u8(self.tile_type);
        buf.put_u8(self.effect);
    }
}

/// Map loading and editing errors
#[derive(Debug, thiserror::Error)]
pub enum MapError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Map is the wrong version ({0})")]
    WrongVersion(u8),

    #[error("Map data ended early")]
    Truncated,

    #[error("Map title is not valid UTF-8")]
    InvalidTitle,

    #[error("Map size cannot have a width or height less than or equal to 0")]
    InvalidDimensions,

    #[error("Unknown game mode byte {0}")]
    UnknownGameMode(u8),

    #[error("Tile ({x}, {y}) is out of bounds")]
    OutOfBounds { x: i32, y: i32 },
}

/// Rectangular tile grid plus metadata
#[derive(Debug, Clone, PartialEq)]
pub struct Map {
    version: u8,
    title: String,
    width: i32,
    height: i32,
    supported_modes: Vec<GameMode>,
    tiles: Vec<Tile>,
}

impl Map {
    /// Build an empty map with every tile passable
    pub fn create(width: i32, height: i32, title: &str) -> Result<Self, MapError> {
        if width <= 0 || height <= 0 {
            return Err(MapError::InvalidDimensions);
        }

        Ok(Self {
            version: FORMAT_VERSION,
            title: title.to_string(),
            width,
            height,
            supported_modes: Vec::new(),
            tiles: vec![Tile::default(); (width * height) as usize],
        })
    }

    /// Read a map file; the `.vtmap` extension is appended when missing
    pub fn load(path: impl AsRef<Path>) -> Result<Self, MapError> {
        let path = with_extension(path.as_ref());
        let data = std::fs::read(path)?;
        Self::from_bytes(&data)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), MapError> {
        let path = with_extension(path.as_ref());
        std::fs::write(path, self.to_bytes())?;
        Ok(())
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, MapError> {
        let mut buf = data;

        if !buf.has_remaining() {
            return Err(MapError::Truncated);
        }
        let version = buf.get_u8();
        if version != FORMAT_VERSION {
            return Err(MapError::WrongVersion(version));
        }

        let title = read_line(&mut buf)?;
        let title = String::from_utf8(title.to_vec()).map_err(|_| MapError::InvalidTitle)?;

        if buf.remaining() < 8 {
            return Err(MapError::Truncated);
        }
        let width = buf.get_i32_le();
        let height = buf.get_i32_le();

        let supported_modes = read_line(&mut buf)?
            .iter()
            .map(|&b| GameMode::from_byte(b).ok_or(MapError::UnknownGameMode(b)))
            .collect::<Result<Vec<_>, _>>()?;

        if width <= 0 || height <= 0 {
            return Err(MapError::InvalidDimensions);
        }

        let count = (width as usize) * (height as usize);
        if buf.remaining() < count * TILE_BYTE_SIZE {
            return Err(MapError::Truncated);
        }

        let tiles = (0..count).map(|_| Tile::decode(&mut buf)).collect();

        Ok(Self {
            version,
            title,
            width,
            height,
            supported_modes,
            tiles,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(
            self.title.len() + 12 + self.supported_modes.len() + self.tiles.len() * TILE_BYTE_SIZE,
        );

        buf.put_u8(self.version);
        buf.put_slice(self.title.as_bytes());
        buf.put_u8(b'\n');
        buf.put_i32_le(self.width);
        buf.put_i32_le(self.height);
        for mode in &self.supported_modes {
            buf.put_u8(*mode as u8);
        }
        buf.put_u8(b'\n');
        for tile in &self.tiles {
            tile.encode(&mut buf);
        }

        buf.to_vec()
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn supported_modes(&self) -> &[GameMode] {
        &self.supported_modes
    }

    pub fn supports(&self, mode: GameMode) -> bool {
        self.supported_modes.contains(&mode)
    }

    pub fn set_supported_modes(&mut self, modes: Vec<GameMode>) {
        self.supported_modes = modes;
    }

    pub fn in_bounds(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && x < self.width && y < self.height
    }

    /// Tile at grid coordinates, `None` when out of bounds
    pub fn tile(&self, x: i32, y: i32) -> Option<&Tile> {
        if !self.in_bounds(x, y) {
            return None;
        }
        self.tiles.get((y * self.width + x) as usize)
    }

    pub fn set_tile(&mut self, x: i32, y: i32, tile: Tile) -> Result<(), MapError> {
        if !self.in_bounds(x, y) {
            return Err(MapError::OutOfBounds { x, y });
        }
        self.tiles[(y * self.width + x) as usize] = tile;
        Ok(())
    }

    pub fn set_tile_event(&mut self, x: i32, y: i32, event_id: u16) -> Result<(), MapError> {
        let mut tile = *self.tile(x, y).ok_or(MapError::OutOfBounds { x, y })?;
        tile.event_id = event_id;
        self.set_tile(x, y, tile)
    }

    pub fn set_tile_passable(&mut self, x: i32, y: i32, passable: bool) -> Result<(), MapError> {
        let mut tile = *self.tile(x, y).ok_or(MapError::OutOfBounds { x, y })?;
        tile.passable = passable;
        self.set_tile(x, y, tile)
    }

    pub fn set_tile_height(&mut self, x: i32, y: i32, height: u8) -> Result<(), MapError> {
        let mut tile = *self.tile(x, y).ok_or(MapError::OutOfBounds { x, y })?;
        tile.height = height;
        self.set_tile(x, y, tile)
    }

    /// Resize the grid, keeping the overlapping region; new tiles are passable
    pub fn resize(&mut self, width: i32, height: i32) -> Result<(), MapError> {
        if width <= 0 || height <= 0 {
            return Err(MapError::InvalidDimensions);
        }

        let mut tiles = vec![Tile::default(); (width * height) as usize];
        for y in 0..height.min(self.height) {
            for x in 0..width.min(self.width) {
                tiles[(y * width + x) as usize] = self.tiles[(y * self.width + x) as usize];
            }
        }

        self.tiles = tiles;
        self.width = width;
        self.height = height;
        Ok(())
    }

    /// Iterate `(x, y, tile)` in row-major order
    pub fn tiles(&self) -> impl Iterator<Item = (i32, i32, &Tile)> + '_ {
        self.tiles.iter().enumerate().map(move |(i, tile)| {
            let i = i as i32;
            (i % self.width, i / self.width, tile)
        })
    }

    /// Centers of every tile carrying `event_id`
    pub fn event_positions(&self, event_id: u16) -> Vec<Point> {
        self.tiles()
            .filter(|(_, _, tile)| tile.event_id == event_id)
            .map(|(x, y, _)| Point::tile_center(x, y))
            .collect()
    }

    fn count_events(&self, event_id: u16) -> usize {
        self.tiles.iter().filter(|t| t.event_id == event_id).count()
    }

    pub fn validate_death_match(&self) -> bool {
        self.count_events(events::SPAWN_POINT) > 0
    }

    pub fn validate_team_death_match(&self) -> bool {
        self.count_events(events::RED_SPAWN_AREA) > 0
            && self.count_events(events::BLUE_SPAWN_AREA) > 0
    }

    pub fn validate_capture_the_flag(&self) -> bool {
        self.validate_team_death_match()
            && self.count_events(events::RED_FLAG) == 1
            && self.count_events(events::BLUE_FLAG) == 1
    }

    /// Exactly one marker for each of the six bases
    pub fn validate_capture_the_base(&self) -> bool {
        events::BASES
            .iter()
            .all(|&event| self.count_events(event) == 1)
    }

    pub fn validate_mode(&self, mode: GameMode) -> bool {
        match mode {
            GameMode::Deathmatch => self.validate_death_match(),
            GameMode::TeamDeathmatch => self.validate_team_death_match(),
            GameMode::CaptureTheFlag => self.validate_capture_the_flag(),
            GameMode::CaptureTheBase => self.validate_capture_the_base(),
        }
    }

    /// Every declared mode has the markers it needs
    pub fn validate_supported_game_modes(&self) -> bool {
        self.supported_modes.iter().all(|&mode| self.validate_mode(mode))
    }

    /// A map is playable when it declares at least one mode
    pub fn is_legal(&self) -> bool {
        !self.supported_modes.is_empty()
    }
}

fn with_extension(path: &Path) -> std::path::PathBuf {
    if path.extension().and_then(|e| e.to_str()) == Some(MAP_EXTENSION) {
        path.to_path_buf()
    } else {
        let mut name = path.as_os_str().to_owned();
        name.push(".");
        name.push(MAP_EXTENSION);
        name.into()
    }
}

/// Split off bytes up to the next `\n`, consuming the newline
fn read_line<'a>(buf: &mut &'a [u8]) -> Result<&'a [u8], MapError> {
    let data: &'a [u8] = buf;
    let end = data
        .iter()
        .position(|&b| b == b'\n')
        .ok_or(MapError::Truncated)?;
    let line = &data[..end];
    *buf = &data[end + 1..];
    Ok(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn spawn_map() -> Map {
        let mut map = Map::create(5, 5, "arena").unwrap();
        map.set_tile_event(1, 1, events::SPAWN_POINT).unwrap();
        map.set_supported_modes(vec![GameMode::Deathmatch]);
        map
    }

    #[test]
    fn create_rejects_empty_maps() {
        assert!(matches!(
            Map::create(0, 5, "x"),
            Err(MapError::InvalidDimensions)
        ));
        let map = Map::create(3, 2, "x").unwrap();
        assert!(map.tiles().all(|(_, _, t)| t.passable));
        assert_eq!(map.tiles().count(), 6);
    }

    #[test]
    fn death_match_needs_a_spawn_point() {
        let mut map = spawn_map();
        assert!(map.validate_death_match());

        map.set_tile_event(1, 1, 0).unwrap();
        assert!(!map.validate_death_match());
    }

    #[test]
    fn capture_the_base_needs_exactly_one_of_each_base() {
        let mut map = Map::create(10, 10, "bases").unwrap();
        for (i, event) in events::BASES.iter().enumerate() {
            map.set_tile_event(i as i32, 0, *event).unwrap();
        }
        assert!(map.validate_capture_the_base());

        map.set_tile_event(9, 9, events::BASE_RED_2).unwrap();
        assert!(!map.validate_capture_the_base());
    }

    #[test]
    fn capture_the_flag_builds_on_team_spawns() {
        let mut map = Map::create(6, 6, "flags").unwrap();
        map.set_tile_event(0, 0, events::RED_FLAG).unwrap();
        map.set_tile_event(5, 5, events::BLUE_FLAG).unwrap();
        assert!(!map.validate_capture_the_flag());

        map.set_tile_event(0, 1, events::RED_SPAWN_AREA).unwrap();
        map.set_tile_event(5, 4, events::BLUE_SPAWN_AREA).unwrap();
        assert!(map.validate_capture_the_flag());

        map.set_supported_modes(vec![GameMode::CaptureTheFlag, GameMode::Deathmatch]);
        assert!(!map.validate_supported_game_modes());
    }

    #[test]
    fn header_layout_is_stable() {
        let map = spawn_map();
        let bytes = map.to_bytes();
        assert_eq!(bytes[0], FORMAT_VERSION);
        assert_eq!(&bytes[1..7], b"arena\n");
        assert_eq!(&bytes[7..11], &5i32.to_le_bytes());
        assert_eq!(&bytes[11..15], &5i32.to_le_bytes());
        assert_eq!(&bytes[15..17], &[0u8, b'\n']);
        assert_eq!(bytes.len(), 17 + 25 * TILE_BYTE_SIZE);

        // Tile (1, 1) is the 7th record
        let tile = &bytes[17 + 6 * TILE_BYTE_SIZE..17 + 7 * TILE_BYTE_SIZE];
        assert_eq!(&tile[6..8], &events::SPAWN_POINT.to_le_bytes());
        assert_eq!(tile[8], 1);
    }

    #[test]
    fn rejects_bad_data() {
        let mut bytes = spawn_map().to_bytes();
        bytes[0] = 2;
        assert!(matches!(Map::from_bytes(&bytes), Err(MapError::WrongVersion(2))));

        let bytes = spawn_map().to_bytes();
        assert!(matches!(
            Map::from_bytes(&bytes[..bytes.len() - 1]),
            Err(MapError::Truncated)
        ));
    }

    #[test]
    fn resize_keeps_overlap() {
        let mut map = spawn_map();
        map.resize(2, 8).unwrap();
        assert_eq!(map.tile(1, 1).unwrap().event_id, events::SPAWN_POINT);
        assert!(map.tile(1, 7).unwrap().passable);
        assert!(map.tile(2, 1).is_none());
    }

    #[test]
    fn save_and_load_file() {
        let dir = std::env::temp_dir().join(format!("vtmap-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("arena");

        let map = spawn_map();
        map.save(&path).unwrap();
        let loaded = Map::load(dir.join("arena.vtmap")).unwrap();
        assert_eq!(loaded, map);

        std::fs::remove_dir_all(dir).unwrap();
    }

    fn arb_tile() -> impl Strategy<Value = Tile> {
        (any::<i32>(), any::<u16>(), any::<u16>(), any::<bool>(), any::<u8>(), any::<u8>(), any::<u8>())
            .prop_map(|(tile_id, object_id, event_id, passable, height, tile_type, effect)| Tile {
                tile_id,
                object_id,
                event_id,
                passable,
                height,
                tile_type,
                effect,
            })
    }

    proptest! {
        #[test]
        fn saved_tiles_are_byte_identical(
            (width, height, tiles) in (1i32..8, 1i32..8).prop_flat_map(|(w, h)| {
                (Just(w), Just(h), proptest::collection::vec(arb_tile(), (w * h) as usize))
            })
        ) {
            let mut map = Map::create(width, height, "prop").unwrap();
            for (i, tile) in tiles.into_iter().enumerate() {
                let i = i as i32;
                map.set_tile(i % width, i / width, tile).unwrap();
            }

            let bytes = map.to_bytes();
            let reloaded = Map::from_bytes(&bytes).unwrap();
            prop_assert_eq!(reloaded.to_bytes(), bytes);
        }
    }
}
