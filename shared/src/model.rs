//! Game model consumed by the network layer on both sides.
//!
//! The network code never owns character, fruit or bomb state. It goes through
//! [`GameModel`] only, and [`ArenaModel`] is the in-memory implementation used
//! by the binaries.

use crate::map::{Map, MapError, Tile};
use crate::protocol::Direction;
use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub type Position = (i32, i32);

pub const DEFAULT_HEALTH: i32 = 50;
pub const CHARACTER_KINDS: u8 = 4;
pub const FRUIT_KINDS: u8 = 2;
pub const FRUIT_HEALTH: i32 = 10;
/// Spawn protection given to every new arrival, in milliseconds
pub const IMMUNITY_DURATION: u32 = 3000;
pub const BOMB_COUNTDOWN: u32 = 5000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Character {
    pub nickname: String,
    pub kind: u8,
    pub health: i32,
    pub pos: Position,
    /// Remaining immunity in milliseconds
    pub immunity: u32,
    pub is_local: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fruit {
    pub kind: u8,
    pub pos: Position,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bomb {
    pub pos: Position,
    /// Remaining time before the bomb goes off, in milliseconds
    pub countdown: u32,
    /// Dropping character, `None` for server spawned bombs
    pub owner: Option<String>,
}

/// Accessor contract between the network layer and the game rules
pub trait GameModel {
    /// Adds a character. A missing kind is drawn at random and a missing
    /// position is taken from the map's free tiles. Returns `None` when the
    /// nickname is already present or no free tile exists.
    fn add_character(
        &mut self,
        nickname: &str,
        is_local: bool,
        kind: Option<u8>,
        pos: Option<Position>,
    ) -> Option<Character>;

    /// Moves one tile, returning the new position when the move is allowed
    fn move_character(&mut self, nickname: &str, direction: Direction) -> Option<Position>;

    /// Drops a bomb under the character, returning its position
    fn drop_bomb(&mut self, nickname: &str) -> Option<Position>;

    /// Removes the character; false when the nickname is unknown
    fn quit(&mut self, nickname: &str) -> bool;

    fn look(&self, nickname: &str) -> Option<&Character>;

    fn look_mut(&mut self, nickname: &str) -> Option<&mut Character>;

    fn add_fruit(&mut self, kind: u8, pos: Position);

    /// Records a bomb that did not come from a character
    fn add_bomb(&mut self, pos: Position);

    /// Loads a map. The path is remembered even when loading fails.
    fn load_map(&mut self, path: &str) -> Result<(), MapError>;

    /// Clears characters, fruits and bombs, keeping the map
    fn empty_model(&mut self);

    fn map(&self) -> &Map;

    fn fruits(&self) -> &[Fruit];

    fn bombs(&self) -> &[Bomb];

    fn bombs_mut(&mut self) -> &mut Vec<Bomb>;

    fn mappath(&self) -> &str;

    /// Random free tile from the map
    fn random_position(&mut self) -> Option<Position>;

    /// Advances timers by `dt` milliseconds
    fn tick(&mut self, dt: u32);
}

#[derive(Debug)]
pub struct ArenaModel {
    characters: Vec<Character>,
    fruits: Vec<Fruit>,
    bombs: Vec<Bomb>,
    map: Map,
    mappath: String,
    rng: StdRng,
}

impl ArenaModel {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Deterministic model for tests and replays
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            characters: Vec::new(),
            fruits: Vec::new(),
            bombs: Vec::new(),
            map: Map::empty(),
            mappath: String::new(),
            rng,
        }
    }

    /// Installs an already parsed map
    pub fn set_map(&mut self, map: Map) {
        self.mappath = map.path().to_string();
        self.map = map;
    }

    pub fn characters(&self) -> &[Character] {
        &self.characters
    }

    fn index_of(&self, nickname: &str) -> Option<usize> {
        self.characters.iter().position(|c| c.nickname == nickname)
    }

    fn is_blocked(&self, pos: Position) -> bool {
        match self.map.get_tile(pos.0, pos.1) {
            Some(tile) if tile.is_walkable() => self.bombs.iter().any(|b| b.pos == pos),
            _ => true,
        }
    }
}

impl Default for ArenaModel {
    fn default() -> Self {
        Self::new()
    }
}

impl GameModel for ArenaModel {
    fn add_character(
        &mut self,
        nickname: &str,
        is_local: bool,
        kind: Option<u8>,
        pos: Option<Position>,
    ) -> Option<Character> {
        if self.index_of(nickname).is_some() {
            return None;
        }

        let kind = kind.unwrap_or_else(|| self.rng.gen_range(0..CHARACTER_KINDS));
        let pos = match pos {
            Some(pos) => pos,
            None => self.map.random(&mut self.rng)?,
        };

        let character = Character {
            nickname: nickname.to_string(),
            kind,
            health: DEFAULT_HEALTH,
            pos,
            immunity: IMMUNITY_DURATION,
            is_local,
        };

        info!("Added character {} at {:?}", nickname, pos);
        self.characters.push(character.clone());
        Some(character)
    }

    fn move_character(&mut self, nickname: &str, direction: Direction) -> Option<Position> {
        let idx = self.index_of(nickname)?;
        let (x, y) = self.characters[idx].pos;
        let (dx, dy) = direction.delta();
        let target = (x.checked_add(dx)?, y.checked_add(dy)?);

        if self.is_blocked(target) {
            return None;
        }

        if let Some(fruit) = self.fruits.iter().position(|f| f.pos == target) {
            self.fruits.remove(fruit);
            let health = &mut self.characters[idx].health;
            *health = health.saturating_add(FRUIT_HEALTH);
            debug!("{} ate a fruit at {:?}", nickname, target);
        }

        self.characters[idx].pos = target;
        Some(target)
    }

    fn drop_bomb(&mut self, nickname: &str) -> Option<Position> {
        let pos = self.look(nickname)?.pos;
        if self.bombs.iter().any(|b| b.pos == pos) {
            return None;
        }

        self.bombs.push(Bomb {
            pos,
            countdown: BOMB_COUNTDOWN,
            owner: Some(nickname.to_string()),
        });
        Some(pos)
    }

    fn quit(&mut self, nickname: &str) -> bool {
        match self.index_of(nickname) {
            Some(idx) => {
                self.characters.remove(idx);
                info!("Removed character {}", nickname);
                true
            }
            None => false,
        }
    }

    fn look(&self, nickname: &str) -> Option<&Character> {
        self.characters.iter().find(|c| c.nickname == nickname)
    }

    fn look_mut(&mut self, nickname: &str) -> Option<&mut Character> {
        self.characters.iter_mut().find(|c| c.nickname == nickname)
    }

    fn add_fruit(&mut self, kind: u8, pos: Position) {
        self.fruits.push(Fruit { kind, pos });
    }

    fn add_bomb(&mut self, pos: Position) {
        self.bombs.push(Bomb {
            pos,
            countdown: BOMB_COUNTDOWN,
            owner: None,
        });
    }

    fn load_map(&mut self, path: &str) -> Result<(), MapError> {
        self.mappath = path.to_string();
        self.map = Map::load(path)?;
        info!("Loaded map {} ({}x{})", path, self.map.width(), self.map.height());
        Ok(())
    }

    fn empty_model(&mut self) {
        self.characters.clear();
        self.fruits.clear();
        self.bombs.clear();
    }

    fn map(&self) -> &Map {
        &self.map
    }

    fn fruits(&self) -> &[Fruit] {
        &self.fruits
    }

    fn bombs(&self) -> &[Bomb] {
        &self.bombs
    }

    fn bombs_mut(&mut self) -> &mut Vec<Bomb> {
        &mut self.bombs
    }

    fn mappath(&self) -> &str {
        &self.mappath
    }

    fn random_position(&mut self) -> Option<Position> {
        self.map.random(&mut self.rng)
    }

    fn tick(&mut self, dt: u32) {
        for character in &mut self.characters {
            character.immunity = character.immunity.saturating_sub(dt);
        }

        for bomb in &mut self.bombs {
            bomb.countdown = bomb.countdown.saturating_sub(dt);
        }
        self.bombs.retain(|b| b.countdown > 0);
    }
}

/// Whether `pos` holds a teleporter tile
pub fn is_teleporter(model: &impl GameModel, pos: Position) -> bool {
    model.map().get_tile(pos.0, pos.1) == Some(Tile::Teleporter)
}
