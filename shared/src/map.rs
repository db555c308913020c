//! Tile grid loaded from a plain text map file.
//!
//! One character per tile: `#` wall, `~` bush, `T` teleporter, `.` or a space
//! for free ground. Short lines are padded with walls.

use rand::seq::SliceRandom;
use rand::Rng;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MapError {
    #[error("unable to read map {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("map {0} has no tiles")]
    Empty(String),
    #[error("unknown tile {tile:?} at line {line}, column {column}")]
    UnknownTile {
        tile: char,
        line: usize,
        column: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tile {
    Free,
    Wall,
    Bush,
    Teleporter,
}

impl Tile {
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            '.' | ' ' => Some(Tile::Free),
            '#' => Some(Tile::Wall),
            '~' => Some(Tile::Bush),
            'T' => Some(Tile::Teleporter),
            _ => None,
        }
    }

    pub fn is_walkable(self) -> bool {
        !matches!(self, Tile::Wall)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Map {
    path: String,
    width: usize,
    height: usize,
    tiles: Vec<Tile>,
}

impl Map {
    /// A map with no tiles, used before any map is loaded
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, MapError> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let text = std::fs::read_to_string(path).map_err(|source| MapError::Io {
            path: display.clone(),
            source,
        })?;
        Self::parse(&display, &text)
    }

    pub fn parse(path: &str, text: &str) -> Result<Self, MapError> {
        let lines: Vec<&str> = text
            .lines()
            .map(|line| line.trim_end_matches('\r'))
            .filter(|line| !line.is_empty())
            .collect();

        let width = lines.iter().map(|line| line.chars().count()).max().unwrap_or(0);
        if width == 0 {
            return Err(MapError::Empty(path.to_string()));
        }

        let mut tiles = Vec::with_capacity(width * lines.len());
        for (line_idx, line) in lines.iter().enumerate() {
            let mut count = 0;
            for (column, c) in line.chars().enumerate() {
                let tile = Tile::from_char(c).ok_or(MapError::UnknownTile {
                    tile: c,
                    line: line_idx + 1,
                    column: column + 1,
                })?;
                tiles.push(tile);
                count += 1;
            }
            tiles.extend(std::iter::repeat(Tile::Wall).take(width - count));
        }

        Ok(Self {
            path: path.to_string(),
            width,
            height: lines.len(),
            tiles,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Tile at `(x, y)`, or `None` outside the grid
    pub fn get_tile(&self, x: i32, y: i32) -> Option<Tile> {
        if x < 0 || y < 0 {
            return None;
        }
        let (x, y) = (x as usize, y as usize);
        if x >= self.width || y >= self.height {
            return None;
        }
        self.tiles.get(y * self.width + x).copied()
    }

    pub fn free_tiles(&self) -> impl Iterator<Item = (i32, i32)> + '_ {
        self.tiles
            .iter()
            .enumerate()
            .filter(|(_, tile)| **tile == Tile::Free)
            .map(move |(idx, _)| ((idx % self.width) as i32, (idx / self.width) as i32))
    }

    /// Picks a random free tile. `None` when the map has no free ground.
    pub fn random<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<(i32, i32)> {
        let free: Vec<(i32, i32)> = self.free_tiles().collect();
        free.choose(rng).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const ARENA: &str = "#####\n#..T#\n#~#.#\n#####\n";

    #[test]
    fn test_parse_map() {
        let map = Map::parse("arena", ARENA).unwrap();
        assert_eq!(map.width(), 5);
        assert_eq!(map.height(), 4);
        assert_eq!(map.path(), "arena");
        assert_eq!(map.get_tile(0, 0), Some(Tile::Wall));
        assert_eq!(map.get_tile(1, 1), Some(Tile::Free));
        assert_eq!(map.get_tile(3, 1), Some(Tile::Teleporter));
        assert_eq!(map.get_tile(1, 2), Some(Tile::Bush));
    }

    #[test]
    fn test_get_tile_out_of_bounds() {
        let map = Map::parse("arena", ARENA).unwrap();
        assert_eq!(map.get_tile(-1, 0), None);
        assert_eq!(map.get_tile(0, -1), None);
        assert_eq!(map.get_tile(5, 0), None);
        assert_eq!(map.get_tile(0, 4), None);
    }

    #[test]
    fn test_short_lines_padded_with_walls() {
        let map = Map::parse("ragged", "...\n.\n").unwrap();
        assert_eq!(map.width(), 3);
        assert_eq!(map.get_tile(2, 1), Some(Tile::Wall));
    }

    #[test]
    fn test_parse_rejects_unknown_tile() {
        let err = Map::parse("bad", "..x\n").unwrap_err();
        assert!(matches!(
            err,
            MapError::UnknownTile {
                tile: 'x',
                line: 1,
                column: 3
            }
        ));
    }

    #[test]
    fn test_parse_rejects_empty_map() {
        assert!(matches!(Map::parse("none", "\n\n"), Err(MapError::Empty(_))));
    }

    #[test]
    fn test_load_missing_file() {
        let err = Map::load("/definitely/not/a/map").unwrap_err();
        assert!(matches!(err, MapError::Io { .. }));
    }

    #[test]
    fn test_random_only_returns_free_tiles() {
        let map = Map::parse("arena", ARENA).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let (x, y) = map.random(&mut rng).unwrap();
            assert_eq!(map.get_tile(x, y), Some(Tile::Free));
        }
    }

    #[test]
    fn test_random_without_free_tiles() {
        let map = Map::parse("walls", "###\n").unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(map.random(&mut rng), None);
        assert_eq!(Map::empty().random(&mut rng), None);
    }
}
