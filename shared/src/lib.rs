pub mod codec;
pub mod map;
pub mod model;
pub mod protocol;

pub use codec::{encode, read_frame, write_frame, FrameError};
pub use map::{Map, MapError, Tile};
pub use model::{ArenaModel, Bomb, Character, Fruit, GameModel, Position};
pub use protocol::{ClientCommand, Direction, ProtocolError, ServerEvent};

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 7777;
