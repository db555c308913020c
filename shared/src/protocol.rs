//! Text command catalog carried inside frames.
//!
//! Every payload is a list of space separated tokens. A server frame may stack
//! several events, one per line.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors produced while parsing a payload line
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("empty command")]
    Empty,
    #[error("unknown command {0:?}")]
    UnknownCommand(String),
    #[error("{command}: missing field {field}")]
    MissingField {
        command: &'static str,
        field: &'static str,
    },
    #[error("{command}: invalid value {value:?} for {field}")]
    InvalidField {
        command: &'static str,
        field: &'static str,
        value: String,
    },
}

/// Movement directions and their wire codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Left = 0,
    Right = 1,
    Up = 2,
    Down = 3,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::Left,
        Direction::Right,
        Direction::Up,
        Direction::Down,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.get(code as usize).copied()
    }

    /// Unit offset on the tile grid
    pub fn delta(self) -> (i32, i32) {
        match self {
            Direction::Left => (-1, 0),
            Direction::Right => (1, 0),
            Direction::Up => (0, -1),
            Direction::Down => (0, 1),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Requests sent by a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    /// `JOIN nick`
    Join { nickname: String },
    /// `JOSP health kind nick`, used to rejoin after a teleport
    JoinSpawn {
        health: i32,
        kind: u8,
        nickname: String,
    },
    /// `MOVE dir`
    Move(Direction),
    /// `DROP`
    Drop,
    /// `QUIT`
    Quit,
    /// `MAP`, asks for the server's map path
    Map,
}

impl ClientCommand {
    /// Commands accepted from a connection that has no session yet
    pub fn is_handshake(&self) -> bool {
        matches!(
            self,
            ClientCommand::Join { .. } | ClientCommand::JoinSpawn { .. }
        )
    }
}

impl fmt::Display for ClientCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientCommand::Join { nickname } => write!(f, "JOIN {}", nickname),
            ClientCommand::JoinSpawn {
                health,
                kind,
                nickname,
            } => write!(f, "JOSP {} {} {}", health, kind, nickname),
            ClientCommand::Move(direction) => write!(f, "MOVE {}", direction),
            ClientCommand::Drop => write!(f, "DROP"),
            ClientCommand::Quit => write!(f, "QUIT"),
            ClientCommand::Map => write!(f, "MAP"),
        }
    }
}

impl FromStr for ClientCommand {
    type Err = ProtocolError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut tokens = Tokens::new(line)?;
        let command = match tokens.command {
            "JOIN" => ClientCommand::Join {
                nickname: tokens.rest("JOIN", "nickname")?,
            },
            "JOSP" => ClientCommand::JoinSpawn {
                health: tokens.parse("JOSP", "health")?,
                kind: tokens.parse("JOSP", "kind")?,
                nickname: tokens.rest("JOSP", "nickname")?,
            },
            "MOVE" => ClientCommand::Move(tokens.direction("MOVE")?),
            "DROP" => ClientCommand::Drop,
            "QUIT" => ClientCommand::Quit,
            "MAP" => ClientCommand::Map,
            other => return Err(ProtocolError::UnknownCommand(other.to_string())),
        };
        Ok(command)
    }
}

/// Events sent by the server, either unicast or broadcast
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// `WELC kind health x y mapPath`, completes the handshake
    Welcome {
        kind: u8,
        health: i32,
        x: i32,
        y: i32,
        map: String,
    },
    /// `NEWP nick health kind x y`
    NewPlayer {
        nickname: String,
        health: i32,
        kind: u8,
        x: i32,
        y: i32,
    },
    /// `NEWF kind x y`
    NewFruit { kind: u8, x: i32, y: i32 },
    /// `MOVP nick dir`
    MovePlayer {
        nickname: String,
        direction: Direction,
    },
    /// `DROP nick`
    Drop { nickname: String },
    /// `QUIT nick`
    Quit { nickname: String },
    /// `SERVDROP x y`, a bomb spawned by the server itself
    ServerDrop { x: i32, y: i32 },
    /// `TPSP host port`
    Teleport { host: String, port: u16 },
    /// `MAP path`, answer to a map request
    MapPath(String),
}

impl fmt::Display for ServerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerEvent::Welcome {
                kind,
                health,
                x,
                y,
                map,
            } => write!(f, "WELC {} {} {} {} {}", kind, health, x, y, map),
            ServerEvent::NewPlayer {
                nickname,
                health,
                kind,
                x,
                y,
            } => write!(f, "NEWP {} {} {} {} {}", nickname, health, kind, x, y),
            ServerEvent::NewFruit { kind, x, y } => write!(f, "NEWF {} {} {}", kind, x, y),
            ServerEvent::MovePlayer {
                nickname,
                direction,
            } => write!(f, "MOVP {} {}", nickname, direction),
            ServerEvent::Drop { nickname } => write!(f, "DROP {}", nickname),
            ServerEvent::Quit { nickname } => write!(f, "QUIT {}", nickname),
            ServerEvent::ServerDrop { x, y } => write!(f, "SERVDROP {} {}", x, y),
            ServerEvent::Teleport { host, port } => write!(f, "TPSP {} {}", host, port),
            ServerEvent::MapPath(path) => write!(f, "MAP {}", path),
        }
    }
}

impl FromStr for ServerEvent {
    type Err = ProtocolError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut tokens = Tokens::new(line)?;
        let event = match tokens.command {
            "WELC" => ServerEvent::Welcome {
                kind: tokens.parse("WELC", "kind")?,
                health: tokens.parse("WELC", "health")?,
                x: tokens.parse("WELC", "x")?,
                y: tokens.parse("WELC", "y")?,
                map: tokens.rest("WELC", "map")?,
            },
            "NEWP" => ServerEvent::NewPlayer {
                nickname: tokens.word("NEWP", "nickname")?.to_string(),
                health: tokens.parse("NEWP", "health")?,
                kind: tokens.parse("NEWP", "kind")?,
                x: tokens.parse("NEWP", "x")?,
                y: tokens.parse("NEWP", "y")?,
            },
            "NEWF" => ServerEvent::NewFruit {
                kind: tokens.parse("NEWF", "kind")?,
                x: tokens.parse("NEWF", "x")?,
                y: tokens.parse("NEWF", "y")?,
            },
            "MOVP" => ServerEvent::MovePlayer {
                nickname: tokens.word("MOVP", "nickname")?.to_string(),
                direction: tokens.direction("MOVP")?,
            },
            "DROP" => ServerEvent::Drop {
                nickname: tokens.rest("DROP", "nickname")?,
            },
            "QUIT" => ServerEvent::Quit {
                nickname: tokens.rest("QUIT", "nickname")?,
            },
            "SERVDROP" => ServerEvent::ServerDrop {
                x: tokens.parse("SERVDROP", "x")?,
                y: tokens.parse("SERVDROP", "y")?,
            },
            "TPSP" => ServerEvent::Teleport {
                host: tokens.word("TPSP", "host")?.to_string(),
                port: tokens.parse("TPSP", "port")?,
            },
            "MAP" => ServerEvent::MapPath(tokens.rest("MAP", "path")?),
            other => return Err(ProtocolError::UnknownCommand(other.to_string())),
        };
        Ok(event)
    }
}

/// Iterates the non-empty lines of a frame payload.
pub fn split_events(payload: &str) -> impl Iterator<Item = &str> {
    payload
        .split('\n')
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.trim().is_empty())
}

/// Joins events into one stacked payload.
pub fn stack_events(events: &[ServerEvent]) -> String {
    events
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

struct Tokens<'a> {
    command: &'a str,
    rest: &'a str,
}

impl<'a> Tokens<'a> {
    fn new(line: &'a str) -> Result<Self, ProtocolError> {
        let line = line.trim();
        if line.is_empty() {
            return Err(ProtocolError::Empty);
        }
        let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
        Ok(Self {
            command,
            rest: rest.trim_start(),
        })
    }

    fn word(&mut self, command: &'static str, field: &'static str) -> Result<&'a str, ProtocolError> {
        if self.rest.is_empty() {
            return Err(ProtocolError::MissingField { command, field });
        }
        let (word, rest) = self.rest.split_once(' ').unwrap_or((self.rest, ""));
        self.rest = rest.trim_start();
        Ok(word)
    }

    fn parse<T: FromStr>(&mut self, command: &'static str, field: &'static str) -> Result<T, ProtocolError> {
        let word = self.word(command, field)?;
        word.parse().map_err(|_| ProtocolError::InvalidField {
            command,
            field,
            value: word.to_string(),
        })
    }

    fn direction(&mut self, command: &'static str) -> Result<Direction, ProtocolError> {
        let word = self.word(command, "direction")?;
        word.parse::<u8>()
            .ok()
            .and_then(Direction::from_code)
            .ok_or_else(|| ProtocolError::InvalidField {
                command,
                field: "direction",
                value: word.to_string(),
            })
    }

    /// Remaining text as one field, trimmed of framing artifacts
    fn rest(&mut self, command: &'static str, field: &'static str) -> Result<String, ProtocolError> {
        let rest = self.rest.trim();
        if rest.is_empty() {
            return Err(ProtocolError::MissingField { command, field });
        }
        self.rest = "";
        Ok(rest.to_string())
    }
}
