//! Server-side protocol dispatcher
//!
//! Turns inbound command lines into model mutations and outbound messages.
//! It performs no I/O: every call returns the [`GameMessage`]s the network
//! layer has to deliver, in order.

use crate::registry::{ConnectionId, ConnectionRegistry};
use log::{debug, info, warn};
use rand::Rng;
use shared::model::{is_teleporter, CHARACTER_KINDS};
use shared::protocol::{split_events, stack_events};
use shared::{ClientCommand, Direction, GameModel, ServerEvent};

/// Messages produced by the dispatcher for the network layer
#[derive(Debug, Clone, PartialEq)]
pub enum GameMessage {
    SendPacket {
        to: ConnectionId,
        payload: String,
    },
    /// Sent to every active session except `exclude`
    BroadcastPacket {
        payload: String,
        exclude: Option<ConnectionId>,
    },
    /// The connection has been unregistered and must be closed
    Disconnect { id: ConnectionId },
}

/// Address handed to clients stepping on a teleporter tile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeleportTarget {
    pub host: String,
    pub port: u16,
}

pub struct Dispatcher<M: GameModel> {
    model: M,
    registry: ConnectionRegistry,
    teleport: Option<TeleportTarget>,
}

impl<M: GameModel> Dispatcher<M> {
    pub fn new(model: M, registry: ConnectionRegistry, teleport: Option<TeleportTarget>) -> Self {
        Self {
            model,
            registry,
            teleport,
        }
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut M {
        &mut self.model
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ConnectionRegistry {
        &mut self.registry
    }

    /// Dispatches every command line of one inbound frame.
    ///
    /// Unknown commands and commands not allowed in the connection's current
    /// state are ignored without answering the client.
    pub fn handle_frame(&mut self, id: ConnectionId, payload: &str) -> Vec<GameMessage> {
        let mut out = Vec::new();

        for line in split_events(payload) {
            let command = match line.parse::<ClientCommand>() {
                Ok(command) => command,
                Err(e) => {
                    debug!("Ignoring {:?} from {}: {}", line, id, e);
                    continue;
                }
            };

            match self.registry.state_of(id) {
                Some(state) if state.accepts(&command) => self.handle_command(id, command, &mut out),
                Some(state) => debug!("Ignoring {} from {} in state {}", command, id, state),
                None => debug!("Ignoring {} from unregistered connection {}", command, id),
            }
        }

        out
    }

    fn handle_command(&mut self, id: ConnectionId, command: ClientCommand, out: &mut Vec<GameMessage>) {
        match command {
            ClientCommand::Join { nickname } => self.join(id, &nickname, None, out),
            ClientCommand::JoinSpawn {
                health,
                kind,
                nickname,
            } => self.join(id, &nickname, Some((health, kind)), out),
            ClientCommand::Move(direction) => self.move_player(id, direction, out),
            ClientCommand::Drop => self.drop_bomb(id, out),
            ClientCommand::Quit => out.extend(self.kill_user(id)),
            ClientCommand::Map => out.push(GameMessage::SendPacket {
                to: id,
                payload: ServerEvent::MapPath(self.model.mappath().to_string()).to_string(),
            }),
        }
    }

    fn join(
        &mut self,
        id: ConnectionId,
        nickname: &str,
        spawn: Option<(i32, u8)>,
        out: &mut Vec<GameMessage>,
    ) {
        if nickname.is_empty() || nickname.chars().any(char::is_whitespace) {
            warn!("Rejecting malformed nickname {:?} from {}", nickname, id);
            return;
        }
        if let Some((health, kind)) = spawn {
            if health <= 0 || kind >= CHARACTER_KINDS {
                warn!("Rejecting JOSP {} {} {} from {}", health, kind, nickname, id);
                return;
            }
        }
        if self.registry.is_nickname_taken(nickname, id) || self.model.look(nickname).is_some() {
            warn!("Nickname {} is already in use, ignoring join from {}", nickname, id);
            return;
        }

        let kind = spawn.map(|(_, kind)| kind);
        let Some(mut character) = self.model.add_character(nickname, false, kind, None) else {
            warn!("No room to spawn {} on map {}", nickname, self.model.mappath());
            return;
        };
        if let Some((health, _)) = spawn {
            if let Some(spawned) = self.model.look_mut(nickname) {
                spawned.health = health;
            }
            character.health = health;
        }

        self.registry.bind(id, nickname);

        out.push(GameMessage::BroadcastPacket {
            payload: ServerEvent::NewPlayer {
                nickname: nickname.to_string(),
                health: character.health,
                kind: character.kind,
                x: character.pos.0,
                y: character.pos.1,
            }
            .to_string(),
            exclude: Some(id),
        });

        out.push(GameMessage::SendPacket {
            to: id,
            payload: ServerEvent::Welcome {
                kind: character.kind,
                health: character.health,
                x: character.pos.0,
                y: character.pos.1,
                map: self.model.mappath().to_string(),
            }
            .to_string(),
        });

        let catch_up = self.update_state(id);
        if !catch_up.is_empty() {
            out.push(GameMessage::SendPacket {
                to: id,
                payload: stack_events(&catch_up),
            });
        }

        info!("{} joined as {}", id, nickname);
    }

    /// World snapshot replayed to a newly active session.
    ///
    /// One `NEWP` per other active nickname and one `NEWF` per live fruit.
    /// Bombs are not replayed, newcomers get spawn immunity instead.
    pub fn update_state(&self, id: ConnectionId) -> Vec<ServerEvent> {
        let mut events = Vec::new();

        for (other, nickname) in self.registry.active_sessions() {
            if other == id {
                continue;
            }
            if let Some(character) = self.model.look(nickname) {
                events.push(ServerEvent::NewPlayer {
                    nickname: nickname.to_string(),
                    health: character.health,
                    kind: character.kind,
                    x: character.pos.0,
                    y: character.pos.1,
                });
            }
        }

        for fruit in self.model.fruits() {
            events.push(ServerEvent::NewFruit {
                kind: fruit.kind,
                x: fruit.pos.0,
                y: fruit.pos.1,
            });
        }

        events
    }

    fn move_player(&mut self, id: ConnectionId, direction: Direction, out: &mut Vec<GameMessage>) {
        let Some(nickname) = self.registry.nickname_of(id).map(str::to_string) else {
            return;
        };

        let Some(pos) = self.model.move_character(&nickname, direction) else {
            debug!("Move {:?} of {} rejected by the model", direction, nickname);
            return;
        };

        out.push(GameMessage::BroadcastPacket {
            payload: ServerEvent::MovePlayer {
                nickname: nickname.clone(),
                direction,
            }
            .to_string(),
            exclude: Some(id),
        });

        if is_teleporter(&self.model, pos) {
            if let Some(target) = &self.teleport {
                info!("{} stepped on a teleporter, sending to {}:{}", nickname, target.host, target.port);
                out.push(GameMessage::SendPacket {
                    to: id,
                    payload: ServerEvent::Teleport {
                        host: target.host.clone(),
                        port: target.port,
                    }
                    .to_string(),
                });
            }
        }
    }

    fn drop_bomb(&mut self, id: ConnectionId, out: &mut Vec<GameMessage>) {
        let Some(nickname) = self.registry.nickname_of(id).map(str::to_string) else {
            return;
        };

        if self.model.drop_bomb(&nickname).is_some() {
            out.push(GameMessage::BroadcastPacket {
                payload: ServerEvent::Drop { nickname }.to_string(),
                exclude: Some(id),
            });
        }
    }

    /// Tears a connection down after `QUIT`, end of stream or a read error.
    ///
    /// `QUIT nick` is broadcast only when the model confirms the removal.
    /// The connection is unregistered in every case.
    pub fn kill_user(&mut self, id: ConnectionId) -> Vec<GameMessage> {
        let mut out = Vec::new();

        if let Some(nickname) = self.registry.nickname_of(id).map(str::to_string) {
            if self.model.quit(&nickname) {
                out.push(GameMessage::BroadcastPacket {
                    payload: ServerEvent::Quit {
                        nickname: nickname.clone(),
                    }
                    .to_string(),
                    exclude: Some(id),
                });
            } else {
                debug!("Model had no character named {}", nickname);
            }
            info!("{} ({}) left", nickname, id);
        }

        if self.registry.unregister(id).is_some() {
            out.push(GameMessage::Disconnect { id });
        }

        out
    }

    /// Injects a server bomb with the given per-tick probability
    pub fn maybe_spawn_bomb<R: Rng + ?Sized>(&mut self, rng: &mut R, probability: f64) -> Vec<GameMessage> {
        // NaN would make gen_bool panic
        let probability = if probability.is_finite() {
            probability.clamp(0.0, 1.0)
        } else {
            0.0
        };
        if !rng.gen_bool(probability) {
            return Vec::new();
        }

        let Some((x, y)) = self.model.random_position() else {
            return Vec::new();
        };
        self.model.add_bomb((x, y));
        debug!("Server bomb spawned at ({}, {})", x, y);

        vec![GameMessage::BroadcastPacket {
            payload: ServerEvent::ServerDrop { x, y }.to_string(),
            exclude: None,
        }]
    }
}
