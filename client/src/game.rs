//! Client-side view of the world: prediction and authoritative updates

use crate::input::KeyboardEvent;
use log::{debug, info, warn};
use shared::{Character, ClientCommand, Direction, GameModel, ServerEvent};

/// Follow-up the network layer has to perform after an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientAction {
    SwitchServer { host: String, port: u16 },
}

/// Everything needed to rejoin another server as the same character
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeleportTicket {
    pub host: String,
    pub port: u16,
    pub health: i32,
    pub kind: u8,
    pub nickname: String,
}

impl TeleportTicket {
    pub fn handshake(&self) -> ClientCommand {
        ClientCommand::JoinSpawn {
            health: self.health,
            kind: self.kind,
            nickname: self.nickname.clone(),
        }
    }
}

pub struct ClientGameState<M: GameModel> {
    model: M,
    nickname: String,
    ready: bool,
}

impl<M: GameModel> ClientGameState<M> {
    pub fn new(model: M, nickname: &str) -> Self {
        Self {
            model,
            nickname: nickname.to_string(),
            ready: false,
        }
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut M {
        &mut self.model
    }

    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    /// Set once `WELC` has been applied
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn local_character(&self) -> Option<&Character> {
        self.model.look(&self.nickname)
    }

    /// Applies a keyboard event locally and returns the request to send.
    ///
    /// Moves and drops are predicted right away; nothing is sent for an event
    /// the local model refuses.
    pub fn predict(&mut self, event: KeyboardEvent) -> Option<ClientCommand> {
        match event {
            KeyboardEvent::Quit => Some(ClientCommand::Quit),
            _ if !self.ready => {
                debug!("Ignoring {:?} before the handshake completed", event);
                None
            }
            KeyboardEvent::Move(direction) => self.predict_move(direction),
            KeyboardEvent::DropBomb => self.predict_drop(),
            KeyboardEvent::RequestMap => Some(ClientCommand::Map),
        }
    }

    pub fn predict_move(&mut self, direction: Direction) -> Option<ClientCommand> {
        self.model.move_character(&self.nickname, direction)?;
        Some(ClientCommand::Move(direction))
    }

    pub fn predict_drop(&mut self) -> Option<ClientCommand> {
        self.model.drop_bomb(&self.nickname)?;
        Some(ClientCommand::Drop)
    }

    /// Authoritative spawn from `WELC`: overwrites the local character and
    /// marks the client ready
    pub fn arrive(&mut self, kind: u8, health: i32, pos: (i32, i32), map: &str) {
        if self.model.mappath() != map || self.model.map().width() == 0 {
            if let Err(e) = self.model.load_map(map) {
                warn!("Unable to load map {}: {}", map, e);
            }
        }

        self.model.quit(&self.nickname);
        self.model.add_character(&self.nickname, true, Some(kind), Some(pos));
        if let Some(character) = self.model.look_mut(&self.nickname) {
            character.health = health;
        }

        self.ready = true;
        info!("Arrived as {} at {:?} on {}", self.nickname, pos, map);
    }

    /// Applies one server event to the local model
    pub fn apply_event(&mut self, event: ServerEvent) -> Option<ClientAction> {
        if let ServerEvent::Welcome {
            kind,
            health,
            x,
            y,
            map,
        } = event
        {
            self.arrive(kind, health, (x, y), &map);
            return None;
        }

        if !self.ready {
            debug!("Dropping {} received before WELC", event);
            return None;
        }

        match event {
            ServerEvent::Welcome { .. } => {}
            ServerEvent::NewPlayer {
                nickname,
                health,
                kind,
                x,
                y,
            } => {
                if nickname == self.nickname {
                    return None;
                }
                self.model.quit(&nickname);
                self.model.add_character(&nickname, false, Some(kind), Some((x, y)));
                if let Some(character) = self.model.look_mut(&nickname) {
                    character.health = health;
                }
            }
            ServerEvent::NewFruit { kind, x, y } => self.model.add_fruit(kind, (x, y)),
            ServerEvent::MovePlayer {
                nickname,
                direction,
            } => {
                // already predicted
                if nickname != self.nickname {
                    self.model.move_character(&nickname, direction);
                }
            }
            ServerEvent::Drop { nickname } => {
                if nickname != self.nickname {
                    self.model.drop_bomb(&nickname);
                }
            }
            ServerEvent::Quit { nickname } => {
                if !self.model.quit(&nickname) {
                    debug!("QUIT for unknown player {}", nickname);
                }
            }
            ServerEvent::ServerDrop { x, y } => self.model.add_bomb((x, y)),
            ServerEvent::Teleport { host, port } => {
                return Some(ClientAction::SwitchServer { host, port });
            }
            ServerEvent::MapPath(path) => {
                info!("Server map is {}", path);
                if path != self.model.mappath() {
                    if let Err(e) = self.model.load_map(&path) {
                        warn!("Unable to load map {}: {}", path, e);
                    }
                }
            }
        }

        None
    }

    /// Snapshot of the local identity for a handoff to `host:port`
    pub fn teleport_ticket(&self, host: &str, port: u16) -> Option<TeleportTicket> {
        let character = self.local_character()?;
        Some(TeleportTicket {
            host: host.to_string(),
            port,
            health: character.health,
            kind: character.kind,
            nickname: self.nickname.clone(),
        })
    }

    /// Forgets the current world before joining another server
    pub fn reset(&mut self) {
        self.model.empty_model();
        self.ready = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{ArenaModel, Map};

    fn ready_state() -> ClientGameState<ArenaModel> {
        let mut model = ArenaModel::with_seed(9);
        model.set_map(Map::parse("/maps/local", "######\n#....#\n#....#\n######\n").unwrap());
        let mut game = ClientGameState::new(model, "alice");
        game.apply_event(ServerEvent::Welcome {
            kind: 1,
            health: 40,
            x: 1,
            y: 1,
            map: "/maps/local".to_string(),
        });
        game
    }

    #[test]
    fn test_welcome_makes_client_ready() {
        let mut game = ClientGameState::new(ArenaModel::with_seed(1), "alice");
        assert!(!game.is_ready());

        let event: ServerEvent = "WELC 0 100 5 5 /maps/arena1".parse().unwrap();
        assert_eq!(game.apply_event(event), None);

        assert!(game.is_ready());
        let character = game.local_character().unwrap();
        assert_eq!(character.kind, 0);
        assert_eq!(character.health, 100);
        assert_eq!(character.pos, (5, 5));
        assert!(character.is_local);
        assert_eq!(game.model().mappath(), "/maps/arena1");
    }

    #[test]
    fn test_events_before_welcome_are_dropped() {
        let mut game = ClientGameState::new(ArenaModel::with_seed(1), "alice");

        game.apply_event(ServerEvent::ServerDrop { x: 2, y: 2 });
        game.apply_event(ServerEvent::NewFruit { kind: 0, x: 1, y: 1 });
        assert_eq!(
            game.apply_event(ServerEvent::Teleport {
                host: "localhost".to_string(),
                port: 1
            }),
            None
        );

        assert!(game.model().bombs().is_empty());
        assert!(game.model().fruits().is_empty());
    }

    #[test]
    fn test_predict_requires_ready() {
        let mut game = ClientGameState::new(ArenaModel::with_seed(1), "alice");
        assert_eq!(game.predict(KeyboardEvent::Move(Direction::Up)), None);
        assert_eq!(game.predict(KeyboardEvent::Quit), Some(ClientCommand::Quit));
    }

    #[test]
    fn test_predicted_move_not_applied_twice() {
        let mut game = ready_state();

        assert_eq!(
            game.predict(KeyboardEvent::Move(Direction::Right)),
            Some(ClientCommand::Move(Direction::Right))
        );
        assert_eq!(game.local_character().unwrap().pos, (2, 1));

        game.apply_event(ServerEvent::MovePlayer {
            nickname: "alice".to_string(),
            direction: Direction::Right,
        });
        assert_eq!(game.local_character().unwrap().pos, (2, 1));
    }

    #[test]
    fn test_predicted_drop_not_applied_twice() {
        let mut game = ready_state();

        assert_eq!(game.predict(KeyboardEvent::DropBomb), Some(ClientCommand::Drop));
        game.apply_event(ServerEvent::Drop {
            nickname: "alice".to_string(),
        });
        assert_eq!(game.model().bombs().len(), 1);
    }

    #[test]
    fn test_blocked_move_is_not_sent() {
        let mut game = ready_state();
        assert_eq!(game.predict(KeyboardEvent::Move(Direction::Up)), None);
        assert_eq!(game.local_character().unwrap().pos, (1, 1));
    }

    #[test]
    fn test_remote_players() {
        let mut game = ready_state();

        game.apply_event("NEWP bob 30 2 3 2".parse().unwrap());
        assert_eq!(game.model().look("bob").unwrap().health, 30);

        game.apply_event("MOVP bob 0".parse().unwrap());
        assert_eq!(game.model().look("bob").unwrap().pos, (2, 2));

        game.apply_event("DROP bob".parse().unwrap());
        assert_eq!(game.model().bombs()[0].pos, (2, 2));

        game.apply_event("QUIT bob".parse().unwrap());
        assert!(game.model().look("bob").is_none());
    }

    #[test]
    fn test_newp_for_self_ignored() {
        let mut game = ready_state();
        game.apply_event("NEWP alice 1 3 4 2".parse().unwrap());
        let character = game.local_character().unwrap();
        assert_eq!(character.health, 40);
        assert_eq!(character.pos, (1, 1));
    }

    #[test]
    fn test_world_events() {
        let mut game = ready_state();
        game.apply_event("NEWF 1 4 2".parse().unwrap());
        game.apply_event("SERVDROP 3 1".parse().unwrap());
        assert_eq!(game.model().fruits().len(), 1);
        assert_eq!(game.model().bombs()[0].pos, (3, 1));
        assert!(game.model().bombs()[0].owner.is_none());
    }

    #[test]
    fn test_teleport_action_and_ticket() {
        let mut game = ready_state();

        let action = game.apply_event("TPSP localhost 7778".parse().unwrap());
        assert_eq!(
            action,
            Some(ClientAction::SwitchServer {
                host: "localhost".to_string(),
                port: 7778
            })
        );

        let ticket = game.teleport_ticket("localhost", 7778).unwrap();
        assert_eq!(ticket.health, 40);
        assert_eq!(ticket.kind, 1);
        assert_eq!(ticket.handshake().to_string(), "JOSP 40 1 alice");
    }

    #[test]
    fn test_reset_empties_world() {
        let mut game = ready_state();
        game.apply_event("NEWF 1 4 2".parse().unwrap());

        game.reset();
        assert!(!game.is_ready());
        assert!(game.local_character().is_none());
        assert!(game.model().fruits().is_empty());
        assert!(game.teleport_ticket("localhost", 1).is_none());
    }
}
