//! Per-connection session lifecycle.
//!
//! The listening socket is the implicit `LISTENING` state; every accepted
//! connection starts `Pending`, becomes `Active` once a `JOIN`/`JOSP` is
//! accepted and ends `Closed`. A closed connection never comes back, the
//! client has to open a new one.

use shared::ClientCommand;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Accepted, no nickname bound yet
    Pending,
    /// Handshake completed
    Active,
    Closed,
}

impl SessionState {
    /// Whether a command may be dispatched in this state.
    ///
    /// Pending connections only take handshakes, active ones take everything
    /// but a second handshake.
    pub fn accepts(self, command: &ClientCommand) -> bool {
        match self {
            SessionState::Pending => command.is_handshake(),
            SessionState::Active => !command.is_handshake(),
            SessionState::Closed => false,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Pending => "PENDING",
            SessionState::Active => "ACTIVE",
            SessionState::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::Direction;

    #[test]
    fn test_pending_accepts_only_handshakes() {
        let state = SessionState::Pending;
        assert!(state.accepts(&ClientCommand::Join {
            nickname: "alice".to_string()
        }));
        assert!(state.accepts(&ClientCommand::JoinSpawn {
            health: 10,
            kind: 1,
            nickname: "alice".to_string()
        }));
        assert!(!state.accepts(&ClientCommand::Move(Direction::Up)));
        assert!(!state.accepts(&ClientCommand::Drop));
        assert!(!state.accepts(&ClientCommand::Quit));
        assert!(!state.accepts(&ClientCommand::Map));
    }

    #[test]
    fn test_active_rejects_second_handshake() {
        let state = SessionState::Active;
        assert!(!state.accepts(&ClientCommand::Join {
            nickname: "alice".to_string()
        }));
        assert!(state.accepts(&ClientCommand::Move(Direction::Left)));
        assert!(state.accepts(&ClientCommand::Quit));
    }

    #[test]
    fn test_closed_accepts_nothing() {
        assert!(!SessionState::Closed.accepts(&ClientCommand::Quit));
        assert_eq!(SessionState::Closed.to_string(), "CLOSED");
    }
}
