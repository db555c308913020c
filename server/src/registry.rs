//! Connection registry for the arena server
//!
//! This module tracks every live connection and the nickname bound to it:
//! - Opaque connection handles assigned at accept time
//! - UID (`remoteAddress:remotePort`) for each connection
//! - UID to nickname bindings once the handshake completes
//! - Outbound frame queues feeding each connection's writer task
//!
//! The registry is only ever touched by the server's driver task, so no
//! locking is involved.

use crate::session::SessionState;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use tokio::sync::mpsc::UnboundedSender;

/// Handle assigned to a connection when it is accepted. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u32);

impl ConnectionId {
    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Derives the `remoteAddress:remotePort` identifier of a peer
pub fn uid_from_addr(addr: SocketAddr) -> String {
    format!("{}:{}", addr.ip(), addr.port())
}

/// Queue of encoded frames waiting to be written to one connection
pub type Outbound = UnboundedSender<Vec<u8>>;

/// A registered connection
#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    pub uid: String,
    pub state: SessionState,
    outbound: Outbound,
}

/// Owns the set of live connections and their nicknames
pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, Connection>,
    /// UID to nickname, filled in by `bind`
    nicknames: HashMap<String, String>,
    next_id: u32,
    max_clients: usize,
}

impl ConnectionRegistry {
    /// Creates an empty registry refusing connections past `max_clients`
    pub fn new(max_clients: usize) -> Self {
        Self {
            connections: HashMap::new(),
            nicknames: HashMap::new(),
            next_id: 1,
            max_clients,
        }
    }

    /// Registers a freshly accepted connection in the `Pending` state.
    ///
    /// Returns `None` when the server is at capacity.
    pub fn register(&mut self, addr: SocketAddr, outbound: Outbound) -> Option<ConnectionId> {
        if self.connections.len() >= self.max_clients {
            return None;
        }

        let id = ConnectionId(self.next_id);
        self.next_id += 1;

        let uid = uid_from_addr(addr);
        info!("Connection {} registered as {}", id, uid);
        self.connections.insert(
            id,
            Connection {
                id,
                uid,
                state: SessionState::Pending,
                outbound,
            },
        );

        Some(id)
    }

    /// Binds a nickname to the connection and marks its session active.
    ///
    /// Rebinding overwrites the previous nickname. Returns false for an
    /// unknown connection.
    pub fn bind(&mut self, id: ConnectionId, nickname: &str) -> bool {
        let Some(connection) = self.connections.get_mut(&id) else {
            return false;
        };

        connection.state = SessionState::Active;
        if let Some(previous) = self
            .nicknames
            .insert(connection.uid.clone(), nickname.to_string())
        {
            debug!("{} rebound from {} to {}", connection.uid, previous, nickname);
        }
        info!("{} has a new nickname: {}", connection.uid, nickname);
        true
    }

    pub fn nickname_of(&self, id: ConnectionId) -> Option<&str> {
        let connection = self.connections.get(&id)?;
        self.nicknames.get(&connection.uid).map(String::as_str)
    }

    pub fn uid_of(&self, id: ConnectionId) -> Option<&str> {
        self.connections.get(&id).map(|c| c.uid.as_str())
    }

    pub fn state_of(&self, id: ConnectionId) -> Option<SessionState> {
        self.connections.get(&id).map(|c| c.state)
    }

    /// Removes the connection together with its nickname binding.
    ///
    /// Dropping the returned connection closes its outbound queue.
    pub fn unregister(&mut self, id: ConnectionId) -> Option<Connection> {
        let mut connection = self.connections.remove(&id)?;
        self.nicknames.remove(&connection.uid);
        connection.state = SessionState::Closed;
        info!("Connection {} ({}) unregistered", id, connection.uid);
        Some(connection)
    }

    pub fn find_by_nickname(&self, nickname: &str) -> Option<ConnectionId> {
        self.connections
            .values()
            .find(|c| self.nicknames.get(&c.uid).map(String::as_str) == Some(nickname))
            .map(|c| c.id)
    }

    /// Whether another connection already holds `nickname`
    pub fn is_nickname_taken(&self, nickname: &str, except: ConnectionId) -> bool {
        matches!(self.find_by_nickname(nickname), Some(id) if id != except)
    }

    /// Active sessions ordered by connection handle
    pub fn active_sessions(&self) -> Vec<(ConnectionId, &str)> {
        let mut sessions: Vec<(ConnectionId, &str)> = self
            .connections
            .values()
            .filter(|c| c.state == SessionState::Active)
            .filter_map(|c| Some((c.id, self.nicknames.get(&c.uid)?.as_str())))
            .collect();
        sessions.sort_by_key(|(id, _)| *id);
        sessions
    }

    /// Queues an encoded frame for one connection
    pub fn send_frame(&self, id: ConnectionId, frame: Vec<u8>) -> bool {
        match self.connections.get(&id) {
            Some(connection) => {
                if connection.outbound.send(frame).is_err() {
                    warn!("Writer for {} is gone", id);
                    return false;
                }
                true
            }
            None => false,
        }
    }

    /// Number of registered connections, pending ones included
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
