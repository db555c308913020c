//! # Arena Server Library
//!
//! This library provides the authoritative server for the tile arena game.
//! It owns the canonical world model, validates every client command and
//! relays the resulting events to the other connected players.
//!
//! ## Core Responsibilities
//!
//! ### Session Management
//! Every TCP connection goes through the same lifecycle:
//! - Accepted and registered under an opaque handle (`PENDING`)
//! - `JOIN`/`JOSP` handshake binds a nickname and replies `WELC` (`ACTIVE`)
//! - `QUIT`, end of stream or a read error tears it down (`CLOSED`)
//!
//! ### Authoritative Relay
//! Moves, bomb drops and departures are applied to the model first and then
//! broadcast to every other active session. The originator never receives its
//! own event back since it already predicted it locally.
//!
//! ### Catch-up
//! A new arrival receives one `NEWP` per other player and one `NEWF` per live
//! fruit right after its `WELC`. Bombs are not replayed; arrivals get a short
//! immunity instead.
//!
//! ### Teleport Handoff
//! Stepping on a teleporter tile sends `TPSP host port` to the mover, who then
//! reconnects to that server with `JOSP` carrying its health and kind.
//!
//! ## Architecture Design
//!
//! ### Single Driver Task
//! All registry and model mutation happens on the task running
//! [`network::Server::run`]. Each connection has a reader task decoding frames
//! and a writer task draining an outbound queue; both talk to the driver over
//! channels, so frames from one connection are handled in arrival order and a
//! slow peer never stalls the others. The binary runs on a current-thread
//! runtime.
//!
//! ### Framing
//! Every message travels in a `BEGIN <len> <payload>\n` frame, see
//! [`shared::codec`].
//!
//! ## Module Organization
//!
//! - `registry`: connection handles, UIDs and nickname bindings
//! - `session`: per-connection lifecycle states
//! - `dispatcher`: command parsing, validation and outbound messages
//! - `network`: accept path, connection tasks and the world tick
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::{Server, ServerConfig};
//! use shared::{ArenaModel, GameModel};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut model = ArenaModel::new();
//!     model.load_map("maps/arena1")?;
//!
//!     let mut server = Server::bind(ServerConfig::default(), model).await?;
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod dispatcher;
pub mod network;
pub mod registry;
pub mod session;
