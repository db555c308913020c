//! # Arena Client Library
//!
//! Client side of the tile arena game: one upstream connection to an
//! authoritative server, a local copy of the world and the handoff logic used
//! when the server sends the player elsewhere.
//!
//! ## Client-Side Prediction
//! Moves and bomb drops are applied to the local model as soon as the player
//! issues them, and the matching request is sent to the server. The server
//! never echoes these back to their author; relayed `MOVP`/`DROP` for the
//! local nickname are ignored so nothing is applied twice.
//!
//! ## Session Lifecycle
//! - Connect, retrying a configurable number of times
//! - Send `JOIN nickname` and wait for `WELC`
//! - Apply authoritative events until the player quits or the server is lost
//!
//! Events that arrive before `WELC` are dropped.
//!
//! ## Teleport
//! On `TPSP host port` the client probes the target first. If it answers, the
//! local world is emptied, the old connection closed and a new one opened with
//! `JOSP health kind nickname` so the character keeps its identity. If the
//! probe fails the client stays on its current server.
//!
//! ## Module Organization
//!
//! - `game`: local world state, prediction and event application
//! - `input`: text commands turned into keyboard events
//! - `network`: upstream connection, handshake and server handoff
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::input::InputManager;
//! use client::network::{Client, ClientConfig};
//! use shared::ArenaModel;
//! use tokio::sync::mpsc;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (input_tx, input_rx) = mpsc::unbounded_channel();
//!     InputManager::new().spawn_stdin(input_tx);
//!
//!     let client = Client::connect(ClientConfig::default(), ArenaModel::new(), input_rx).await?;
//!     client.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod game;
pub mod input;
pub mod network;
