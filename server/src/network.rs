//! Server network layer: TCP accept path, per-connection tasks and the world tick

use crate::dispatcher::{Dispatcher, GameMessage, TeleportTarget};
use crate::registry::{ConnectionId, ConnectionRegistry};
use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::codec::{encode, read_frame};
use shared::model::FRUIT_KINDS;
use shared::{ArenaModel, GameModel};
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};

/// Runtime settings of one server process
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// World ticks per second
    pub tick_rate: u32,
    /// Chance of a server bomb on each tick
    pub bomb_probability: f64,
    pub max_clients: usize,
    /// Fruits scattered on the map at startup
    pub initial_fruits: usize,
    pub teleport: Option<TeleportTarget>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: shared::DEFAULT_PORT,
            tick_rate: 30,
            bomb_probability: 0.01,
            max_clients: 32,
            initial_fruits: 5,
            teleport: None,
        }
    }
}

/// Messages sent from connection reader tasks to the driver loop
#[derive(Debug)]
pub enum ServerMessage {
    FrameReceived { id: ConnectionId, payload: String },
    /// End of stream, transport error or unrecoverable framing error
    Disconnected {
        id: ConnectionId,
        reason: Option<String>,
    },
}

/// Authoritative arena server.
///
/// Listener, registry and model are owned by the task running [`Server::run`];
/// reader and writer tasks only move bytes and talk to it through channels.
pub struct Server {
    listener: TcpListener,
    dispatcher: Dispatcher<ArenaModel>,
    readers: HashMap<ConnectionId, JoinHandle<()>>,
    config: ServerConfig,
    rng: StdRng,

    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
}

impl Server {
    /// Binds the listening socket and seeds the world with fruits
    pub async fn bind(config: ServerConfig, mut model: ArenaModel) -> io::Result<Self> {
        let address = format!("{}:{}", config.host, config.port);
        let listener = TcpListener::bind(&address).await?;
        info!("Server listening on {}", listener.local_addr()?);

        let mut rng = StdRng::from_entropy();
        for _ in 0..config.initial_fruits {
            if let Some(pos) = model.random_position() {
                model.add_fruit(rng.gen_range(0..FRUIT_KINDS), pos);
            }
        }

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let registry = ConnectionRegistry::new(config.max_clients);

        Ok(Server {
            listener,
            dispatcher: Dispatcher::new(model, registry, config.teleport.clone()),
            readers: HashMap::new(),
            config,
            rng,
            server_tx,
            server_rx,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn dispatcher(&self) -> &Dispatcher<ArenaModel> {
        &self.dispatcher
    }

    /// Spawns the task that decodes frames from one connection
    fn spawn_connection_reader(&self, id: ConnectionId, mut reader: OwnedReadHalf) -> JoinHandle<()> {
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            loop {
                let message = match read_frame(&mut reader).await {
                    Ok(Some(payload)) => ServerMessage::FrameReceived { id, payload },
                    Ok(None) => ServerMessage::Disconnected { id, reason: None },
                    Err(e) if e.is_recoverable() => {
                        warn!("Dropping frame from {}: {}", id, e);
                        continue;
                    }
                    Err(e) => ServerMessage::Disconnected {
                        id,
                        reason: Some(e.to_string()),
                    },
                };

                let done = matches!(message, ServerMessage::Disconnected { .. });
                if let Err(e) = server_tx.send(message) {
                    error!("Failed to forward message from {}: {}", id, e);
                    break;
                }
                if done {
                    break;
                }
            }
        })
    }

    /// Spawns the task draining one connection's outbound queue.
    ///
    /// The task ends, closing the write side, once the registry drops the
    /// queue's sender.
    fn spawn_connection_writer(
        id: ConnectionId,
        mut writer: OwnedWriteHalf,
        mut outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    ) {
        tokio::spawn(async move {
            while let Some(frame) = outbound.recv().await {
                if let Err(e) = writer.write_all(&frame).await {
                    debug!("Write to {} failed: {}", id, e);
                    break;
                }
            }
            let _ = writer.shutdown().await;
        });
    }

    fn accept_player(&mut self, stream: TcpStream, addr: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Unable to disable Nagle for {}: {}", addr, e);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let Some(id) = self.dispatcher.registry_mut().register(addr, tx) else {
            warn!("Server full, refusing connection from {}", addr);
            return;
        };

        let (reader, writer) = stream.into_split();
        Self::spawn_connection_writer(id, writer, rx);
        let handle = self.spawn_connection_reader(id, reader);
        self.readers.insert(id, handle);

        info!("A new player has connected from {} as {}", addr, id);
    }

    fn handle_message(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::FrameReceived { id, payload } => {
                if let Some(uid) = self.dispatcher.registry().uid_of(id) {
                    debug!("{}: {}", uid, payload);
                }
                let messages = self.dispatcher.handle_frame(id, &payload);
                self.deliver(messages);
            }
            ServerMessage::Disconnected { id, reason } => {
                match reason {
                    Some(reason) => info!("Connection {} lost: {}", id, reason),
                    None => info!("Connection {} closed by peer", id),
                }
                let messages = self.dispatcher.kill_user(id);
                self.deliver(messages);
            }
        }
    }

    /// Writes dispatcher output to the connections' outbound queues, in order
    fn deliver(&mut self, messages: Vec<GameMessage>) {
        for message in messages {
            match message {
                GameMessage::SendPacket { to, payload } => match encode(&payload) {
                    Ok(frame) => {
                        self.dispatcher.registry().send_frame(to, frame);
                    }
                    Err(e) => error!("Unable to encode frame for {}: {}", to, e),
                },
                GameMessage::BroadcastPacket { payload, exclude } => {
                    let frame = match encode(&payload) {
                        Ok(frame) => frame,
                        Err(e) => {
                            error!("Unable to encode broadcast: {}", e);
                            continue;
                        }
                    };
                    let registry = self.dispatcher.registry();
                    for (id, _) in registry.active_sessions() {
                        if Some(id) == exclude {
                            continue;
                        }
                        registry.send_frame(id, frame.clone());
                    }
                }
                GameMessage::Disconnect { id } => {
                    if let Some(handle) = self.readers.remove(&id) {
                        handle.abort();
                    }
                }
            }
        }
    }

    /// Advances the model and rolls for a server bomb
    fn tick(&mut self, dt: Duration) {
        self.dispatcher.model_mut().tick(dt.as_millis() as u32);

        let messages = self
            .dispatcher
            .maybe_spawn_bomb(&mut self.rng, self.config.bomb_probability);
        self.deliver(messages);
    }

    /// Main server loop coordinating all operations
    pub async fn run(&mut self) -> io::Result<()> {
        let tick_rate = self.config.tick_rate.max(1);
        let mut tick_interval = interval(Duration::from_secs_f64(1.0 / tick_rate as f64));
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_tick = Instant::now();
        let mut ticks: u64 = 0;

        info!("Server started successfully");

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => self.accept_player(stream, addr),
                        Err(e) => error!("Error accepting connection: {}", e),
                    }
                },

                message = self.server_rx.recv() => {
                    match message {
                        Some(message) => self.handle_message(message),
                        None => {
                            info!("Server shutting down");
                            break;
                        }
                    }
                },

                _ = tick_interval.tick() => {
                    let now = Instant::now();
                    let dt = now.duration_since(last_tick);
                    last_tick = now;
                    self.tick(dt);

                    ticks += 1;
                    if ticks % (tick_rate as u64 * 60) == 0 {
                        let registry = self.dispatcher.registry();
                        debug!(
                            "Tick {}: {} connections, {} active sessions",
                            ticks,
                            registry.len(),
                            registry.active_sessions().len()
                        );
                    }
                },
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::codec::write_frame;
    use shared::Map;

    fn test_model() -> ArenaModel {
        let mut model = ArenaModel::with_seed(5);
        model.set_map(Map::parse("/maps/unit", "#####\n#...#\n#...#\n#####\n").unwrap());
        model
    }

    fn test_config() -> ServerConfig {
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            bomb_probability: 0.0,
            initial_fruits: 0,
            ..ServerConfig::default()
        }
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.port, shared::DEFAULT_PORT);
        assert!((0.0..=1.0).contains(&config.bomb_probability));
        assert!(config.teleport.is_none());
    }

    #[tokio::test]
    async fn test_bind_seeds_fruits() {
        let config = ServerConfig {
            initial_fruits: 3,
            ..test_config()
        };
        let server = Server::bind(config, test_model()).await.unwrap();
        assert_eq!(server.dispatcher().model().fruits().len(), 3);
        assert_ne!(server.local_addr().unwrap().port(), 0);
    }

    #[tokio::test]
    async fn test_join_over_tcp() {
        let mut server = Server::bind(test_config(), test_model()).await.unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(async move { server.run().await });

        let mut stream = TcpStream::connect(addr).await.unwrap();
        write_frame(&mut stream, "JOIN alice").await.unwrap();

        let reply = tokio::time::timeout(Duration::from_secs(2), read_frame(&mut stream))
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(reply.starts_with("WELC "));
        assert!(reply.ends_with(" /maps/unit"));
    }
}
