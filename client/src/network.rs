//! Client network layer: upstream connection, handshake and server handoff

use crate::game::{ClientAction, ClientGameState};
use crate::input::KeyboardEvent;
use log::{debug, error, info, warn};
use shared::codec::{read_frame, write_frame};
use shared::protocol::split_events;
use shared::{ClientCommand, FrameError, GameModel, ServerEvent};
use std::fmt;
use std::io;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, Duration, Instant, MissedTickBehavior};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub nickname: String,
    /// Connection attempts before giving up on a server
    pub connect_attempts: u32,
    pub retry_delay: Duration,
    /// How long to wait for `WELC` before sending the handshake again
    pub handshake_timeout: Duration,
    /// Local model ticks per second
    pub tick_rate: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: shared::DEFAULT_HOST.to_string(),
            port: shared::DEFAULT_PORT,
            nickname: "player".to_string(),
            connect_attempts: 5,
            retry_delay: Duration::from_millis(500),
            handshake_timeout: Duration::from_secs(2),
            tick_rate: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    /// `JOIN` or `JOSP` sent, waiting for `WELC`
    Handshaking,
    Active,
    Teleporting,
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("server {0} unreachable")]
    ServerUnreachable(String),
    #[error("no WELC from {0}")]
    HandshakeTimeout(String),
    #[error("connection closed by the server")]
    ConnectionClosed,
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Messages from the reader task of the current connection
#[derive(Debug)]
enum LinkMessage {
    FrameReceived(String),
    Disconnected(Option<String>),
}

/// One upstream connection with its reader task
struct Link {
    server: String,
    writer: OwnedWriteHalf,
    inbound: mpsc::UnboundedReceiver<LinkMessage>,
    reader: JoinHandle<()>,
}

impl Link {
    fn open(server: String, stream: TcpStream) -> Self {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Unable to disable Nagle for {}: {}", server, e);
        }

        let (reader, writer) = stream.into_split();
        let (tx, inbound) = mpsc::unbounded_channel();
        let reader = Self::spawn_reader(reader, tx);

        Self {
            server,
            writer,
            inbound,
            reader,
        }
    }

    fn spawn_reader(mut reader: OwnedReadHalf, tx: mpsc::UnboundedSender<LinkMessage>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let message = match read_frame(&mut reader).await {
                    Ok(Some(payload)) => LinkMessage::FrameReceived(payload),
                    Ok(None) => LinkMessage::Disconnected(None),
                    Err(e) if e.is_recoverable() => {
                        warn!("Dropping frame from server: {}", e);
                        continue;
                    }
                    Err(e) => LinkMessage::Disconnected(Some(e.to_string())),
                };

                let done = matches!(message, LinkMessage::Disconnected(_));
                if tx.send(message).is_err() || done {
                    break;
                }
            }
        })
    }

    async fn send(&mut self, command: &ClientCommand) -> Result<(), ClientError> {
        debug!("-> {}: {}", self.server, command);
        write_frame(&mut self.writer, &command.to_string()).await?;
        Ok(())
    }

    async fn close(&mut self) {
        self.reader.abort();
        let _ = self.writer.shutdown().await;
    }
}

/// Tries to reach `host:port` up to `attempts` times
async fn connect_with_retry(
    host: &str,
    port: u16,
    attempts: u32,
    delay: Duration,
) -> Result<TcpStream, ClientError> {
    let attempts = attempts.max(1);
    for attempt in 1..=attempts {
        match TcpStream::connect((host, port)).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                warn!(
                    "Connection to {}:{} failed (attempt {}/{}): {}",
                    host, port, attempt, attempts, e
                );
                if attempt < attempts {
                    sleep(delay).await;
                }
            }
        }
    }

    Err(ClientError::ServerUnreachable(format!("{}:{}", host, port)))
}

/// Game client driving one upstream connection at a time
pub struct Client<M: GameModel> {
    config: ClientConfig,
    state: ConnectionState,
    game: ClientGameState<M>,
    link: Link,
    input: mpsc::UnboundedReceiver<KeyboardEvent>,

    /// Last `JOIN`/`JOSP` sent and when, resent until `WELC` arrives
    handshake: ClientCommand,
    handshake_sent: Instant,
    handshake_attempts: u32,
}

impl<M: GameModel> fmt::Debug for Client<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("server", &self.link.server)
            .field("nickname", &self.game.nickname())
            .field("state", &self.state)
            .finish()
    }
}

impl<M: GameModel> Client<M> {
    /// Connects to the configured server and sends `JOIN`
    pub async fn connect(
        config: ClientConfig,
        model: M,
        input: mpsc::UnboundedReceiver<KeyboardEvent>,
    ) -> Result<Self, ClientError> {
        info!("Connecting to {}:{}...", config.host, config.port);
        let stream = connect_with_retry(
            &config.host,
            config.port,
            config.connect_attempts,
            config.retry_delay,
        )
        .await?;

        let server = format!("{}:{}", config.host, config.port);
        let game = ClientGameState::new(model, &config.nickname);
        let join = ClientCommand::Join {
            nickname: config.nickname.clone(),
        };
        let mut client = Client {
            config,
            state: ConnectionState::Connecting,
            game,
            link: Link::open(server, stream),
            input,
            handshake: join.clone(),
            handshake_sent: Instant::now(),
            handshake_attempts: 0,
        };

        client.send_handshake(join).await?;
        Ok(client)
    }

    async fn send_handshake(&mut self, command: ClientCommand) -> Result<(), ClientError> {
        self.link.send(&command).await?;
        self.handshake = command;
        self.handshake_sent = Instant::now();
        self.handshake_attempts = 1;
        self.state = ConnectionState::Handshaking;
        Ok(())
    }

    /// Resends the pending handshake once it timed out.
    ///
    /// A server ignores a handshake while the nickname is still bound to a
    /// session it has not cleaned up yet, so the client asks again a few times.
    async fn check_handshake(&mut self) -> Result<(), ClientError> {
        if self.state != ConnectionState::Handshaking
            || self.handshake_sent.elapsed() < self.config.handshake_timeout
        {
            return Ok(());
        }

        if self.handshake_attempts >= self.config.connect_attempts.max(1) {
            error!("{} never answered {}", self.link.server, self.handshake);
            return Err(ClientError::HandshakeTimeout(self.link.server.clone()));
        }

        warn!("No WELC from {}, sending {} again", self.link.server, self.handshake);
        self.link.send(&self.handshake).await?;
        self.handshake_sent = Instant::now();
        self.handshake_attempts += 1;
        Ok(())
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn game(&self) -> &ClientGameState<M> {
        &self.game
    }

    /// `host:port` of the current upstream server
    pub fn server(&self) -> &str {
        &self.link.server
    }

    async fn handle_frame(&mut self, payload: &str) -> Result<(), ClientError> {
        for line in split_events(payload) {
            let event = match line.parse::<ServerEvent>() {
                Ok(event) => event,
                Err(e) => {
                    debug!("Ignoring server line {:?}: {}", line, e);
                    continue;
                }
            };

            if matches!(event, ServerEvent::Welcome { .. }) {
                self.state = ConnectionState::Active;
            }

            match self.game.apply_event(event) {
                Some(ClientAction::SwitchServer { host, port }) => {
                    self.switch_server(&host, port).await?;
                    // the rest of this frame belongs to the old world
                    break;
                }
                None => {}
            }
        }
        Ok(())
    }

    /// Hands the session over to another server.
    ///
    /// A probe connection checks that the target is reachable; if it is not,
    /// the client stays where it is. Returns whether the handoff happened.
    pub async fn switch_server(&mut self, host: &str, port: u16) -> Result<bool, ClientError> {
        let Some(ticket) = self.game.teleport_ticket(host, port) else {
            warn!("Teleport to {}:{} requested without a local character", host, port);
            return Ok(false);
        };

        let previous = self.state;
        self.state = ConnectionState::Teleporting;
        info!("Teleporting {} to {}:{}", ticket.nickname, host, port);

        match TcpStream::connect((host, port)).await {
            Ok(probe) => drop(probe),
            Err(e) => {
                warn!("Teleport target {}:{} unreachable, staying: {}", host, port, e);
                self.state = previous;
                return Ok(false);
            }
        }

        self.game.reset();
        self.link.close().await;

        let stream = connect_with_retry(
            host,
            port,
            self.config.connect_attempts,
            self.config.retry_delay,
        )
        .await?;
        self.link = Link::open(format!("{}:{}", host, port), stream);

        self.send_handshake(ticket.handshake()).await?;
        info!("Rejoined {}:{} as {}", host, port, ticket.nickname);
        Ok(true)
    }

    /// Sends `QUIT` and closes the connection
    async fn quit(mut self) -> Result<(), ClientError> {
        if let Err(e) = self.link.send(&ClientCommand::Quit).await {
            debug!("Unable to send QUIT: {}", e);
        }
        self.link.close().await;
        info!("Disconnected");
        Ok(())
    }

    /// Main client loop: server frames, input events and local ticks.
    ///
    /// Returns `Ok` after a quit and an error once the server is lost.
    pub async fn run(mut self) -> Result<(), ClientError> {
        let tick_rate = self.config.tick_rate.max(1);
        let mut tick_interval = interval(Duration::from_secs_f64(1.0 / tick_rate as f64));
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_tick = Instant::now();

        loop {
            tokio::select! {
                message = self.link.inbound.recv() => {
                    match message {
                        Some(LinkMessage::FrameReceived(payload)) => self.handle_frame(&payload).await?,
                        Some(LinkMessage::Disconnected(Some(reason))) => {
                            error!("Connection to {} lost: {}", self.link.server, reason);
                            return Err(ClientError::ServerUnreachable(self.link.server.clone()));
                        }
                        Some(LinkMessage::Disconnected(None)) | None => {
                            error!("Server {} closed the connection", self.link.server);
                            return Err(ClientError::ConnectionClosed);
                        }
                    }
                },

                event = self.input.recv() => {
                    match event {
                        Some(KeyboardEvent::Quit) | None => return self.quit().await,
                        Some(event) => {
                            if let Some(command) = self.game.predict(event) {
                                self.link.send(&command).await?;
                            }
                        }
                    }
                },

                _ = tick_interval.tick() => {
                    let now = Instant::now();
                    let dt = now.duration_since(last_tick);
                    last_tick = now;
                    self.game.model_mut().tick(dt.as_millis() as u32);
                    self.check_handshake().await?;
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::ArenaModel;
    use tokio::net::TcpListener;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.port, shared::DEFAULT_PORT);
        assert!(config.connect_attempts > 0);
    }

    #[test]
    fn test_client_error_display() {
        let error = ClientError::ServerUnreachable("localhost:1".to_string());
        assert_eq!(error.to_string(), "server localhost:1 unreachable");
    }

    fn local_config(port: u16, nickname: &str) -> ClientConfig {
        ClientConfig {
            host: "127.0.0.1".to_string(),
            port,
            nickname: nickname.to_string(),
            handshake_timeout: Duration::from_millis(50),
            tick_rate: 100,
            ..ClientConfig::default()
        }
    }

    #[tokio::test]
    async fn test_handshake_resent_until_welcome() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = local_config(listener.local_addr().unwrap().port(), "alice");

        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let client = Client::connect(config, ArenaModel::with_seed(1), input_rx)
            .await
            .unwrap();
        let handle = tokio::spawn(client.run());
        let (mut stream, _) = listener.accept().await.unwrap();

        assert_eq!(read_frame(&mut stream).await.unwrap().as_deref(), Some("JOIN alice"));
        let again = tokio::time::timeout(Duration::from_secs(2), read_frame(&mut stream))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(again.as_deref(), Some("JOIN alice"));

        write_frame(&mut stream, "WELC 0 50 1 1 /maps/none").await.unwrap();
        sleep(Duration::from_millis(100)).await;
        input_tx.send(KeyboardEvent::Quit).unwrap();

        loop {
            match read_frame(&mut stream).await.unwrap().as_deref() {
                Some("JOIN alice") => continue,
                Some(frame) => {
                    assert_eq!(frame, "QUIT");
                    break;
                }
                None => panic!("closed without QUIT"),
            }
        }
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_handshake_gives_up() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = ClientConfig {
            connect_attempts: 2,
            ..local_config(listener.local_addr().unwrap().port(), "alice")
        };

        let (_input_tx, input_rx) = mpsc::unbounded_channel();
        let client = Client::connect(config, ArenaModel::with_seed(1), input_rx)
            .await
            .unwrap();
        let (_stream, _) = listener.accept().await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(2), client.run())
            .await
            .unwrap();
        assert!(matches!(result, Err(ClientError::HandshakeTimeout(_))));
    }

    #[tokio::test]
    async fn test_teleport_leaves_origin_before_rejoining() {
        let origin = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target_port = target.local_addr().unwrap().port();
        let config = local_config(origin.local_addr().unwrap().port(), "alice");

        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let client = Client::connect(config, ArenaModel::with_seed(1), input_rx)
            .await
            .unwrap();
        let handle = tokio::spawn(client.run());

        let (mut old, _) = origin.accept().await.unwrap();
        assert_eq!(read_frame(&mut old).await.unwrap().as_deref(), Some("JOIN alice"));
        write_frame(&mut old, "WELC 2 35 1 1 /maps/none").await.unwrap();
        write_frame(&mut old, &format!("TPSP 127.0.0.1 {}", target_port))
            .await
            .unwrap();

        let (probe, _) = target.accept().await.unwrap();
        drop(probe);
        let (mut new, _) = target.accept().await.unwrap();

        // the origin connection is already gone when the new one opens
        let end = tokio::time::timeout(Duration::from_millis(500), read_frame(&mut old))
            .await
            .unwrap();
        assert!(matches!(end, Ok(None)));

        assert_eq!(read_frame(&mut new).await.unwrap().as_deref(), Some("JOSP 35 2 alice"));

        input_tx.send(KeyboardEvent::Quit).unwrap();
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_connect_retry_gives_up() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = connect_with_retry("127.0.0.1", port, 2, Duration::from_millis(10)).await;
        assert!(matches!(result, Err(ClientError::ServerUnreachable(_))));
    }

    #[tokio::test]
    async fn test_connect_sends_join() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = ClientConfig {
            host: "127.0.0.1".to_string(),
            port: listener.local_addr().unwrap().port(),
            nickname: "alice".to_string(),
            ..ClientConfig::default()
        };

        let (_input_tx, input_rx) = mpsc::unbounded_channel();
        let client = Client::connect(config, ArenaModel::with_seed(1), input_rx)
            .await
            .unwrap();
        assert_eq!(client.state(), ConnectionState::Handshaking);

        let (mut stream, _) = listener.accept().await.unwrap();
        let frame = read_frame(&mut stream).await.unwrap();
        assert_eq!(frame.as_deref(), Some("JOIN alice"));
    }

    #[tokio::test]
    async fn test_quit_input_sends_quit() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = ClientConfig {
            host: "127.0.0.1".to_string(),
            port: listener.local_addr().unwrap().port(),
            nickname: "bob".to_string(),
            ..ClientConfig::default()
        };

        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let client = Client::connect(config, ArenaModel::with_seed(1), input_rx)
            .await
            .unwrap();
        let (mut stream, _) = listener.accept().await.unwrap();

        input_tx.send(KeyboardEvent::Quit).unwrap();
        client.run().await.unwrap();

        assert_eq!(read_frame(&mut stream).await.unwrap().as_deref(), Some("JOIN bob"));
        assert_eq!(read_frame(&mut stream).await.unwrap().as_deref(), Some("QUIT"));
        assert_eq!(read_frame(&mut stream).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_server_close_is_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = ClientConfig {
            host: "127.0.0.1".to_string(),
            port: listener.local_addr().unwrap().port(),
            ..ClientConfig::default()
        };

        let (_input_tx, input_rx) = mpsc::unbounded_channel();
        let client = Client::connect(config, ArenaModel::with_seed(1), input_rx)
            .await
            .unwrap();
        let (mut stream, _) = listener.accept().await.unwrap();
        read_frame(&mut stream).await.unwrap();
        drop(stream);

        let result = client.run().await;
        assert!(matches!(result, Err(ClientError::ConnectionClosed)));
    }
}
