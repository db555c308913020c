use clap::Parser;
use client::input::{InputManager, KeyboardEvent};
use client::network::{Client, ClientConfig};
use log::info;
use shared::ArenaModel;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server host to connect to
    #[arg(short = 'H', long, default_value = shared::DEFAULT_HOST)]
    host: String,

    /// Server port to connect to
    #[arg(short, long, default_value_t = shared::DEFAULT_PORT)]
    port: u16,

    /// Nickname, must not contain whitespace
    #[arg(short, long)]
    nickname: String,

    /// Connection attempts before giving up
    #[arg(short, long, default_value = "5")]
    retries: u32,

    /// Delay between connection attempts in milliseconds
    #[arg(short, long, default_value = "500")]
    delay: u64,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    if args.nickname.is_empty() || args.nickname.chars().any(char::is_whitespace) {
        return Err(format!("invalid nickname {:?}", args.nickname).into());
    }

    info!("Starting client...");
    info!("Controls: w/a/s/d to move, b to drop a bomb, map, q to quit");

    let config = ClientConfig {
        host: args.host,
        port: args.port,
        nickname: args.nickname,
        connect_attempts: args.retries,
        retry_delay: Duration::from_millis(args.delay),
        ..ClientConfig::default()
    };

    let (input_tx, input_rx) = mpsc::unbounded_channel();
    InputManager::new().spawn_stdin(input_tx.clone());

    // Ctrl+C leaves the game like a typed quit
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, leaving the game...");
            let _ = input_tx.send(KeyboardEvent::Quit);
        }
    });

    let client = Client::connect(config, ArenaModel::new(), input_rx).await?;
    client.run().await?;

    Ok(())
}
