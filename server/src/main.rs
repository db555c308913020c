use clap::Parser;
use log::{error, info};
use server::dispatcher::TeleportTarget;
use server::network::{Server, ServerConfig};
use shared::{ArenaModel, GameModel};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Map file shared with the clients
    #[arg(short, long)]
    map: String,

    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value_t = shared::DEFAULT_PORT)]
    port: u16,

    /// Tick rate (updates per second)
    #[arg(short, long, default_value = "30")]
    tick_rate: u32,

    /// Probability of a server bomb on each tick
    #[arg(short, long, default_value = "0.01")]
    bomb_probability: f64,

    /// Maximum number of simultaneous connections
    #[arg(long, default_value = "32")]
    max_clients: usize,

    /// Fruits scattered on the map at startup
    #[arg(long, default_value = "5")]
    fruits: usize,

    /// Host clients are sent to when stepping on a teleporter
    #[arg(long, requires = "teleport_port")]
    teleport_host: Option<String>,

    /// Port clients are sent to when stepping on a teleporter
    #[arg(long, requires = "teleport_host")]
    teleport_port: Option<u16>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();
    if !(0.0..=1.0).contains(&args.bomb_probability) {
        return Err(format!(
            "bomb probability must be between 0 and 1, got {}",
            args.bomb_probability
        )
        .into());
    }

    let mut model = ArenaModel::new();
    model.load_map(&args.map)?;

    let teleport = match (args.teleport_host, args.teleport_port) {
        (Some(host), Some(port)) => Some(TeleportTarget { host, port }),
        _ => None,
    };

    let config = ServerConfig {
        host: args.host,
        port: args.port,
        tick_rate: args.tick_rate,
        bomb_probability: args.bomb_probability,
        max_clients: args.max_clients,
        initial_fruits: args.fruits,
        teleport,
    };

    let mut server = Server::bind(config, model).await?;

    // Handle shutdown gracefully
    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server stopped: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    Ok(())
}
