//! Relay server binary
//!
//! Listens for peer connections and rebroadcasts every frame a peer sends
//! to all other connected peers. Runs until interrupted.
//!
//! Log verbosity follows `RUST_LOG`; the default is `info`.

use chatrelay::protocol::{DEFAULT_MAX_FILE_SIZE, DEFAULT_PORT};
use chatrelay::{RelayServer, ServerConfig};
use clap::Parser;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "chatrelay-server", about = "Central text and file relay server")]
struct ServerArgs {
    /// Address to listen on
    #[arg(default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Seconds a peer may stay silent before it is evicted
    #[arg(long, default_value_t = 300)]
    idle_timeout: u64,

    /// Seconds between idle-peer sweeps
    #[arg(long, default_value_t = 60)]
    sweep_interval: u64,

    /// Largest file payload the relay will carry, in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_FILE_SIZE)]
    max_file_size: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = ServerArgs::parse();
    let config = ServerConfig {
        host: args.host,
        port: args.port,
        idle_timeout: Duration::from_secs(args.idle_timeout),
        sweep_interval: Duration::from_secs(args.sweep_interval),
        max_file_size: args.max_file_size,
        ..Default::default()
    };

    let server = RelayServer::bind(config).await?;
    println!("Relay listening on {}", server.local_addr()?);
    server.run().await?;
    Ok(())
}
