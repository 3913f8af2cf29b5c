use clap::Parser;
use log::{error, info};
use server::config::ServerConfig;
use server::network::Server;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;

/// Command line arguments for the asteroids session server
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Address to bind both sockets to
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    host: IpAddr,

    /// Game socket port
    #[clap(short, long, default_value = "7777")]
    port: u16,

    /// File service port; the service is off when omitted
    #[clap(long)]
    transfer_port: Option<u16>,

    /// Broadcaster and dispatcher tick in milliseconds
    #[clap(long, default_value = "5")]
    tick_ms: u64,

    /// Seconds between asteroid waves while a game runs
    #[clap(long, default_value = "4")]
    wave_secs: u64,

    /// Milliseconds between ship state snapshots
    #[clap(long, default_value = "100")]
    state_update_ms: u64,

    /// Seconds of silence before a slot is released
    #[clap(long, default_value = "10")]
    client_timeout_secs: u64,

    /// High score file
    #[clap(long, default_value = "highscores.txt")]
    highscores: PathBuf,

    /// Directory served by the file service
    #[clap(long)]
    files: Option<PathBuf>,

    /// Fraction of inbound game datagrams to drop, for testing under loss
    #[clap(long, default_value = "0.0")]
    loss_rate: f64,

    /// Seed for wave placement and simulated loss
    #[clap(long, default_value = "0")]
    seed: u64,
}

impl Args {
    fn into_config(self) -> ServerConfig {
        ServerConfig {
            game_addr: SocketAddr::new(self.host, self.port),
            transfer_addr: self.transfer_port.map(|port| SocketAddr::new(self.host, port)),
            tick: Duration::from_millis(self.tick_ms.max(1)),
            wave_interval: Duration::from_secs(self.wave_secs),
            state_update_interval: Duration::from_millis(self.state_update_ms),
            client_timeout: Duration::from_secs(self.client_timeout_secs),
            highscores: Some(self.highscores),
            files_dir: self.files,
            loss_rate: self.loss_rate.clamp(0.0, 1.0),
            seed: self.seed,
            ..ServerConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();
    let server = Server::bind(args.into_config()).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down gracefully..."),
            Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
        }
        let _ = shutdown_tx.send(true);
    });

    server.run(shutdown_rx).await?;
    Ok(())
}
