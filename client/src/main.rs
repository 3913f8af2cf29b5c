use clap::{Parser, Subcommand};
use client::config::EndpointConfig;
use client::download::{self, IDLE_TIMEOUT};
use client::game::{ClientSession, RemoteEvent};
use client::network::NetworkClient;
use log::info;
use shared::messages::{ClientMessage, ServerMessage};
use std::fs;
use std::path::PathBuf;
use tokio::net::UdpSocket;
use tokio::time::{sleep, Duration};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Endpoint file: server host, server port, local port, transfer port
    #[arg(short = 'c', long, default_value = "client.cfg")]
    config: PathBuf,

    #[command(subcommand)]
    command: Mode,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Join the session and log what the other players do
    Play {
        #[arg(short = 'n', long, default_value = "player")]
        name: String,

        /// Ask the server to start a game once joined
        #[arg(long)]
        start: bool,

        /// Leave after this many seconds; runs until Ctrl+C when omitted
        #[arg(long)]
        duration_secs: Option<u64>,
    },
    /// List the files the server offers
    List,
    /// Download one file
    Download {
        name: String,

        /// Where to write it; defaults to the file's own name
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,
    },
}

async fn play(
    endpoint: &EndpointConfig,
    name: &str,
    start: bool,
    duration: Option<Duration>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut network = NetworkClient::connect(endpoint.local_addr(), endpoint.server_addr()?).await?;
    let mut session = ClientSession::new();

    let reply = network.join(name, Duration::from_secs(5)).await?;
    session.apply(ServerMessage::ReplyPlayerJoin(reply));
    network.send(&ClientMessage::ClientReqHighscore)?;
    if start {
        network.send(&ClientMessage::GameStart)?;
    }

    let deadline = sleep(duration.unwrap_or_default());
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            msg = network.recv() => {
                let Some(msg) = msg else { break };
                for event in session.apply(msg) {
                    match &event {
                        RemoteEvent::GameOver { winner, name: winner_name, score } => {
                            info!("Game over, {} wins with {}", winner_name, score);
                            if let Some(submit) = session.submit_score(name, *winner) {
                                network.send(&submit)?;
                            }
                        }
                        RemoteEvent::HighScores(entries) => {
                            for (rank, entry) in entries.iter().enumerate() {
                                info!("{}. {} {}", rank + 1, entry.name, entry.score);
                            }
                        }
                        other => info!("{:?}", other),
                    }
                }
            }
            _ = &mut deadline, if duration.is_some() => break,
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, leaving...");
                break;
            }
        }
    }

    network.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let endpoint = EndpointConfig::load(&args.config)?;
    info!("Using endpoint file {}", args.config.display());

    match args.command {
        Mode::Play {
            name,
            start,
            duration_secs,
        } => play(&endpoint, &name, start, duration_secs.map(Duration::from_secs)).await?,
        Mode::List => {
            let socket = UdpSocket::bind(endpoint.local_addr()).await?;
            for name in download::list_files(&socket, endpoint.transfer_addr()?).await? {
                println!("{}", name);
            }
        }
        Mode::Download { name, output } => {
            let socket = UdpSocket::bind(endpoint.local_addr()).await?;
            let done = download::download(&socket, endpoint.transfer_addr()?, &name, IDLE_TIMEOUT).await?;
            let path = output.unwrap_or_else(|| PathBuf::from(&name));
            fs::write(&path, &done.data)?;
            info!("Wrote {} bytes to {}", done.data.len(), path.display());
        }
    }

    Ok(())
}
