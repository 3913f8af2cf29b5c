//! # Asteroids Session Client Library
//!
//! Client-side half of the session protocol. Simulation and drawing belong to
//! the game collaborator; this crate gets messages to and from the server and
//! keeps a mirror of what the other players see.
//!
//! ## Module Organization
//!
//! ### Config Module (`config`)
//! Reads the endpoint file: server host and port, local port, and the
//! optional file transfer port.
//!
//! ### Network Module (`network`)
//! [`network::NetworkClient`] owns the UDP socket. A sender task flushes the
//! outgoing queue on a short tick and keeps the slot alive with heartbeats; a
//! receiver task decodes server messages into an incoming channel.
//!
//! ### Game Module (`game`)
//! [`game::ClientSession`] applies server messages to the local mirror and
//! reports what changed as [`game::RemoteEvent`]s. It also builds the
//! messages for local intents, predicting bullet ids from this slot's ring.
//!
//! ### Download Module (`download`)
//! Lists and downloads files from the server's transfer socket, acknowledging
//! every frame.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::game::ClientSession;
//! use client::network::NetworkClient;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut network =
//!         NetworkClient::connect("0.0.0.0:0".parse()?, "127.0.0.1:7777".parse()?).await?;
//!     let mut session = ClientSession::new();
//!
//!     let reply = network.join("ada", Duration::from_secs(3)).await?;
//!     session.apply(shared::messages::ServerMessage::ReplyPlayerJoin(reply));
//!
//!     while let Some(msg) = network.recv().await {
//!         for event in session.apply(msg) {
//!             println!("{:?}", event);
//!         }
//!     }
//!     network.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod download;
pub mod game;
pub mod network;
