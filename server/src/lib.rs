//! # Asteroids Session Server Library
//!
//! The server is the meeting point for up to four players. Clients simulate
//! their own ships, bullets and asteroid drift; the server keeps the canonical
//! roster, hands out entity ids, validates the transitions that decide a game
//! (collisions, scoring, game over) and relays everything else to the other
//! players.
//!
//! ## Architecture
//!
//! ### Single Dispatcher
//! A receiver task forwards datagrams over a channel to one
//! [`dispatcher::Dispatcher`], which owns the registry, the asteroid pool, the
//! bullet table and the high-score ledger. Nothing in the game path is shared
//! between tasks except the outbound queue.
//!
//! ### Batched Broadcast
//! Handlers never touch the socket. They push onto an
//! [`outbound::OutboundQueue`] with recipients resolved from the registry at
//! that moment; the broadcaster swaps the queue out every tick and sends.
//!
//! ### File Downloads
//! An optional second socket serves files with a sliding-window, per-frame
//! acknowledged transfer (see [`file_service`] and `shared::transfer`).
//!
//! ## Module Organization
//!
//! - `client_manager`: the four-slot registry and liveness tracking
//! - `entities`: asteroid pool and per-owner bullet table
//! - `game`: session phase, wave spawning and the game-over rule
//! - `highscores`: persisted top-five ledger
//! - `dispatcher`: command handlers and periodic work
//! - `outbound`: destination routing and the broadcaster task
//! - `file_service`: list and download requests over reliable transfer
//! - `network`: socket binding and task supervision
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//! use tokio::sync::watch;
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let server = Server::bind(ServerConfig::default()).await?;
//!     let (shutdown_tx, shutdown_rx) = watch::channel(false);
//!
//!     tokio::spawn(async move {
//!         let _ = tokio::signal::ctrl_c().await;
//!         let _ = shutdown_tx.send(true);
//!     });
//!
//!     server.run(shutdown_rx).await
//! }
//! ```

pub mod client_manager;
pub mod config;
pub mod dispatcher;
pub mod entities;
pub mod file_service;
pub mod game;
pub mod highscores;
pub mod network;
pub mod outbound;
