//! # Game Client Library
//!
//! This library provides a headless client for the geodesic strategy game.
//! It joins an authoritative server, downloads the grid and the unit table,
//! and then keeps a local copy of the world current by replaying the change
//! records the server hands out on each poll.
//!
//! ## Architecture Overview
//!
//! ### Confirmed Time
//! The client remembers the newest game time whose changes it has applied.
//! Every poll sends that time, and the server answers with exactly the
//! change blocks that came after it, or asks the client to wait when there
//! are none. A client that fell behind the server's retained history is
//! sent a full snapshot instead and rebuilds its unit table from it.
//!
//! ### Commands
//! Move orders are queued locally and sent with the next poll. The server
//! validates them; a bad reference is answered with a refusal and none of
//! the poll's commands take effect.
//!
//! ### Ready Flag
//! A poll may mark the client ready. Once every connected client is ready
//! the server ticks early instead of waiting for its timer.
//!
//! ## Module Organization
//!
//! ### Game Module (`game`)
//! The local world: grid, units and queued commands, plus the replay rules
//! for every change record kind.
//!
//! ### Network Module (`network`)
//! Handshake, polling and disconnect over one TCP connection.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::{Client, PollOutcome};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = Client::join("127.0.0.1:4512").await?;
//!
//!     loop {
//!         match client.poll(true).await? {
//!             PollOutcome::Updated { time, .. } => println!("now at {}", time),
//!             PollOutcome::Wait { update_length } => {
//!                 tokio::time::sleep(Duration::from_millis(update_length as u64)).await
//!             }
//!             PollOutcome::Resynced { time, .. } => println!("resynced at {}", time),
//!         }
//!     }
//! }
//! ```

pub mod game;
pub mod network;
