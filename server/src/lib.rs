//! # Game Server Library
//!
//! This library provides the authoritative server for the geodesic strategy
//! game. It owns the canonical world, applies client commands, advances game
//! time in fixed steps and lets every client catch up through a change log
//! instead of re-sending the whole world.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Simulation
//! Units live on the tiles of a geodesic grid. Every tick each unit carries
//! out its pending move order (or wanders), ages, and may expire. All of it
//! happens on the server; clients only replay what they are told.
//!
//! ### Change Replication
//! Every mutation made during a tick is recorded as a change record. Closing
//! the tick stamps the records with the new game time and appends them to a
//! bounded history. A polling client names the newest time it has applied
//! and receives exactly the blocks after it. Clients that fell behind the
//! retained history are resynchronized from a full snapshot.
//!
//! ### Client Management
//! Handles the lifecycle of client connections:
//! - Version handshake and capacity checks
//! - Streaming the grid and the unit table to joining clients
//! - Tracking each client's confirmed time and ready flag
//! - Cleanup on disconnect, I/O failure or idle timeout
//!
//! ## Architecture Design
//!
//! ### Tasks and One Lock
//! Every accepted TCP connection runs in its own task. A separate simulation
//! task ticks the game. They share a single `GameState` behind a
//! `tokio::sync::Mutex`, which is the only serialization point. No task holds
//! the lock across network I/O: responses are built under the lock and
//! written after it is released, so a slow client cannot stall a tick.
//!
//! ### Ready Signalling
//! The simulation ticks on a timer. A client that has caught up can also set
//! the ready flag in its poll; once every connected client is ready the
//! simulation ticks early and restarts the timer.
//!
//! ## Module Organization
//!
//! ### Change Log Module (`change_log`)
//! Per-tick change blocks, count or confirmation based retention, slicing
//! into `Part` responses and per-region scoped logs.
//!
//! ### Client Manager Module (`client_manager`)
//! Registered clients, their confirmed times and ready flags.
//!
//! ### Connection Module (`connection`)
//! The per-connection state machine: handshake, request handling, close.
//!
//! ### Game Module (`game`)
//! The authoritative state: units, tile occupancy, time and the tick itself.
//!
//! ### Network Module (`network`)
//! Server configuration, the accept loop and the simulation task.
//!
//! ### Unit Module (`unit`)
//! Unit classes and the movement and aging rules of a single unit.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::{Server, ServerConfig};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig {
//!         address: "127.0.0.1:4512".to_string(),
//!         grid_size: 3,
//!         tick_interval: Duration::from_millis(500),
//!         ..ServerConfig::default()
//!     };
//!
//!     // Builds the grid, spawns the initial units and binds the listener
//!     let server = Server::bind(config).await?;
//!
//!     // Runs the simulation task and accepts clients until the listener fails
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod change_log;
pub mod client_manager;
pub mod connection;
pub mod game;
pub mod network;
pub mod unit;
