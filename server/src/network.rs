//! Server network layer: the TCP accept loop and the simulation task

use crate::change_log::Retention;
use crate::connection::Connection;
use crate::game::{GameState, TIME_STEP};
use log::{debug, error, info, warn};
use shared::{GameTime, GeodesicGrid, GridError, NetError};
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, Notify};
use tokio::time::{interval, MissedTickBehavior};

pub const DEFAULT_PORT: u16 = 4512;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to prepare the grid: {0}")]
    Grid(#[from] GridError),
    #[error("network error: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything the server needs to start.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub address: String,
    /// Subdivision passes for a generated grid.
    pub grid_size: u32,
    pub sea_level: i32,
    /// Load this grid instead of generating one.
    pub grid_file: Option<PathBuf>,
    /// Write the generated grid here.
    pub save_grid: Option<PathBuf>,
    pub tick_interval: Duration,
    pub initial_units: usize,
    pub retention: Retention,
    pub max_clients: usize,
    /// Close connections that send nothing for this long.
    pub idle_timeout: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: format!("127.0.0.1:{}", DEFAULT_PORT),
            grid_size: 4,
            sea_level: 5000,
            grid_file: None,
            save_grid: None,
            tick_interval: Duration::from_millis(1000),
            initial_units: 15,
            retention: Retention::default(),
            max_clients: 32,
            idle_timeout: None,
        }
    }
}

/// State shared by the accept loop, the simulation task and every
/// connection task.
#[derive(Clone)]
pub struct ServerContext {
    pub state: Arc<Mutex<GameState>>,
    /// Immutable, so it is read without the state lock.
    pub grid: Arc<GeodesicGrid>,
    /// Raised by a connection whose client is ready for the next tick.
    pub game_event: Arc<Notify>,
    /// Suggested delay between polls, in milliseconds.
    pub update_length: u32,
    pub idle_timeout: Option<Duration>,
}

/// Main server: owns the listener and the shared context
pub struct Server {
    listener: TcpListener,
    context: ServerContext,
    tick_interval: Duration,
}

impl Server {
    /// Prepares the grid and the initial population, then binds the listener.
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        let grid = match &config.grid_file {
            Some(path) => GeodesicGrid::load_file(path)?,
            None => GeodesicGrid::generate(config.grid_size, config.sea_level)?,
        };
        if let Some(path) = &config.save_grid {
            grid.save_file(path)?;
        }
        let grid = Arc::new(grid);

        let mut state = GameState::new(Arc::clone(&grid), config.retention, config.max_clients);
        state.populate(config.initial_units);

        let listener = TcpListener::bind(&config.address).await?;
        info!("Server listening on {}", listener.local_addr()?);

        Ok(Server {
            listener,
            context: ServerContext {
                state: Arc::new(Mutex::new(state)),
                grid,
                game_event: Arc::new(Notify::new()),
                update_length: config.tick_interval.as_millis().min(u32::MAX as u128) as u32,
                idle_timeout: config.idle_timeout,
            },
            tick_interval: config.tick_interval,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn state(&self) -> Arc<Mutex<GameState>> {
        Arc::clone(&self.context.state)
    }

    pub fn game_event(&self) -> Arc<Notify> {
        Arc::clone(&self.context.game_event)
    }

    pub fn context(&self) -> &ServerContext {
        &self.context
    }

    /// Runs the simulation and accepts connections until the listener fails.
    pub async fn run(self) -> Result<(), ServerError> {
        tokio::spawn(run_simulation(
            Arc::clone(&self.context.state),
            Arc::clone(&self.context.game_event),
            self.tick_interval,
        ));

        info!("Server started successfully");
        loop {
            let (stream, addr) = self.listener.accept().await?;
            if let Err(e) = stream.set_nodelay(true) {
                warn!("Failed to set TCP_NODELAY for {}: {}", addr, e);
            }
            debug!("Accepted connection from {}", addr);

            let connection = Connection::new(stream, addr, self.context.clone());
            tokio::spawn(async move {
                if let Err(e) = connection.run().await {
                    log_connection_error(addr, &e);
                }
            });
        }
    }
}

fn log_connection_error(addr: SocketAddr, e: &NetError) {
    match e {
        NetError::Io(io) if io.kind() == ErrorKind::UnexpectedEof => {
            info!("Connection from {} closed by peer", addr)
        }
        NetError::Timeout => info!("Connection from {} timed out", addr),
        NetError::IncompatibleProtocol { .. } | NetError::ServerFull => {
            warn!("Connection from {} rejected: {}", addr, e)
        }
        _ => error!("Connection from {} failed: {}", addr, e),
    }
}

/// Ticks the game on a timer, or early once every client has polled with
/// the ready flag set.
pub async fn run_simulation(state: Arc<Mutex<GameState>>, game_event: Arc<Notify>, tick_interval: Duration) {
    let mut timer = interval(tick_interval);
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    // Skip the first tick since it fires immediately
    timer.tick().await;

    loop {
        tokio::select! {
            _ = timer.tick() => {
                let time = state.lock().await.tick();
                log_tick(time);
            }
            _ = game_event.notified() => {
                let mut state = state.lock().await;
                if state.clients().all_ready() {
                    let time = state.tick();
                    drop(state);
                    timer.reset();
                    log_tick(time);
                }
            }
        }
    }
}

fn log_tick(time: GameTime) {
    if (time / TIME_STEP) % 60 == 0 {
        info!("Game time {}", time);
    }
}
