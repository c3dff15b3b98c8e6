use crate::game::{ClientGame, ReplayError};
use log::{debug, info, warn};
use shared::protocol::{ChangeRecord, ConnectionResult, Message, Request, Response, UnitRecord};
use shared::{GameTime, GeodesicGrid, NetError, RegionId, Transport, PROTOCOL_VERSION};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::sleep;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Net(#[from] NetError),
    #[error("could not replay server changes: {0}")]
    Replay(#[from] ReplayError),
    #[error("server rejected the connection")]
    Rejected,
    #[error("server refused the request: {0}")]
    Refused(String),
}

/// What one poll brought back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// New blocks were applied; the client is now at `time`.
    Updated { time: GameTime, changes: usize },
    /// The server had nothing newer.
    Wait { update_length: u32 },
    /// The client fell too far behind and its units were replaced.
    Resynced { time: GameTime, units: usize },
}

pub struct Client<S = TcpStream> {
    transport: Transport<S>,
    game: ClientGame,
    update_length: u32,
    scope: Option<RegionId>,
    fake_ping_ms: u64,
    /// Set when a slice failed to replay; the next poll asks for a full table.
    needs_resync: bool,
}

impl Client<TcpStream> {
    pub async fn join(addr: &str) -> Result<Self, ClientError> {
        info!("Connecting to server at {}...", addr);
        let transport = Transport::connect(addr).await?;
        Self::join_over(transport).await
    }
}

impl<S> Client<S>
where
    S: AsyncRead + AsyncWrite,
{
    /// Runs the handshake and downloads the grid and the unit table.
    pub async fn join_over(transport: Transport<S>) -> Result<Self, ClientError> {
        transport
            .write_message(&Message::ConnectionRequest {
                protocol_version: PROTOCOL_VERSION,
            })
            .await?;
        match transport.read_message().await? {
            Message::ConnectionResponse {
                result: ConnectionResult::Allowed,
            } => {}
            Message::ConnectionResponse {
                result: ConnectionResult::Rejected,
            } => return Err(ClientError::Rejected),
            other => return Err(NetError::unexpected("ConnectionResponse", &other).into()),
        }

        let grid = GeodesicGrid::receive_from(&transport).await?;
        let (count, time) = match transport.read_message().await? {
            Message::UnitCount { count, time } => (count, time),
            other => return Err(NetError::unexpected("UnitCount", &other).into()),
        };
        if count as usize > grid.tile_count() {
            return Err(NetError::Protocol(format!(
                "{} units announced for {} tiles",
                count,
                grid.tile_count()
            ))
            .into());
        }
        let mut units: Vec<UnitRecord> = Vec::with_capacity(count as usize);
        for _ in 0..count {
            match transport.read_message().await? {
                Message::Unit(unit) => units.push(unit),
                other => return Err(NetError::unexpected("Unit", &other).into()),
            }
        }

        info!(
            "Joined at time {}: {} tiles, {} units",
            time,
            grid.tile_count(),
            units.len()
        );
        Ok(Client {
            transport,
            game: ClientGame::new(grid, time, units),
            update_length: 0,
            scope: None,
            fake_ping_ms: 0,
            needs_resync: false,
        })
    }

    pub fn game(&self) -> &ClientGame {
        &self.game
    }

    pub fn game_mut(&mut self) -> &mut ClientGame {
        &mut self.game
    }

    /// Delay the server last recommended between polls, in milliseconds.
    pub fn update_length(&self) -> u32 {
        self.update_length
    }

    pub fn scope(&self) -> Option<RegionId> {
        self.scope
    }

    /// Whether the next poll will ask for a full resynchronization.
    pub fn needs_resync(&self) -> bool {
        self.needs_resync
    }

    /// Restricts future polls to one region's change log. The server answers
    /// the first poll after a change with the new scope's full unit table.
    pub fn set_scope(&mut self, scope: Option<RegionId>) {
        self.scope = scope;
    }

    /// Delays every request to simulate a slow link.
    pub fn set_fake_ping(&mut self, ms: u64) {
        self.fake_ping_ms = ms;
    }

    /// Sends queued commands with the client's confirmed time and applies
    /// whatever the server returns.
    ///
    /// `ready` tells the server this client is caught up and would like the
    /// next tick as soon as everyone else is too.
    pub async fn poll(&mut self, ready: bool) -> Result<PollOutcome, ClientError> {
        if self.fake_ping_ms > 0 {
            sleep(Duration::from_millis(self.fake_ping_ms / 2)).await;
        }

        let mut request = Request::get_time(self.game.time())
            .with_commands(self.game.take_commands())
            .scoped(self.scope);
        if ready {
            request = request.ready();
        }
        if self.needs_resync {
            request = request.resync();
        }

        let mut changes: Vec<ChangeRecord> = Vec::new();
        let last = self
            .transport
            .request(&request, |response| {
                if let Response::Part { changes: part } = response {
                    changes.extend_from_slice(part);
                }
            })
            .await?;

        match last {
            Response::Ok { time, update_length } => {
                let count = changes.len();
                if let Err(e) = self.game.apply_all(changes) {
                    warn!("Discarded changes up to time {}: {}", time, e);
                    self.needs_resync = true;
                    return Err(e.into());
                }
                self.game.set_time(time);
                self.update_length = update_length;
                debug!("Applied {} changes, now at time {}", count, time);
                Ok(PollOutcome::Updated { time, changes: count })
            }
            Response::PleaseWait { update_length } => {
                self.update_length = update_length;
                Ok(PollOutcome::Wait { update_length })
            }
            Response::Changes { time, changes } => {
                let units = changes.len();
                info!("Resynchronizing {} units at time {}", units, time);
                if let Err(e) = self.game.resync(time, changes) {
                    self.needs_resync = true;
                    return Err(e.into());
                }
                self.needs_resync = false;
                Ok(PollOutcome::Resynced { time, units })
            }
            Response::Nok { reason } => Err(ClientError::Refused(reason)),
            Response::Part { .. } => Err(NetError::Protocol("slice ended with a part".to_string()).into()),
        }
    }

    pub async fn disconnect(self) -> Result<(), ClientError> {
        self.transport
            .write_message(&Message::Request(Request::disconnect()))
            .await?;
        info!("Disconnected");
        Ok(())
    }
}
