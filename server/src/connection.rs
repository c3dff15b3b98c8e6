//! One client connection, from handshake to close.
//!
//! A connection moves through `Connected → AwaitingHandshake → Active →
//! Closed`. While active it serves one request at a time: the game state is
//! locked only to apply commands and build the responses, which are written
//! after the guard is dropped.

use crate::network::ServerContext;
use log::{debug, info, warn};
use shared::protocol::{ConnectionResult, Message, Request, RequestKind, PROTOCOL_VERSION};
use shared::{NetError, Transport};
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    AwaitingHandshake,
    Active,
    Closed,
}

pub struct Connection<S = TcpStream> {
    transport: Transport<S>,
    addr: SocketAddr,
    context: ServerContext,
    state: ConnectionState,
    client_id: Option<u32>,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite,
{
    pub fn new(stream: S, addr: SocketAddr, context: ServerContext) -> Self {
        Self {
            transport: Transport::new(stream),
            addr,
            context,
            state: ConnectionState::Connected,
            client_id: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Serves the connection until the client disconnects or fails, then
    /// unregisters it.
    pub async fn run(mut self) -> Result<(), NetError> {
        let result = self.serve().await;
        self.close().await;
        result
    }

    async fn serve(&mut self) -> Result<(), NetError> {
        self.state = ConnectionState::AwaitingHandshake;
        self.handshake().await?;
        self.state = ConnectionState::Active;

        while self.state == ConnectionState::Active {
            let request = self.next_request().await?;
            self.handle_request(request).await?;
        }
        Ok(())
    }

    async fn reject(&self) -> Result<(), NetError> {
        self.transport
            .write_message(&Message::ConnectionResponse {
                result: ConnectionResult::Rejected,
            })
            .await
    }

    async fn handshake(&mut self) -> Result<(), NetError> {
        let version = match self.transport.read_message().await? {
            Message::ConnectionRequest { protocol_version } => protocol_version,
            other => return Err(NetError::unexpected("ConnectionRequest", &other)),
        };
        if version != PROTOCOL_VERSION {
            warn!(
                "Rejecting {}: protocol version {} (expected {})",
                self.addr, version, PROTOCOL_VERSION
            );
            self.reject().await?;
            return Err(NetError::IncompatibleProtocol {
                expected: PROTOCOL_VERSION,
                actual: version,
            });
        }

        let (client_id, time, units) = {
            let mut state = self.context.state.lock().await;
            let (time, units) = state.snapshot();
            let client_id = state.clients_mut().add_client(self.addr, time);
            (client_id, time, units)
        };
        let client_id = match client_id {
            Some(id) => id,
            None => {
                warn!("Rejecting {}: server full", self.addr);
                self.reject().await?;
                return Err(NetError::ServerFull);
            }
        };
        self.client_id = Some(client_id);

        self.transport
            .write_message(&Message::ConnectionResponse {
                result: ConnectionResult::Allowed,
            })
            .await?;
        self.context.grid.send_to(&self.transport).await?;

        let mut messages = Vec::with_capacity(units.len() + 1);
        messages.push(Message::UnitCount {
            count: units.len() as u32,
            time,
        });
        messages.extend(units.into_iter().map(Message::Unit));
        self.transport.write_all_messages(&messages).await?;

        info!(
            "Client {} joined at time {} with {} units",
            client_id,
            time,
            messages.len() - 1
        );
        Ok(())
    }

    async fn next_request(&self) -> Result<Request, NetError> {
        let message = match self.context.idle_timeout {
            Some(limit) => self.transport.read_message_timeout(limit).await?,
            None => self.transport.read_message().await?,
        };
        match message {
            Message::Request(request) => Ok(request),
            other => Err(NetError::unexpected("Request", &other)),
        }
    }

    async fn handle_request(&mut self, request: Request) -> Result<(), NetError> {
        let client_id = match self.client_id {
            Some(id) => id,
            None => return Err(NetError::Protocol("request before handshake".to_string())),
        };

        match request.kind {
            RequestKind::Disconnect => {
                debug!("Client {} asked to disconnect", client_id);
                self.state = ConnectionState::Closed;
                Ok(())
            }
            RequestKind::GetTime => {
                let (responses, signal) = {
                    let mut state = self.context.state.lock().await;
                    let responses = state.poll(client_id, &request, self.context.update_length);
                    let ready = state.clients().get(client_id).map_or(false, |c| c.ready);
                    (responses, request.last && ready)
                };
                if signal {
                    self.context.game_event.notify_one();
                }

                let messages: Vec<Message> = responses.into_iter().map(Message::Response).collect();
                self.transport.write_all_messages(&messages).await
            }
        }
    }

    async fn close(&mut self) {
        if let Some(client_id) = self.client_id.take() {
            let mut state = self.context.state.lock().await;
            if state.clients_mut().remove_client(&client_id) {
                // The remaining clients may all be ready now.
                self.context.game_event.notify_one();
            }
        }
        self.state = ConnectionState::Closed;
    }
}
