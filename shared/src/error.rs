use crate::protocol::Message;
use thiserror::Error;

/// Failures of a framed connection.
///
/// Every variant is fatal to the connection it happened on, `Timeout`
/// included: a read that timed out may have consumed part of a frame, so
/// the stream can no longer be trusted to sit on a frame boundary.
#[derive(Debug, Error)]
pub enum NetError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("incompatible protocol version: expected {expected}, got {actual}")]
    IncompatibleProtocol { expected: u32, actual: u32 },

    #[error("another operation is already in flight on this connection")]
    ConcurrentOperation,

    #[error("peer sent nothing within the idle timeout")]
    Timeout,

    #[error("server is full")]
    ServerFull,
}

impl NetError {
    /// A message of the wrong kind arrived.
    pub fn unexpected(expected: &str, got: &Message) -> Self {
        NetError::Protocol(format!("expected {}, got {}", expected, got.kind()))
    }
}

impl From<bincode::Error> for NetError {
    fn from(e: bincode::Error) -> Self {
        NetError::Protocol(e.to_string())
    }
}

/// Failures while building or loading a geodesic grid.
#[derive(Debug, Error)]
pub enum GridError {
    #[error("corrupt grid data: {0}")]
    CorruptGridData(String),

    #[error("grid size {0} is out of range (0..=7)")]
    InvalidSize(u32),

    #[error("grid file i/o error: {0}")]
    Io(#[from] std::io::Error),
}
