//! Message kinds exchanged between server and clients.
//!
//! Every frame on the wire carries exactly one [`Message`]. Requests and
//! responses are closed enums so both ends can match exhaustively.

use crate::geometry::Vec3;
use crate::{GameTime, RegionId, TileId, UnitId, VisualCode};
use serde::{Deserialize, Serialize};

/// Bumped whenever any message layout changes.
pub const PROTOCOL_VERSION: u32 = 4;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Message {
    ConnectionRequest {
        protocol_version: u32,
    },
    ConnectionResponse {
        result: ConnectionResult,
    },

    GridSize {
        tile_count: u32,
        edge_count: u32,
        scale: f32,
        sea_level: i32,
    },
    TileList {
        tiles: Vec<TileRecord>,
    },
    EdgeList {
        edges: Vec<EdgeRecord>,
    },

    UnitCount {
        count: u32,
        time: GameTime,
    },
    Unit(UnitRecord),

    Request(Request),
    Response(Response),
}

impl Message {
    /// Short name used in logs and protocol errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::ConnectionRequest { .. } => "ConnectionRequest",
            Message::ConnectionResponse { .. } => "ConnectionResponse",
            Message::GridSize { .. } => "GridSize",
            Message::TileList { .. } => "TileList",
            Message::EdgeList { .. } => "EdgeList",
            Message::UnitCount { .. } => "UnitCount",
            Message::Unit(_) => "Unit",
            Message::Request(_) => "Request",
            Message::Response(_) => "Response",
        }
    }
}

impl From<Request> for Message {
    fn from(request: Request) -> Self {
        Message::Request(request)
    }
}

impl From<Response> for Message {
    fn from(response: Response) -> Self {
        Message::Response(response)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionResult {
    Allowed,
    Rejected,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct TileRecord {
    pub tag: TileId,
    pub height: i32,
    pub position: Vec3,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct EdgeRecord {
    pub tile_a: TileId,
    pub tile_b: TileId,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct UnitRecord {
    pub tag: UnitId,
    pub tile: TileId,
    pub visual: VisualCode,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Disconnect,
    GetTime,
}

/// Move order for one unit.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    pub unit: UnitId,
    pub target: TileId,
}

/// A client poll.
///
/// `time` is the latest tick the client has applied (its confirmed time);
/// `last` marks the client ready for the next tick; `scope` selects a
/// region-scoped change log instead of the global one. `resync` asks for a
/// full unit table instead of a change-log slice, which a client does after
/// failing to replay a slice.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Request {
    pub kind: RequestKind,
    pub time: Option<GameTime>,
    pub last: bool,
    pub scope: Option<RegionId>,
    pub resync: bool,
    pub commands: Vec<Command>,
}

impl Request {
    pub fn disconnect() -> Self {
        Self {
            kind: RequestKind::Disconnect,
            time: None,
            last: false,
            scope: None,
            resync: false,
            commands: Vec::new(),
        }
    }

    pub fn get_time(time: GameTime) -> Self {
        Self {
            kind: RequestKind::GetTime,
            time: Some(time),
            last: false,
            scope: None,
            resync: false,
            commands: Vec::new(),
        }
    }

    pub fn with_commands(mut self, commands: Vec<Command>) -> Self {
        self.commands = commands;
        self
    }

    pub fn ready(mut self) -> Self {
        self.last = true;
        self
    }

    pub fn scoped(mut self, scope: Option<RegionId>) -> Self {
        self.scope = scope;
        self
    }

    pub fn resync(mut self) -> Self {
        self.resync = true;
        self
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum Response {
    /// Closes a change-log slice with the authoritative time and the
    /// recommended delay before the next poll, in milliseconds.
    Ok { time: GameTime, update_length: u32 },
    Nok { reason: String },
    /// One block (or a piece of one) of a change-log slice; more follow.
    Part { changes: Vec<ChangeRecord> },
    /// Nothing newer than the client's confirmed time yet.
    PleaseWait { update_length: u32 },
    /// Full resynchronization: the client must replace its unit table
    /// with these `Enter` records.
    Changes {
        time: GameTime,
        changes: Vec<ChangeRecord>,
    },
}

impl Response {
    pub fn is_partial(&self) -> bool {
        matches!(self, Response::Part { .. })
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum ChangeRecord {
    Move {
        unit: UnitId,
        tile: TileId,
    },
    CommandDone {
        unit: UnitId,
    },
    Remove {
        unit: UnitId,
    },
    Enter {
        unit: UnitId,
        tile: TileId,
        visual: VisualCode,
    },
    Leave {
        unit: UnitId,
        tile: TileId,
    },
}

impl ChangeRecord {
    pub fn unit(&self) -> UnitId {
        match *self {
            ChangeRecord::Move { unit, .. }
            | ChangeRecord::CommandDone { unit }
            | ChangeRecord::Remove { unit }
            | ChangeRecord::Enter { unit, .. }
            | ChangeRecord::Leave { unit, .. } => unit,
        }
    }
}
