//! Types shared by the server and its clients: the geodesic grid, the wire
//! messages and the framed transport that carries them.

pub mod error;
pub mod geometry;
pub mod grid;
pub mod protocol;
pub mod transport;

pub use error::{GridError, NetError};
pub use geometry::Vec3;
pub use grid::{GeodesicGrid, Tile};
pub use protocol::{ChangeRecord, Command, Message, Request, RequestKind, Response, PROTOCOL_VERSION};
pub use transport::Transport;

pub type TileId = u32;
/// Unit ids start at 1; 0 marks an empty tile.
pub type UnitId = u32;
pub type GameTime = u64;
pub type VisualCode = u32;
/// Id of the base tile a region is centred on.
pub type RegionId = u32;
