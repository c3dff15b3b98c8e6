//! Geodesic grid: a subdivided icosahedron projected onto the unit sphere.
//!
//! The grid is built once, either procedurally or from a saved snapshot, and
//! never changes shape afterwards. Servers share it between connection tasks
//! behind an `Arc` without locking.

use crate::error::{GridError, NetError};
use crate::geometry::{sort_neighbours, Vec3};
use crate::protocol::{EdgeRecord, Message, TileRecord};
use crate::transport::Transport;
use crate::{RegionId, TileId};
use bincode::{deserialize, serialize};
use log::{debug, info};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tokio::io::{AsyncRead, AsyncWrite};

/// Elevations are drawn from `[0, HEIGHT_RANGE)`.
pub const HEIGHT_RANGE: i32 = 10000;
pub const MAX_GRID_SIZE: u32 = 7;
pub const BASE_TILE_COUNT: usize = 12;

/// Records per `TileList`/`EdgeList` message when streaming a grid.
pub const TRANSFER_BATCH: usize = 100;

const PHI: f32 = 1.618_034;

/// Loaded positions must lie this close to the unit sphere.
const UNIT_TOLERANCE: f32 = 1e-3;

const BASE_VERTICES: [Vec3; BASE_TILE_COUNT] = [
    Vec3::new(0.0, 1.0, PHI),
    Vec3::new(0.0, 1.0, -PHI),
    Vec3::new(0.0, -1.0, PHI),
    Vec3::new(0.0, -1.0, -PHI),
    Vec3::new(1.0, PHI, 0.0),
    Vec3::new(1.0, -PHI, 0.0),
    Vec3::new(-1.0, PHI, 0.0),
    Vec3::new(-1.0, -PHI, 0.0),
    Vec3::new(PHI, 0.0, 1.0),
    Vec3::new(PHI, 0.0, -1.0),
    Vec3::new(-PHI, 0.0, 1.0),
    Vec3::new(-PHI, 0.0, -1.0),
];

const BASE_EDGES: [(TileId, TileId); 30] = [
    (0, 2), (0, 4), (0, 6), (0, 8), (0, 10),
    (1, 3), (1, 4), (1, 6), (1, 9), (1, 11),
    (2, 5), (2, 7), (2, 8), (2, 10),
    (3, 5), (3, 7), (3, 9), (3, 11),
    (4, 6), (4, 8), (4, 9),
    (5, 7), (5, 8), (5, 9),
    (6, 10), (6, 11),
    (7, 10), (7, 11),
    (8, 9),
    (10, 11),
];

/// Number of tiles after `size` subdivision passes.
pub fn tile_count(size: u32) -> usize {
    10 * 4usize.pow(size) + 2
}

pub fn edge_count(size: u32) -> usize {
    30 * 4usize.pow(size)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tile {
    id: TileId,
    position: Vec3,
    height: i32,
    neighbours: Vec<TileId>,
}

impl Tile {
    pub fn id(&self) -> TileId {
        self.id
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    /// Adjacent tiles, lowest-z neighbour first and the rest in angular order.
    pub fn neighbours(&self) -> &[TileId] {
        &self.neighbours
    }

    pub fn is_neighbour(&self, other: TileId) -> bool {
        self.neighbours.contains(&other)
    }
}

/// An unordered pair of adjacent tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub a: TileId,
    pub b: TileId,
}

impl Edge {
    pub fn new(a: TileId, b: TileId) -> Self {
        Edge { a, b }
    }
}

/// On-disk form of a grid.
#[derive(Debug, Serialize, Deserialize)]
struct GridSnapshot {
    sea_level: i32,
    tiles: Vec<TileRecord>,
    edges: Vec<EdgeRecord>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeodesicGrid {
    tiles: Vec<Tile>,
    edges: Vec<Edge>,
    regions: Vec<RegionId>,
    sea_level: i32,
}

/// Tile data while subdivision is still in progress.
struct Builder {
    positions: Vec<Vec3>,
    heights: Vec<i32>,
    edges: Vec<Edge>,
}

impl Builder {
    fn icosahedron<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Builder {
            positions: BASE_VERTICES.iter().map(Vec3::normalize).collect(),
            heights: (0..BASE_TILE_COUNT)
                .map(|_| rng.gen_range(0..HEIGHT_RANGE))
                .collect(),
            edges: BASE_EDGES.iter().map(|&(a, b)| Edge::new(a, b)).collect(),
        }
    }

    /// Splits every edge at its midpoint and closes the ring of new tiles
    /// around each existing one. Older tiles keep their ids.
    fn subdivide<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let old_count = self.positions.len();
        let old_edges = std::mem::take(&mut self.edges);

        for edge in &old_edges {
            let a = self.positions[edge.a as usize];
            let b = self.positions[edge.b as usize];
            let mid = self.positions.len() as TileId;

            let jitter = rng.gen_range(1..=100) as f32 / 100.0 - 0.5;
            let base = (self.heights[edge.a as usize] + self.heights[edge.b as usize]) / 2;
            let height = base as f32 + jitter * a.distance(&b) * HEIGHT_RANGE as f32;

            self.positions.push(a.add(&b).normalize());
            self.heights.push(height as i32);
            self.edges.push(Edge::new(mid, edge.a));
            self.edges.push(Edge::new(mid, edge.b));
        }

        let adjacency = adjacency(self.positions.len(), &self.edges);
        for tile in 0..old_count {
            let ring = sort_neighbours(self.positions[tile], &adjacency[tile], |id| {
                self.positions[id as usize]
            });
            for (i, &from) in ring.iter().enumerate() {
                self.edges.push(Edge::new(from, ring[(i + 1) % ring.len()]));
            }
        }
    }
}

fn adjacency(tile_count: usize, edges: &[Edge]) -> Vec<Vec<TileId>> {
    let mut adjacency = vec![Vec::with_capacity(6); tile_count];
    for edge in edges {
        adjacency[edge.a as usize].push(edge.b);
        adjacency[edge.b as usize].push(edge.a);
    }
    adjacency
}

fn corrupt(reason: impl Into<String>) -> GridError {
    GridError::CorruptGridData(reason.into())
}

impl GeodesicGrid {
    /// Builds a grid with `size` subdivision passes using `rng` for elevations.
    pub fn build<R: Rng + ?Sized>(size: u32, sea_level: i32, rng: &mut R) -> Result<Self, GridError> {
        if size > MAX_GRID_SIZE {
            return Err(GridError::InvalidSize(size));
        }

        let mut builder = Builder::icosahedron(rng);
        for _ in 0..size {
            builder.subdivide(rng);
        }
        let grid = Self::assemble(builder.positions, builder.heights, builder.edges, sea_level)?;
        info!(
            "Built geodesic grid of size {} ({} tiles, {} edges)",
            size,
            grid.tile_count(),
            grid.edge_count()
        );
        Ok(grid)
    }

    pub fn generate(size: u32, sea_level: i32) -> Result<Self, GridError> {
        Self::build(size, sea_level, &mut rand::thread_rng())
    }

    /// Validates raw tile and edge data and derives the sorted adjacency.
    fn assemble(
        positions: Vec<Vec3>,
        heights: Vec<i32>,
        edges: Vec<Edge>,
        sea_level: i32,
    ) -> Result<Self, GridError> {
        let count = positions.len();
        if count < BASE_TILE_COUNT || heights.len() != count {
            return Err(corrupt(format!("grid has {} tiles", count)));
        }
        for (id, position) in positions.iter().enumerate() {
            let length = position.length();
            if !length.is_finite() || (length - 1.0).abs() > UNIT_TOLERANCE {
                return Err(corrupt(format!(
                    "tile {} lies off the unit sphere (length {})",
                    id, length
                )));
            }
        }

        let mut seen = HashSet::with_capacity(edges.len());
        for edge in &edges {
            if edge.a as usize >= count || edge.b as usize >= count {
                return Err(corrupt(format!(
                    "edge {}-{} points outside {} tiles",
                    edge.a, edge.b, count
                )));
            }
            if edge.a == edge.b {
                return Err(corrupt(format!("tile {} is connected to itself", edge.a)));
            }
            if !seen.insert((edge.a.min(edge.b), edge.a.max(edge.b))) {
                return Err(corrupt(format!("duplicate edge {}-{}", edge.a, edge.b)));
            }
        }

        let adjacency = adjacency(count, &edges);
        let mut tiles = Vec::with_capacity(count);
        for (id, (neighbours, (&position, &height))) in adjacency
            .iter()
            .zip(positions.iter().zip(heights.iter()))
            .enumerate()
        {
            if !(5..=6).contains(&neighbours.len()) {
                return Err(corrupt(format!(
                    "tile {} has {} neighbours",
                    id,
                    neighbours.len()
                )));
            }
            tiles.push(Tile {
                id: id as TileId,
                position,
                height,
                neighbours: sort_neighbours(position, neighbours, |n| positions[n as usize]),
            });
        }

        let regions = positions
            .iter()
            .map(|position| nearest_base_tile(&positions[..BASE_TILE_COUNT], position))
            .collect();

        Ok(GeodesicGrid {
            tiles,
            edges,
            regions,
            sea_level,
        })
    }

    pub fn load(bytes: &[u8]) -> Result<Self, GridError> {
        let snapshot: GridSnapshot =
            deserialize(bytes).map_err(|e| corrupt(format!("undecodable snapshot: {}", e)))?;

        for (index, record) in snapshot.tiles.iter().enumerate() {
            if record.tag as usize != index {
                return Err(corrupt(format!(
                    "tile at index {} carries tag {}",
                    index, record.tag
                )));
            }
        }

        let positions = snapshot.tiles.iter().map(|t| t.position).collect();
        let heights = snapshot.tiles.iter().map(|t| t.height).collect();
        let edges = snapshot
            .edges
            .iter()
            .map(|e| Edge::new(e.tile_a, e.tile_b))
            .collect();
        Self::assemble(positions, heights, edges, snapshot.sea_level)
    }

    pub fn load_file<P: AsRef<Path>>(path: P) -> Result<Self, GridError> {
        let bytes = std::fs::read(path.as_ref())?;
        let grid = Self::load(&bytes)?;
        info!(
            "Loaded grid with {} tiles from {}",
            grid.tile_count(),
            path.as_ref().display()
        );
        Ok(grid)
    }

    pub fn save(&self) -> Result<Vec<u8>, GridError> {
        let snapshot = GridSnapshot {
            sea_level: self.sea_level,
            tiles: self.tile_records(),
            edges: self.edge_records(),
        };
        serialize(&snapshot).map_err(|e| corrupt(e.to_string()))
    }

    pub fn save_file<P: AsRef<Path>>(&self, path: P) -> Result<(), GridError> {
        std::fs::write(path.as_ref(), self.save()?)?;
        info!("Saved grid to {}", path.as_ref().display());
        Ok(())
    }

    pub fn tile(&self, id: TileId) -> Option<&Tile> {
        self.tiles.get(id as usize)
    }

    pub fn tiles(&self) -> &[Tile] {
        &self.tiles
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn tile_count(&self) -> usize {
        self.tiles.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn sea_level(&self) -> i32 {
        self.sea_level
    }

    /// Distance from tile 0 to its first neighbour; the typical tile spacing.
    pub fn scale(&self) -> f32 {
        let origin = &self.tiles[0];
        origin.position.distance(&self.tiles[origin.neighbours[0] as usize].position)
    }

    /// The region a tile belongs to: the id of the nearest base tile.
    pub fn region(&self, id: TileId) -> Option<RegionId> {
        self.regions.get(id as usize).copied()
    }

    pub fn region_count(&self) -> usize {
        BASE_TILE_COUNT
    }

    fn tile_records(&self) -> Vec<TileRecord> {
        self.tiles
            .iter()
            .map(|t| TileRecord {
                tag: t.id,
                height: t.height,
                position: t.position,
            })
            .collect()
    }

    fn edge_records(&self) -> Vec<EdgeRecord> {
        self.edges
            .iter()
            .map(|e| EdgeRecord {
                tile_a: e.a,
                tile_b: e.b,
            })
            .collect()
    }

    /// The grid as the message sequence a joining client receives.
    pub fn to_messages(&self) -> Vec<Message> {
        let mut messages = vec![Message::GridSize {
            tile_count: self.tile_count() as u32,
            edge_count: self.edge_count() as u32,
            scale: self.scale(),
            sea_level: self.sea_level,
        }];
        messages.extend(
            self.tile_records()
                .chunks(TRANSFER_BATCH)
                .map(|chunk| Message::TileList {
                    tiles: chunk.to_vec(),
                }),
        );
        messages.extend(
            self.edge_records()
                .chunks(TRANSFER_BATCH)
                .map(|chunk| Message::EdgeList {
                    edges: chunk.to_vec(),
                }),
        );
        messages
    }

    pub async fn send_to<S>(&self, transport: &Transport<S>) -> Result<(), NetError>
    where
        S: AsyncRead + AsyncWrite,
    {
        let messages = self.to_messages();
        debug!("Sending grid in {} messages", messages.len());
        transport.write_all_messages(&messages).await
    }

    pub async fn receive_from<S>(transport: &Transport<S>) -> Result<Self, NetError>
    where
        S: AsyncRead + AsyncWrite,
    {
        let (max_tiles, max_edges) = (tile_count(MAX_GRID_SIZE), edge_count(MAX_GRID_SIZE));
        let (tile_count, edge_count, sea_level) = match transport.read_message().await? {
            Message::GridSize {
                tile_count,
                edge_count,
                sea_level,
                ..
            } => (tile_count as usize, edge_count as usize, sea_level),
            other => return Err(NetError::unexpected("GridSize", &other)),
        };
        if tile_count > max_tiles || edge_count > max_edges {
            return Err(NetError::Protocol(format!(
                "grid of {} tiles and {} edges exceeds the largest grid size",
                tile_count, edge_count
            )));
        }

        let mut tiles: Vec<TileRecord> = Vec::with_capacity(tile_count);
        while tiles.len() < tile_count {
            match transport.read_message().await? {
                Message::TileList { tiles: batch } => tiles.extend(batch),
                other => return Err(NetError::unexpected("TileList", &other)),
            }
        }

        let mut edges: Vec<EdgeRecord> = Vec::with_capacity(edge_count);
        while edges.len() < edge_count {
            match transport.read_message().await? {
                Message::EdgeList { edges: batch } => edges.extend(batch),
                other => return Err(NetError::unexpected("EdgeList", &other)),
            }
        }

        if tiles.len() != tile_count || edges.len() != edge_count {
            return Err(NetError::Protocol(format!(
                "grid announced {} tiles and {} edges, received {} and {}",
                tile_count,
                edge_count,
                tiles.len(),
                edges.len()
            )));
        }

        let snapshot = GridSnapshot {
            sea_level,
            tiles,
            edges,
        };
        let bytes = serialize(&snapshot)?;
        Self::load(&bytes).map_err(|e| NetError::Protocol(e.to_string()))
    }
}

fn nearest_base_tile(base: &[Vec3], position: &Vec3) -> RegionId {
    let mut best = 0;
    let mut best_dot = f32::MIN;
    for (id, candidate) in base.iter().enumerate() {
        let closeness = candidate.dot(position);
        if closeness > best_dot {
            best = id;
            best_dot = closeness;
        }
    }
    best as RegionId
}
