//! Units and the classes that describe them.

use rand::seq::SliceRandom;
use rand::Rng;
use shared::geometry::Vec3;
use shared::protocol::{ChangeRecord, UnitRecord};
use shared::{GameTime, GeodesicGrid, TileId, UnitId, VisualCode};

/// Immutable description shared by every unit of one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitClass {
    /// Tiles per tick; 0 marks a stationary feature.
    pub max_speed: u32,
    /// Lifetime in game time; 0 never expires.
    pub max_age: GameTime,
    pub visual: VisualCode,
}

impl UnitClass {
    pub const fn new(max_speed: u32, max_age: GameTime, visual: VisualCode) -> Self {
        Self {
            max_speed,
            max_age,
            visual,
        }
    }

    pub fn is_mobile(&self) -> bool {
        self.max_speed > 0
    }
}

/// Terrain features such as forests. They never move.
pub const STATIONARY: UnitClass = UnitClass::new(0, 50_000, 1);
pub const WANDERER: UnitClass = UnitClass::new(1, 20_000, 2);

/// What a unit does with its next tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Stay,
    /// The unit is already on its target.
    Done,
    Move(TileId),
    /// Move onto the target and complete the command.
    Arrive(TileId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Unit {
    id: UnitId,
    class: UnitClass,
    tile: TileId,
    target: Option<TileId>,
    age: GameTime,
}

impl Unit {
    pub fn new(id: UnitId, class: UnitClass, tile: TileId) -> Self {
        Self {
            id,
            class,
            tile,
            target: None,
            age: 0,
        }
    }

    pub fn id(&self) -> UnitId {
        self.id
    }

    pub fn class(&self) -> &UnitClass {
        &self.class
    }

    pub fn tile(&self) -> TileId {
        self.tile
    }

    pub fn target(&self) -> Option<TileId> {
        self.target
    }

    pub fn age(&self) -> GameTime {
        self.age
    }

    pub fn set_target(&mut self, target: TileId) {
        self.target = Some(target);
    }

    pub fn clear_target(&mut self) {
        self.target = None;
    }

    /// Callers must have checked that `tile` is free.
    pub(crate) fn place(&mut self, tile: TileId) {
        self.tile = tile;
    }

    /// Decides the next step.
    ///
    /// A unit with a target steps to the free neighbour that gets it closest
    /// to the target, or onto the target itself once adjacent. When no free
    /// neighbour brings it closer, or it has no target, it wanders to a
    /// random free neighbour. `is_free` reports whether a tile is unoccupied.
    pub fn plan<F, R>(&self, grid: &GeodesicGrid, is_free: F, rng: &mut R) -> Step
    where
        F: Fn(TileId) -> bool,
        R: Rng + ?Sized,
    {
        if !self.class.is_mobile() {
            return Step::Stay;
        }
        let here = match grid.tile(self.tile) {
            Some(tile) => tile,
            None => return Step::Stay,
        };

        if let Some(target) = self.target {
            if target == self.tile {
                return Step::Done;
            }
            if here.is_neighbour(target) && is_free(target) {
                return Step::Arrive(target);
            }
            if let Some(goal) = grid.tile(target).map(|t| t.position()) {
                if let Some(next) = closer_neighbour(grid, here.neighbours(), here.position(), goal, &is_free) {
                    return Step::Move(next);
                }
            }
        }

        let free: Vec<TileId> = here
            .neighbours()
            .iter()
            .copied()
            .filter(|&n| is_free(n))
            .collect();
        match free.choose(rng) {
            Some(&next) => Step::Move(next),
            None => Step::Stay,
        }
    }

    /// Ages the unit by `period` and reports whether it has reached the end
    /// of its life. The lifetime bound is `max_age` plus a jitter drawn anew
    /// on every call.
    pub fn advance_age<R: Rng + ?Sized>(&mut self, period: GameTime, rng: &mut R) -> bool {
        self.age += period;
        if self.class.max_age == 0 {
            return false;
        }
        let jitter = rng.gen_range(0..self.class.max_age);
        self.age > self.class.max_age + jitter
    }

    pub fn record(&self) -> UnitRecord {
        UnitRecord {
            tag: self.id,
            tile: self.tile,
            visual: self.class.visual,
        }
    }

    pub fn enter_record(&self) -> ChangeRecord {
        ChangeRecord::Enter {
            unit: self.id,
            tile: self.tile,
            visual: self.class.visual,
        }
    }
}

fn closer_neighbour<F>(
    grid: &GeodesicGrid,
    neighbours: &[TileId],
    here: Vec3,
    goal: Vec3,
    is_free: &F,
) -> Option<TileId>
where
    F: Fn(TileId) -> bool,
{
    let mut best = None;
    let mut best_dot = here.dot(&goal);
    for &n in neighbours {
        if !is_free(n) {
            continue;
        }
        if let Some(tile) = grid.tile(n) {
            let closeness = tile.position().dot(&goal);
            if closeness > best_dot {
                best = Some(n);
                best_dot = closeness;
            }
        }
    }
    best
}
