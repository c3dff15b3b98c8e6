//! Client-side copy of the world, kept current by replaying change records.

use log::debug;
use shared::protocol::{ChangeRecord, Command, UnitRecord};
use shared::{GameTime, GeodesicGrid, TileId, UnitId, VisualCode};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplayError {
    #[error("change names unknown unit {0}")]
    UnknownUnit(UnitId),
    #[error("change names unknown tile {0}")]
    UnknownTile(TileId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientUnit {
    pub id: UnitId,
    pub tile: TileId,
    pub visual: VisualCode,
    /// Move order sent to the server and not yet reported done.
    pub target: Option<TileId>,
}

#[derive(Debug)]
pub struct ClientGame {
    grid: GeodesicGrid,
    units: BTreeMap<UnitId, ClientUnit>,
    time: GameTime,
    pending_commands: Vec<Command>,
}

impl ClientGame {
    pub fn new(grid: GeodesicGrid, time: GameTime, units: Vec<UnitRecord>) -> Self {
        let units = units
            .into_iter()
            .map(|u| {
                (
                    u.tag,
                    ClientUnit {
                        id: u.tag,
                        tile: u.tile,
                        visual: u.visual,
                        target: None,
                    },
                )
            })
            .collect();
        Self {
            grid,
            units,
            time,
            pending_commands: Vec::new(),
        }
    }

    pub fn grid(&self) -> &GeodesicGrid {
        &self.grid
    }

    /// Newest server time whose changes have been applied.
    pub fn time(&self) -> GameTime {
        self.time
    }

    pub fn set_time(&mut self, time: GameTime) {
        self.time = self.time.max(time);
    }

    pub fn unit(&self, id: UnitId) -> Option<&ClientUnit> {
        self.units.get(&id)
    }

    pub fn units(&self) -> impl Iterator<Item = &ClientUnit> {
        self.units.values()
    }

    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    pub fn unit_at(&self, tile: TileId) -> Option<UnitId> {
        self.units.values().find(|u| u.tile == tile).map(|u| u.id)
    }

    /// Replays one change record.
    ///
    /// `Enter` replaces any unit with the same id, so a record that repeats
    /// what a snapshot already showed is harmless.
    pub fn apply(&mut self, record: ChangeRecord) -> Result<(), ReplayError> {
        replay(&self.grid, &mut self.units, record)
    }

    /// Replays a whole slice, or nothing: if any record fails the unit table
    /// is left exactly as it was.
    pub fn apply_all<I>(&mut self, records: I) -> Result<(), ReplayError>
    where
        I: IntoIterator<Item = ChangeRecord>,
    {
        let mut units = self.units.clone();
        for record in records {
            replay(&self.grid, &mut units, record)?;
        }
        self.units = units;
        Ok(())
    }

    /// Replaces the unit table with a full snapshot sent as `Enter` records.
    /// A snapshot that fails to replay changes nothing.
    pub fn resync(&mut self, time: GameTime, changes: Vec<ChangeRecord>) -> Result<(), ReplayError> {
        debug!("Resynchronizing {} units at time {}", changes.len(), time);
        let mut units = BTreeMap::new();
        for record in changes {
            replay(&self.grid, &mut units, record)?;
        }
        self.units = units;
        self.time = time;
        Ok(())
    }

    /// Queues a move order for the next poll.
    pub fn set_command(&mut self, unit: UnitId, target: TileId) -> Result<(), ReplayError> {
        check_tile(&self.grid, target)?;
        let entry = self
            .units
            .get_mut(&unit)
            .ok_or(ReplayError::UnknownUnit(unit))?;
        entry.target = Some(target);
        self.pending_commands.retain(|c| c.unit != unit);
        self.pending_commands.push(Command { unit, target });
        Ok(())
    }

    pub fn pending_commands(&self) -> &[Command] {
        &self.pending_commands
    }

    pub fn take_commands(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.pending_commands)
    }
}

fn check_tile(grid: &GeodesicGrid, tile: TileId) -> Result<(), ReplayError> {
    match grid.tile(tile) {
        Some(_) => Ok(()),
        None => Err(ReplayError::UnknownTile(tile)),
    }
}

fn replay(
    grid: &GeodesicGrid,
    units: &mut BTreeMap<UnitId, ClientUnit>,
    record: ChangeRecord,
) -> Result<(), ReplayError> {
    match record {
        ChangeRecord::Move { unit, tile } => {
            check_tile(grid, tile)?;
            let entry = units.get_mut(&unit).ok_or(ReplayError::UnknownUnit(unit))?;
            entry.tile = tile;
        }
        ChangeRecord::CommandDone { unit } => {
            let entry = units.get_mut(&unit).ok_or(ReplayError::UnknownUnit(unit))?;
            entry.target = None;
        }
        ChangeRecord::Remove { unit } | ChangeRecord::Leave { unit, .. } => {
            units.remove(&unit).ok_or(ReplayError::UnknownUnit(unit))?;
        }
        ChangeRecord::Enter { unit, tile, visual } => {
            check_tile(grid, tile)?;
            // Keep the pending order of a unit that re-enters.
            let target = units.get(&unit).and_then(|u| u.target);
            units.insert(
                unit,
                ClientUnit {
                    id: unit,
                    tile,
                    visual,
                    target,
                },
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn game() -> ClientGame {
        let grid = GeodesicGrid::build(0, 5000, &mut StdRng::seed_from_u64(1)).unwrap();
        ClientGame::new(
            grid,
            101,
            vec![
                UnitRecord {
                    tag: 1,
                    tile: 0,
                    visual: 1,
                },
                UnitRecord {
                    tag: 2,
                    tile: 5,
                    visual: 2,
                },
            ],
        )
    }

    #[test]
    fn test_initial_state() {
        let game = game();
        assert_eq!(game.time(), 101);
        assert_eq!(game.unit_count(), 2);
        assert_eq!(game.unit_at(5), Some(2));
        assert_eq!(game.unit_at(6), None);
    }

    #[test]
    fn test_apply_records_in_order() {
        let mut game = game();
        game.set_command(2, 7).unwrap();
        game.apply_all(vec![
            ChangeRecord::Move { unit: 2, tile: 7 },
            ChangeRecord::CommandDone { unit: 2 },
            ChangeRecord::Remove { unit: 1 },
            ChangeRecord::Enter {
                unit: 3,
                tile: 0,
                visual: 4,
            },
        ])
        .unwrap();

        assert_eq!(game.unit(2).unwrap().tile, 7);
        assert_eq!(game.unit(2).unwrap().target, None);
        assert!(game.unit(1).is_none());
        assert_eq!(game.unit_at(0), Some(3));
    }

    #[test]
    fn test_unknown_references_fail() {
        let mut game = game();
        assert_eq!(
            game.apply(ChangeRecord::Move { unit: 9, tile: 1 }),
            Err(ReplayError::UnknownUnit(9))
        );
        assert_eq!(
            game.apply(ChangeRecord::Move { unit: 1, tile: 500 }),
            Err(ReplayError::UnknownTile(500))
        );
        assert_eq!(
            game.apply(ChangeRecord::Leave { unit: 9, tile: 0 }),
            Err(ReplayError::UnknownUnit(9))
        );
        assert_eq!(game.set_command(9, 1), Err(ReplayError::UnknownUnit(9)));
    }

    #[test]
    fn test_failed_slice_changes_nothing() {
        let mut game = game();
        let before: Vec<ClientUnit> = game.units().cloned().collect();
        let result = game.apply_all(vec![
            ChangeRecord::Move { unit: 1, tile: 3 },
            ChangeRecord::Remove { unit: 2 },
            ChangeRecord::CommandDone { unit: 9 },
        ]);

        assert_eq!(result, Err(ReplayError::UnknownUnit(9)));
        assert_eq!(game.units().cloned().collect::<Vec<_>>(), before);
        assert_eq!(game.time(), 101);

        let result = game.resync(
            901,
            vec![
                ChangeRecord::Enter {
                    unit: 8,
                    tile: 11,
                    visual: 2,
                },
                ChangeRecord::Enter {
                    unit: 9,
                    tile: 500,
                    visual: 2,
                },
            ],
        );
        assert_eq!(result, Err(ReplayError::UnknownTile(500)));
        assert_eq!(game.units().cloned().collect::<Vec<_>>(), before);
        assert_eq!(game.time(), 101);
    }

    #[test]
    fn test_repeated_enter_is_harmless() {
        let mut game = game();
        let enter = ChangeRecord::Enter {
            unit: 1,
            tile: 0,
            visual: 1,
        };
        game.apply(enter).unwrap();
        game.apply(enter).unwrap();
        assert_eq!(game.unit_count(), 2);
    }

    #[test]
    fn test_resync_replaces_units() {
        let mut game = game();
        game.resync(
            901,
            vec![ChangeRecord::Enter {
                unit: 8,
                tile: 11,
                visual: 2,
            }],
        )
        .unwrap();
        assert_eq!(game.time(), 901);
        assert_eq!(game.unit_count(), 1);
        assert_eq!(game.unit_at(11), Some(8));
    }

    #[test]
    fn test_commands_are_queued_once_per_unit() {
        let mut game = game();
        game.set_command(1, 3).unwrap();
        game.set_command(1, 4).unwrap();
        game.set_command(2, 4).unwrap();
        assert_eq!(
            game.pending_commands(),
            &[Command { unit: 1, target: 4 }, Command { unit: 2, target: 4 }]
        );
        assert_eq!(game.take_commands().len(), 2);
        assert!(game.pending_commands().is_empty());
        assert_eq!(game.unit(1).unwrap().target, Some(4));
    }

    #[test]
    fn test_time_never_moves_backwards() {
        let mut game = game();
        game.set_time(50);
        assert_eq!(game.time(), 101);
        game.set_time(201);
        assert_eq!(game.time(), 201);
    }
}
