//! Authoritative game state.
//!
//! `GameState` owns the units, the occupancy table, the change logs and the
//! client registry. It is shared between the simulation task and every
//! connection task behind one `tokio::sync::Mutex`; nothing in here performs
//! I/O, so the lock is only ever held for in-memory work.

use crate::change_log::{ChangeLog, Retention, ScopedChangeLog};
use crate::client_manager::ClientManager;
use crate::unit::{Step, Unit, UnitClass, STATIONARY, WANDERER};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use shared::protocol::{ChangeRecord, Command, Request, Response, UnitRecord};
use shared::{GameTime, GeodesicGrid, RegionId, TileId, UnitId};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Game time advanced by one tick.
pub const TIME_STEP: GameTime = 100;
pub const START_TIME: GameTime = 1;

const EMPTY: UnitId = 0;

/// A command or spawn that names something that does not exist.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("unknown unit {0}")]
    UnknownUnit(UnitId),
    #[error("unknown tile {0}")]
    UnknownTile(TileId),
    #[error("tile {0} is occupied")]
    TileOccupied(TileId),
    #[error("unknown region {0}")]
    UnknownRegion(RegionId),
}

pub struct GameState {
    grid: Arc<GeodesicGrid>,
    units: BTreeMap<UnitId, Unit>,
    occupancy: Vec<UnitId>,
    next_unit_id: UnitId,
    time: GameTime,
    log: ChangeLog,
    regions: ScopedChangeLog<RegionId>,
    clients: ClientManager,
    rng: StdRng,
}

impl GameState {
    pub fn new(grid: Arc<GeodesicGrid>, retention: Retention, max_clients: usize) -> Self {
        Self::with_rng(grid, retention, max_clients, StdRng::from_entropy())
    }

    pub fn with_rng(
        grid: Arc<GeodesicGrid>,
        retention: Retention,
        max_clients: usize,
        rng: StdRng,
    ) -> Self {
        let mut regions = ScopedChangeLog::new(retention, START_TIME);
        for region in 0..grid.region_count() as RegionId {
            regions.observe(region);
        }
        Self {
            occupancy: vec![EMPTY; grid.tile_count()],
            grid,
            units: BTreeMap::new(),
            next_unit_id: 1,
            time: START_TIME,
            log: ChangeLog::new(retention, START_TIME),
            regions,
            clients: ClientManager::new(max_clients),
            rng,
        }
    }

    pub fn grid(&self) -> &Arc<GeodesicGrid> {
        &self.grid
    }

    pub fn time(&self) -> GameTime {
        self.time
    }

    pub fn unit(&self, id: UnitId) -> Option<&Unit> {
        self.units.get(&id)
    }

    /// Units in ascending id order.
    pub fn units(&self) -> impl Iterator<Item = &Unit> {
        self.units.values()
    }

    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    /// The unit standing on `tile`, if any.
    pub fn occupant(&self, tile: TileId) -> Option<UnitId> {
        match self.occupancy.get(tile as usize) {
            Some(&EMPTY) | None => None,
            Some(&unit) => Some(unit),
        }
    }

    pub fn log(&self) -> &ChangeLog {
        &self.log
    }

    pub fn regional_log(&self) -> &ScopedChangeLog<RegionId> {
        &self.regions
    }

    pub fn clients(&self) -> &ClientManager {
        &self.clients
    }

    pub fn clients_mut(&mut self) -> &mut ClientManager {
        &mut self.clients
    }

    fn region_of(&self, tile: TileId) -> RegionId {
        self.grid.region(tile).unwrap_or(0)
    }

    /// Appends to the global log and to the log of `region`.
    fn record(&mut self, region: RegionId, record: ChangeRecord) {
        self.log.append(record);
        self.regions.append(region, record);
    }

    pub fn spawn(&mut self, tile: TileId, class: UnitClass) -> Result<UnitId, CommandError> {
        match self.occupancy.get(tile as usize) {
            None => return Err(CommandError::UnknownTile(tile)),
            Some(&EMPTY) => {}
            Some(_) => return Err(CommandError::TileOccupied(tile)),
        }

        let id = self.next_unit_id;
        self.next_unit_id += 1;
        let unit = Unit::new(id, class, tile);
        self.occupancy[tile as usize] = id;
        self.record(self.region_of(tile), unit.enter_record());
        self.units.insert(id, unit);
        debug!("Spawned unit {} on tile {}", id, tile);
        Ok(id)
    }

    /// Spawns up to `count` units on random free tiles, alternating
    /// stationary and wandering classes.
    pub fn populate(&mut self, count: usize) -> Vec<UnitId> {
        let mut free: Vec<TileId> = (0..self.occupancy.len() as TileId)
            .filter(|&t| self.occupancy[t as usize] == EMPTY)
            .collect();
        free.shuffle(&mut self.rng);

        let mut spawned = Vec::with_capacity(count);
        for (i, tile) in free.into_iter().take(count).enumerate() {
            let class = if i % 2 == 0 { STATIONARY } else { WANDERER };
            if let Ok(id) = self.spawn(tile, class) {
                spawned.push(id);
            }
        }
        info!("Populated the world with {} units", spawned.len());
        spawned
    }

    pub fn remove_unit(&mut self, id: UnitId) -> Result<(), CommandError> {
        let unit = self.units.remove(&id).ok_or(CommandError::UnknownUnit(id))?;
        self.occupancy[unit.tile() as usize] = EMPTY;
        self.record(self.region_of(unit.tile()), ChangeRecord::Remove { unit: id });
        debug!("Removed unit {}", id);
        Ok(())
    }

    fn validate(&self, command: &Command) -> Result<(), CommandError> {
        if !self.units.contains_key(&command.unit) {
            return Err(CommandError::UnknownUnit(command.unit));
        }
        if self.grid.tile(command.target).is_none() {
            return Err(CommandError::UnknownTile(command.target));
        }
        Ok(())
    }

    /// Queues a move order; it is carried out over the following ticks.
    pub fn set_command(&mut self, unit: UnitId, target: TileId) -> Result<(), CommandError> {
        self.validate(&Command { unit, target })?;
        if let Some(unit) = self.units.get_mut(&unit) {
            unit.set_target(target);
        }
        Ok(())
    }

    /// Applies every command, or none of them if any is invalid.
    pub fn apply_commands(&mut self, commands: &[Command]) -> Result<(), CommandError> {
        for command in commands {
            self.validate(command)?;
        }
        for command in commands {
            self.set_command(command.unit, command.target)?;
        }
        Ok(())
    }

    fn move_unit(&mut self, id: UnitId, to: TileId) {
        let (from, visual) = match self.units.get_mut(&id) {
            Some(unit) => {
                let from = unit.tile();
                unit.place(to);
                (from, unit.class().visual)
            }
            None => return,
        };
        self.occupancy[from as usize] = EMPTY;
        self.occupancy[to as usize] = id;

        let (old_region, new_region) = (self.region_of(from), self.region_of(to));
        let change = ChangeRecord::Move { unit: id, tile: to };
        self.log.append(change);
        if old_region == new_region {
            self.regions.append(new_region, change);
        } else {
            self.regions
                .append(old_region, ChangeRecord::Leave { unit: id, tile: from });
            self.regions.append(
                new_region,
                ChangeRecord::Enter {
                    unit: id,
                    tile: to,
                    visual,
                },
            );
        }
    }

    fn complete_command(&mut self, id: UnitId) {
        if let Some(unit) = self.units.get_mut(&id) {
            unit.clear_target();
            let tile = unit.tile();
            self.record(self.region_of(tile), ChangeRecord::CommandDone { unit: id });
        }
    }

    fn execute_command(&mut self, id: UnitId) {
        let occupancy = &self.occupancy;
        let step = match self.units.get(&id) {
            Some(unit) => unit.plan(
                &self.grid,
                |t| occupancy.get(t as usize) == Some(&EMPTY),
                &mut self.rng,
            ),
            None => return,
        };

        match step {
            Step::Stay => {}
            Step::Done => self.complete_command(id),
            Step::Move(to) => self.move_unit(id, to),
            Step::Arrive(to) => {
                self.move_unit(id, to);
                self.complete_command(id);
            }
        }
    }

    /// Runs one simulation tick and commits its change block.
    ///
    /// Units act in ascending id order, then age; expired units are removed.
    /// Returns the new game time.
    pub fn tick(&mut self) -> GameTime {
        self.time += TIME_STEP;

        let ids: Vec<UnitId> = self.units.keys().copied().collect();
        for &id in &ids {
            self.execute_command(id);
        }

        let mut expired = Vec::new();
        for unit in self.units.values_mut() {
            if unit.advance_age(TIME_STEP, &mut self.rng) {
                expired.push(unit.id());
            }
        }
        for id in expired {
            if let Err(e) = self.remove_unit(id) {
                warn!("Could not remove expired unit {}: {}", id, e);
            }
        }

        let changes = self.log.pending().len();
        let oldest = self.clients.oldest_confirmed();
        self.log.commit(self.time, oldest);
        self.regions.commit(self.time, oldest);
        self.clients.reset_ready();

        debug!(
            "Tick {}: {} units, {} changes, {} clients",
            self.time,
            self.units.len(),
            changes,
            self.clients.len()
        );
        self.time
    }

    /// Current time and every unit, for a joining client.
    pub fn snapshot(&self) -> (GameTime, Vec<UnitRecord>) {
        (self.time, self.units().map(Unit::record).collect())
    }

    /// `Enter` records for every unit, or for the units of one region.
    fn resync_changes(&self, scope: Option<RegionId>) -> Vec<ChangeRecord> {
        self.units()
            .filter(|unit| scope.map_or(true, |r| self.region_of(unit.tile()) == r))
            .map(Unit::enter_record)
            .collect()
    }

    /// Responses bringing a client from `confirmed` up to date.
    ///
    /// A client behind the retained history gets a full resynchronization
    /// instead of a change slice.
    pub fn changes_since(
        &self,
        confirmed: GameTime,
        scope: Option<RegionId>,
        update_length: u32,
    ) -> Vec<Response> {
        let slice = match scope {
            Some(region) => self.regions.slice(region, confirmed, update_length),
            None => self.log.slice(confirmed, update_length),
        };
        slice.unwrap_or_else(|stale| {
            info!("Resynchronizing client: {}", stale);
            vec![Response::Changes {
                time: self.time,
                changes: self.resync_changes(scope),
            }]
        })
    }

    /// Handles one `GetTime` poll from a registered client.
    ///
    /// Commands are applied atomically; any invalid command rejects the whole
    /// poll with `Nok` and changes nothing. Otherwise the client's confirmed
    /// time is raised to the request's time (never past the server's own) and
    /// the ready flag is set when the request is marked last.
    ///
    /// A client that switches scope, or asks for it, gets a full
    /// resynchronization of its new scope: the slices of the old and new
    /// logs do not line up, so replaying the new one from the old confirmed
    /// time would leave units the client can no longer see.
    pub fn poll(&mut self, client: u32, request: &Request, update_length: u32) -> Vec<Response> {
        let time = match request.time {
            Some(time) => time,
            None => {
                return vec![Response::Nok {
                    reason: "missing field: time".to_string(),
                }]
            }
        };
        let scope = request.scope;
        let checked = match scope {
            Some(region) if region as usize >= self.grid.region_count() => {
                Err(CommandError::UnknownRegion(region))
            }
            _ => self.apply_commands(&request.commands),
        };
        if let Err(e) = checked {
            warn!("Client {} sent an invalid request: {}", client, e);
            return vec![Response::Nok {
                reason: e.to_string(),
            }];
        }

        let previous_scope = self.clients.get(client).map(|c| c.scope);
        let confirmed = self
            .clients
            .confirm(client, time.min(self.time))
            .unwrap_or(time.min(self.time));
        self.clients.set_scope(client, scope);
        if request.last {
            self.clients.set_ready(client);
        }

        let rescoped = previous_scope.map_or(false, |previous| previous != scope);
        if rescoped || request.resync {
            info!(
                "Resynchronizing client {} (scope {:?}, requested {})",
                client, scope, request.resync
            );
            return vec![Response::Changes {
                time: self.time,
                changes: self.resync_changes(scope),
            }];
        }
        self.changes_since(confirmed, scope, update_length)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use std::collections::HashSet;
    use std::net::SocketAddr;

    fn state(size: u32, seed: u64) -> GameState {
        let mut rng = StdRng::seed_from_u64(seed);
        let grid = Arc::new(GeodesicGrid::build(size, 5000, &mut rng).unwrap());
        GameState::with_rng(grid, Retention::Blocks(200), 8, rng)
    }

    fn addr() -> SocketAddr {
        "127.0.0.1:9000".parse().unwrap()
    }

    fn block_changes(state: &GameState, time: GameTime) -> Vec<ChangeRecord> {
        state
            .log()
            .blocks()
            .find(|b| b.time() == time)
            .map(|b| b.changes().to_vec())
            .unwrap_or_default()
    }

    fn assert_occupancy_consistent(state: &GameState) {
        let mut seen = HashSet::new();
        for unit in state.units() {
            assert!(seen.insert(unit.tile()), "two units on tile {}", unit.tile());
            assert_eq!(state.occupant(unit.tile()), Some(unit.id()));
        }
        let occupied = (0..state.grid().tile_count() as TileId)
            .filter(|&t| state.occupant(t).is_some())
            .count();
        assert_eq!(occupied, state.unit_count());
    }

    #[test]
    fn test_spawn_marks_occupancy() {
        let mut state = state(0, 1);
        let id = state.spawn(3, WANDERER).unwrap();
        assert_eq!(id, 1);
        assert_eq!(state.occupant(3), Some(1));
        assert_eq!(state.spawn(3, WANDERER), Err(CommandError::TileOccupied(3)));
        assert_eq!(state.spawn(99, WANDERER), Err(CommandError::UnknownTile(99)));
        assert_eq!(
            state.log().pending(),
            &[ChangeRecord::Enter {
                unit: 1,
                tile: 3,
                visual: WANDERER.visual
            }]
        );
    }

    #[test]
    fn test_remove_unit() {
        let mut state = state(0, 1);
        let id = state.spawn(5, STATIONARY).unwrap();
        state.remove_unit(id).unwrap();
        assert_eq!(state.occupant(5), None);
        assert_eq!(state.remove_unit(id), Err(CommandError::UnknownUnit(id)));
        assert_eq!(
            state.log().pending().last(),
            Some(&ChangeRecord::Remove { unit: id })
        );

        // Ids are never reused.
        assert_eq!(state.spawn(5, STATIONARY).unwrap(), id + 1);
    }

    #[test]
    fn test_three_ticks_one_move_each() {
        let mut state = state(0, 11);
        let rock = state.spawn(0, STATIONARY).unwrap();
        let walker = state.spawn(1, WANDERER).unwrap();

        for _ in 0..3 {
            let before = state.unit(walker).unwrap().tile();
            let time = state.tick();
            let changes = block_changes(&state, time);

            let moves: Vec<&ChangeRecord> = changes
                .iter()
                .filter(|c| matches!(c, ChangeRecord::Move { .. }))
                .collect();
            assert_eq!(moves.len(), 1);
            let after = state.unit(walker).unwrap().tile();
            assert_eq!(moves[0], &ChangeRecord::Move { unit: walker, tile: after });
            assert!(state.grid().tile(before).unwrap().is_neighbour(after));

            assert_eq!(state.occupant(after), Some(walker));
            assert_eq!(state.occupant(0), Some(rock));
            assert_occupancy_consistent(&state);
        }
        assert_eq!(state.time(), START_TIME + 3 * TIME_STEP);
    }

    #[test]
    fn test_occupancy_stays_consistent_over_many_ticks() {
        let mut state = state(1, 5);
        state.populate(30);
        let mut rng = StdRng::seed_from_u64(99);

        for _ in 0..50 {
            let ids: Vec<UnitId> = state.units().map(Unit::id).collect();
            for id in ids.iter().take(5) {
                let target = rng.gen_range(0..state.grid().tile_count() as TileId);
                state.set_command(*id, target).unwrap();
            }
            state.tick();
            assert_occupancy_consistent(&state);
        }
    }

    #[test]
    fn test_command_moves_to_target() {
        let mut state = state(1, 2);
        let walker = state.spawn(0, WANDERER).unwrap();
        let target = state.grid().tile(0).unwrap().neighbours()[1];
        state.set_command(walker, target).unwrap();

        let time = state.tick();
        assert_eq!(state.unit(walker).unwrap().tile(), target);
        assert_eq!(state.unit(walker).unwrap().target(), None);
        // The block also carries the spawn's Enter.
        assert!(block_changes(&state, time).ends_with(&[
            ChangeRecord::Move {
                unit: walker,
                tile: target
            },
            ChangeRecord::CommandDone { unit: walker }
        ]));
    }

    #[test]
    fn test_command_on_current_tile_completes_immediately() {
        let mut state = state(0, 2);
        let walker = state.spawn(4, WANDERER).unwrap();
        state.set_command(walker, 4).unwrap();

        let time = state.tick();
        assert_eq!(state.unit(walker).unwrap().tile(), 4);
        let changes = block_changes(&state, time);
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[1], ChangeRecord::CommandDone { unit: walker });
    }

    #[test]
    fn test_distant_target_is_reached() {
        let mut state = state(2, 8);
        let walker = state.spawn(0, WANDERER).unwrap();
        state.set_command(walker, 3).unwrap();

        for _ in 0..40 {
            state.tick();
            if state.unit(walker).map(Unit::tile) == Some(3) {
                break;
            }
        }
        assert_eq!(state.unit(walker).unwrap().tile(), 3);
        assert_eq!(state.unit(walker).unwrap().target(), None);
    }

    #[test]
    fn test_invalid_commands_apply_nothing() {
        let mut state = state(0, 3);
        let walker = state.spawn(0, WANDERER).unwrap();
        let commands = [
            Command {
                unit: walker,
                target: 2,
            },
            Command {
                unit: 42,
                target: 2,
            },
        ];
        assert_eq!(
            state.apply_commands(&commands),
            Err(CommandError::UnknownUnit(42))
        );
        assert_eq!(state.unit(walker).unwrap().target(), None);
        assert_eq!(
            state.set_command(walker, 1000),
            Err(CommandError::UnknownTile(1000))
        );
    }

    #[test]
    fn test_units_expire() {
        let mut state = state(0, 4);
        let short_lived = UnitClass::new(0, TIME_STEP, 9);
        let id = state.spawn(2, short_lived).unwrap();

        let mut removed_at = None;
        for _ in 0..3 {
            let time = state.tick();
            if block_changes(&state, time).contains(&ChangeRecord::Remove { unit: id }) {
                removed_at = Some(time);
                break;
            }
        }
        assert!(removed_at.is_some());
        assert!(state.unit(id).is_none());
        assert_eq!(state.occupant(2), None);
    }

    #[test]
    fn test_tick_resets_ready_flags() {
        let mut state = state(0, 4);
        let client = state.clients_mut().add_client(addr(), START_TIME).unwrap();
        state.poll(client, &Request::get_time(START_TIME).ready(), 1000);
        assert!(state.clients().all_ready());
        state.tick();
        assert!(!state.clients().all_ready());
    }

    #[test]
    fn test_poll_returns_new_changes() {
        let mut state = state(0, 6);
        let client = state.clients_mut().add_client(addr(), START_TIME).unwrap();

        assert_eq!(
            state.poll(client, &Request::get_time(START_TIME), 1000),
            vec![Response::PleaseWait { update_length: 1000 }]
        );

        state.spawn(7, STATIONARY).unwrap();
        let time = state.tick();
        let responses = state.poll(client, &Request::get_time(START_TIME), 1000);
        assert_eq!(
            responses,
            vec![
                Response::Part {
                    changes: vec![ChangeRecord::Enter {
                        unit: 1,
                        tile: 7,
                        visual: STATIONARY.visual
                    }]
                },
                Response::Ok {
                    time,
                    update_length: 1000
                }
            ]
        );
        assert_eq!(state.clients().get(client).unwrap().confirmed, START_TIME);

        // A poll confirming the latest time gets nothing again.
        assert_eq!(
            state.poll(client, &Request::get_time(time), 1000),
            vec![Response::PleaseWait { update_length: 1000 }]
        );
    }

    #[test]
    fn test_poll_with_bad_reference() {
        let mut state = state(0, 6);
        let client = state.clients_mut().add_client(addr(), START_TIME).unwrap();
        let request = Request::get_time(START_TIME)
            .with_commands(vec![Command { unit: 5, target: 0 }])
            .ready();
        let responses = state.poll(client, &request, 1000);
        assert!(matches!(responses.as_slice(), [Response::Nok { .. }]));
        assert!(!state.clients().all_ready());

        let request = Request::get_time(START_TIME).scoped(Some(40));
        let responses = state.poll(client, &request, 1000);
        assert!(matches!(responses.as_slice(), [Response::Nok { .. }]));

        let mut missing_time = Request::get_time(START_TIME);
        missing_time.time = None;
        let responses = state.poll(client, &missing_time, 1000);
        assert!(matches!(responses.as_slice(), [Response::Nok { .. }]));
    }

    #[test]
    fn test_resync_on_request() {
        let mut state = state(0, 9);
        let client = state.clients_mut().add_client(addr(), START_TIME).unwrap();
        let unit = state.spawn(3, STATIONARY).unwrap();
        let time = state.tick();

        let responses = state.poll(client, &Request::get_time(time).resync(), 1000);
        assert_eq!(
            responses,
            vec![Response::Changes {
                time,
                changes: vec![ChangeRecord::Enter {
                    unit,
                    tile: 3,
                    visual: STATIONARY.visual
                }]
            }]
        );
        assert_eq!(
            state.poll(client, &Request::get_time(time), 1000),
            vec![Response::PleaseWait { update_length: 1000 }]
        );
    }

    #[test]
    fn test_scope_change_resynchronizes() {
        let mut state = state(1, 12);
        let client = state.clients_mut().add_client(addr(), START_TIME).unwrap();
        state.spawn(0, STATIONARY).unwrap();
        let outside = state
            .grid()
            .tiles()
            .iter()
            .find(|t| state.grid().region(t.id()) != Some(0))
            .map(|t| t.id())
            .unwrap();
        let resident = state.spawn(outside, STATIONARY).unwrap();
        let region_of_resident = state.grid().region(outside).unwrap();

        // Switching from the global log to region 0 replaces the table.
        let time = state.tick();
        match state
            .poll(client, &Request::get_time(START_TIME).scoped(Some(0)), 1000)
            .as_slice()
        {
            [Response::Changes { time: at, changes }] => {
                assert_eq!(*at, time);
                assert!(changes.iter().all(|c| c.unit() != resident));
            }
            other => panic!("expected a resync, got {:?}", other),
        }
        assert_eq!(state.clients().get(client).unwrap().scope, Some(0));

        // Staying on region 0 reads its log as usual.
        let time = state.tick();
        let request = Request::get_time(time - TIME_STEP).scoped(Some(0));
        assert!(!state
            .poll(client, &request, 1000)
            .iter()
            .any(|r| matches!(r, Response::Changes { .. })));

        // Moving to the resident's region yields its Enter even though the
        // regional log never recorded one after the switch.
        match state
            .poll(
                client,
                &Request::get_time(time).scoped(Some(region_of_resident)),
                1000,
            )
            .as_slice()
        {
            [Response::Changes { changes, .. }] => {
                assert!(changes.contains(&ChangeRecord::Enter {
                    unit: resident,
                    tile: outside,
                    visual: STATIONARY.visual
                }));
            }
            other => panic!("expected a resync, got {:?}", other),
        }

        // Back to the global log: every unit is resent.
        match state.poll(client, &Request::get_time(time), 1000).as_slice() {
            [Response::Changes { changes, .. }] => assert_eq!(changes.len(), state.unit_count()),
            other => panic!("expected a resync, got {:?}", other),
        }
    }

    #[test]
    fn test_stale_client_is_resynchronized() {
        let mut rng = StdRng::seed_from_u64(21);
        let grid = Arc::new(GeodesicGrid::build(0, 0, &mut rng).unwrap());
        let mut state = GameState::with_rng(grid, Retention::Blocks(2), 4, rng);
        let a = state.spawn(0, STATIONARY).unwrap();
        let b = state.spawn(6, STATIONARY).unwrap();
        for _ in 0..5 {
            state.tick();
        }

        match state.changes_since(START_TIME, None, 1000).as_slice() {
            [Response::Changes { time, changes }] => {
                assert_eq!(*time, state.time());
                assert_eq!(
                    changes,
                    &vec![
                        ChangeRecord::Enter {
                            unit: a,
                            tile: 0,
                            visual: STATIONARY.visual
                        },
                        ChangeRecord::Enter {
                            unit: b,
                            tile: 6,
                            visual: STATIONARY.visual
                        }
                    ]
                );
            }
            other => panic!("expected a resync, got {:?}", other),
        }
    }

    #[test]
    fn test_region_crossing_records_leave_and_enter() {
        let mut state = state(1, 12);
        let walker = state.spawn(0, WANDERER).unwrap();
        let region_zero = state.grid().region(0).unwrap();
        assert_eq!(region_zero, 0);

        let outside = state
            .grid()
            .tiles()
            .iter()
            .find(|t| state.grid().region(t.id()) != Some(region_zero))
            .map(|t| t.id())
            .unwrap();
        state.set_command(walker, outside).unwrap();

        let mut crossed = None;
        for _ in 0..20 {
            let from = state.unit(walker).unwrap().tile();
            let time = state.tick();
            let to = state.unit(walker).unwrap().tile();
            let (old_region, new_region) = (
                state.grid().region(from).unwrap(),
                state.grid().region(to).unwrap(),
            );
            if old_region != new_region {
                crossed = Some((time, from, to, old_region, new_region));
                break;
            }
        }

        let (time, from, to, old_region, new_region) = crossed.unwrap();
        let old_log = state.regional_log().get(old_region).unwrap();
        let new_log = state.regional_log().get(new_region).unwrap();
        let changes_in = |log: &ChangeLog| {
            log.blocks()
                .find(|b| b.time() == time)
                .map(|b| b.changes().to_vec())
                .unwrap_or_default()
        };
        assert!(changes_in(old_log).contains(&ChangeRecord::Leave {
            unit: walker,
            tile: from
        }));
        assert!(changes_in(new_log).contains(&ChangeRecord::Enter {
            unit: walker,
            tile: to,
            visual: WANDERER.visual
        }));
        assert!(block_changes(&state, time).contains(&ChangeRecord::Move {
            unit: walker,
            tile: to
        }));
    }
}
