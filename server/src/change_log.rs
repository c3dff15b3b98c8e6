//! Per-tick change history used to bring polling clients up to date.
//!
//! Every mutation of the world during a tick is appended to the pending
//! block. Committing stamps the block with the tick's time and pushes it onto
//! a bounded history. A client that has applied everything up to time `T`
//! receives every block newer than `T`, one `Part` response per block (split
//! when a block is large), closed by a final `Ok` carrying the latest time.

use log::debug;
use shared::protocol::{ChangeRecord, Response};
use shared::{GameTime, NetError, Transport};
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

/// Records per `Part` response.
pub const MAX_CHANGES_PER_PART: usize = 250;
pub const DEFAULT_RETAINED_BLOCKS: usize = 200;

/// How much history a [`ChangeLog`] keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retention {
    /// Keep the newest `n` blocks.
    Blocks(usize),
    /// Drop blocks every client has confirmed, and never keep more than
    /// `max_blocks`.
    Confirmed { max_blocks: usize },
}

impl Retention {
    fn max_blocks(&self) -> usize {
        match *self {
            Retention::Blocks(n) => n.max(1),
            Retention::Confirmed { max_blocks } => max_blocks.max(1),
        }
    }
}

impl Default for Retention {
    fn default() -> Self {
        Retention::Blocks(DEFAULT_RETAINED_BLOCKS)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeBlock {
    time: GameTime,
    changes: Vec<ChangeRecord>,
}

impl ChangeBlock {
    pub fn time(&self) -> GameTime {
        self.time
    }

    pub fn changes(&self) -> &[ChangeRecord] {
        &self.changes
    }
}

/// The client's confirmed time is older than the retained history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("confirmed time {confirmed} predates the retained history (oldest block {oldest_retained:?})")]
pub struct StaleClient {
    pub confirmed: GameTime,
    pub oldest_retained: Option<GameTime>,
}

#[derive(Debug, Clone)]
pub struct ChangeLog {
    blocks: VecDeque<ChangeBlock>,
    pending: Vec<ChangeRecord>,
    retention: Retention,
    latest_time: GameTime,
    pruned_through: Option<GameTime>,
}

impl ChangeLog {
    /// An empty log whose latest time is `start_time`.
    pub fn new(retention: Retention, start_time: GameTime) -> Self {
        Self {
            blocks: VecDeque::new(),
            pending: Vec::new(),
            retention,
            latest_time: start_time,
            pruned_through: None,
        }
    }

    pub fn append(&mut self, record: ChangeRecord) {
        self.pending.push(record);
    }

    /// Closes the pending block at `time` and prunes old history.
    ///
    /// `oldest_confirmed` is the lowest time confirmed by any connected
    /// client; it only matters under [`Retention::Confirmed`].
    pub fn commit(&mut self, time: GameTime, oldest_confirmed: Option<GameTime>) {
        let changes = std::mem::take(&mut self.pending);
        self.blocks.push_back(ChangeBlock { time, changes });
        self.latest_time = time;

        let max_blocks = self.retention.max_blocks();
        while self.blocks.len() > max_blocks {
            self.prune_front();
        }
        if let (Retention::Confirmed { .. }, Some(oldest)) = (self.retention, oldest_confirmed) {
            while self.blocks.front().map_or(false, |b| b.time <= oldest) {
                self.prune_front();
            }
        }
    }

    fn prune_front(&mut self) {
        if let Some(block) = self.blocks.pop_front() {
            debug!("Pruned change block {}", block.time);
            self.pruned_through = Some(block.time);
        }
    }

    /// Responses that bring a client from `confirmed` to the latest time.
    ///
    /// A client that is already current gets a single `PleaseWait`.
    pub fn slice(&self, confirmed: GameTime, update_length: u32) -> Result<Vec<Response>, StaleClient> {
        if self.pruned_through.map_or(false, |pruned| confirmed < pruned) {
            return Err(StaleClient {
                confirmed,
                oldest_retained: self.blocks.front().map(|b| b.time),
            });
        }
        if confirmed >= self.latest_time {
            return Ok(vec![Response::PleaseWait { update_length }]);
        }

        let start = self.blocks.partition_point(|b| b.time <= confirmed);
        let mut responses: Vec<Response> = self
            .blocks
            .range(start..)
            .flat_map(|block| block.changes.chunks(MAX_CHANGES_PER_PART))
            .map(|chunk| Response::Part {
                changes: chunk.to_vec(),
            })
            .collect();
        responses.push(Response::Ok {
            time: self.latest_time,
            update_length,
        });
        Ok(responses)
    }

    /// Writes [`ChangeLog::slice`] to `transport`. A stale client is reported
    /// as a protocol error without writing anything.
    pub async fn write<S>(
        &self,
        transport: &Transport<S>,
        confirmed: GameTime,
        update_length: u32,
    ) -> Result<(), NetError>
    where
        S: AsyncRead + AsyncWrite,
    {
        let responses = self
            .slice(confirmed, update_length)
            .map_err(|e| NetError::Protocol(e.to_string()))?;
        let messages: Vec<_> = responses.into_iter().map(Into::into).collect();
        transport.write_all_messages(&messages).await
    }

    pub fn latest_time(&self) -> GameTime {
        self.latest_time
    }

    /// Number of retained blocks.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Records appended since the last commit.
    pub fn pending(&self) -> &[ChangeRecord] {
        &self.pending
    }

    pub fn blocks(&self) -> impl Iterator<Item = &ChangeBlock> {
        self.blocks.iter()
    }

    pub fn pruned_through(&self) -> Option<GameTime> {
        self.pruned_through
    }
}

/// One [`ChangeLog`] per observer key, committed in lockstep.
#[derive(Debug, Clone)]
pub struct ScopedChangeLog<K> {
    logs: HashMap<K, ChangeLog>,
    retention: Retention,
    latest_time: GameTime,
}

impl<K> ScopedChangeLog<K>
where
    K: Eq + Hash + Copy,
{
    pub fn new(retention: Retention, start_time: GameTime) -> Self {
        Self {
            logs: HashMap::new(),
            retention,
            latest_time: start_time,
        }
    }

    /// Makes sure `key` has a log, so it gets a block on every commit.
    pub fn observe(&mut self, key: K) {
        let (retention, latest) = (self.retention, self.latest_time);
        self.logs
            .entry(key)
            .or_insert_with(|| ChangeLog::new(retention, latest));
    }

    pub fn append(&mut self, key: K, record: ChangeRecord) {
        self.observe(key);
        if let Some(log) = self.logs.get_mut(&key) {
            log.append(record);
        }
    }

    pub fn commit(&mut self, time: GameTime, oldest_confirmed: Option<GameTime>) {
        for log in self.logs.values_mut() {
            log.commit(time, oldest_confirmed);
        }
        self.latest_time = time;
    }

    /// Like [`ChangeLog::slice`]; a key nobody observes has no changes.
    pub fn slice(
        &self,
        key: K,
        confirmed: GameTime,
        update_length: u32,
    ) -> Result<Vec<Response>, StaleClient> {
        match self.logs.get(&key) {
            Some(log) => log.slice(confirmed, update_length),
            None => ChangeLog::new(self.retention, self.latest_time).slice(confirmed, update_length),
        }
    }

    pub async fn write<S>(
        &self,
        key: K,
        transport: &Transport<S>,
        confirmed: GameTime,
        update_length: u32,
    ) -> Result<(), NetError>
    where
        S: AsyncRead + AsyncWrite,
    {
        match self.logs.get(&key) {
            Some(log) => log.write(transport, confirmed, update_length).await,
            None => {
                ChangeLog::new(self.retention, self.latest_time)
                    .write(transport, confirmed, update_length)
                    .await
            }
        }
    }

    pub fn get(&self, key: K) -> Option<&ChangeLog> {
        self.logs.get(&key)
    }

    pub fn latest_time(&self) -> GameTime {
        self.latest_time
    }
}
