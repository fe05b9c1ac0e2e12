//! The priority table: a concurrent, bounded, keyed replay buffer.
//!
//! Producers insert keyed items, consumers sample them under a pluggable
//! distribution, and a rate limiter couples the two sides so neither outruns
//! the other.
//!
//! # Data flow
//!
//! ```text
//! Producer 0 ─┐                                      ┌─ Consumer 0
//! Producer 1 ─┼─ insert_or_assign ─> PriorityTable ──┼─ Consumer 1
//! Producer N ─┘        (insert gate)    │  ▲         └─ Consumer M
//!                                       │  │ sample (sample gate)
//!                        item map ──────┤  │
//!                        sampler  ──────┤  │
//!                        remover  ──────┤  │
//!                        rate limiter ──┘  │
//!                                          ▼
//!                              SampledItem (metadata snapshot
//!                               + shared chunk handles)
//! ```
//!
//! # Locking
//!
//! One mutex covers the item map, both distributions, the rate limiter
//! counters and the extension list, so every committed operation is observed
//! atomically. The two gates are condition variables on that mutex: any
//! counter change broadcasts to both sides and each woken waiter re-checks
//! its predicate. `close` cancels the limiter and wakes everyone.

pub mod extensions;
pub mod rate_limiter;

pub use extensions::{InsertOnSampleExtension, TableExtension};
pub use rate_limiter::{RateLimiter, RateLimiterCheckpoint, RateLimiterConfig};


use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::checkpoint::{CheckpointItem, TableCheckpoint, TableCheckpointData};
use crate::core::chunk_store::{Chunk, ChunkKey};
use crate::core::item::{Key, PriorityUpdate, TableItem};
use crate::distributions::{DistributionOptions, KeyDistribution};
use crate::error::TableError;

/// Construction parameters for a [`PriorityTable`].
#[derive(Debug, Clone)]
pub struct TableConfig {
    /// Name of the table, used to address it in checkpoints and extensions.
    pub name: String,
    /// Maximum number of items; one item is evicted per insert beyond this.
    /// Must be positive.
    pub max_size: i64,
    /// Auto-delete items once sampled this many times. Zero or negative
    /// means unlimited.
    pub max_times_sampled: i32,
    /// Distribution consumers sample from.
    pub sampler: DistributionOptions,
    /// Distribution that picks eviction victims (and defines checkpoint
    /// item order). FIFO evicts the oldest item, LIFO the newest,
    /// Prioritized low-priority items first, Uniform a random one.
    pub remover: DistributionOptions,
    /// Rate limiter parameters.
    pub rate_limiter: RateLimiterConfig,
}

impl TableConfig {
    /// Create a config with a uniform sampler, FIFO remover, room for 1000
    /// items, no sampling cap and a limiter that only waits for the first
    /// item.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_size: 1000,
            max_times_sampled: 0,
            sampler: DistributionOptions::Uniform,
            remover: DistributionOptions::Fifo,
            rate_limiter: RateLimiterConfig::default(),
        }
    }

    /// Set the maximum table size.
    pub fn with_max_size(mut self, max_size: i64) -> Self {
        self.max_size = max_size;
        self
    }

    /// Set the sampling cap.
    pub fn with_max_times_sampled(mut self, max_times_sampled: i32) -> Self {
        self.max_times_sampled = max_times_sampled;
        self
    }

    /// Set the sampler distribution.
    pub fn with_sampler(mut self, sampler: DistributionOptions) -> Self {
        self.sampler = sampler;
        self
    }

    /// Set the remover distribution.
    pub fn with_remover(mut self, remover: DistributionOptions) -> Self {
        self.remover = remover;
        self
    }

    /// Set the rate limiter parameters.
    pub fn with_rate_limiter(mut self, rate_limiter: RateLimiterConfig) -> Self {
        self.rate_limiter = rate_limiter;
        self
    }

    /// Validate the parameters and build the table.
    pub fn build(self) -> Result<PriorityTable, TableError> {
        PriorityTable::new(self)
    }
}

/// Result of a successful `sample` call.
///
/// The metadata is a deep copy taken under the lock and the chunk handles
/// are shared, so the snapshot stays valid however the table mutates
/// afterwards.
#[derive(Debug, Clone)]
pub struct SampledItem {
    /// Snapshot of the sampled item, including its chunk handles.
    pub item: TableItem,
    /// Probability under which the sampler selected the item.
    pub probability: f64,
    /// Table size immediately after the sample committed.
    pub table_size: i64,
}

/// Everything the table mutex protects.
struct TableState {
    items: HashMap<Key, TableItem>,
    sampler: Box<dyn KeyDistribution>,
    remover: Box<dyn KeyDistribution>,
    limiter: RateLimiter,
    extensions: Vec<Box<dyn TableExtension>>,
    closed: bool,
}

/// A concurrent, bounded, priority-keyed replay table.
///
/// All operations are thread-safe. `insert_or_assign` and `sample` may block
/// on the rate limiter gates; everything else only takes the table mutex.
pub struct PriorityTable {
    name: String,
    max_size: i64,
    max_times_sampled: i32,
    state: Mutex<TableState>,
    can_insert: Condvar,
    can_sample: Condvar,
}

impl PriorityTable {
    /// Build a table from a validated config.
    pub fn new(config: TableConfig) -> Result<Self, TableError> {
        if config.max_size <= 0 {
            return Err(TableError::InvalidArgument(format!(
                "max_size {} must be positive",
                config.max_size
            )));
        }
        let sampler = config.sampler.build()?;
        let remover = config.remover.build_remover()?;
        let limiter = RateLimiter::new(config.rate_limiter)?;
        Ok(Self::with_parts(
            config.name,
            config.max_size,
            config.max_times_sampled,
            sampler,
            remover,
            limiter,
        ))
    }

    fn with_parts(
        name: String,
        max_size: i64,
        max_times_sampled: i32,
        sampler: Box<dyn KeyDistribution>,
        remover: Box<dyn KeyDistribution>,
        limiter: RateLimiter,
    ) -> Self {
        Self {
            name,
            max_size,
            max_times_sampled,
            state: Mutex::new(TableState {
                items: HashMap::new(),
                sampler,
                remover,
                limiter,
                extensions: Vec::new(),
                closed: false,
            }),
            can_insert: Condvar::new(),
            can_sample: Condvar::new(),
        }
    }

    /// Rebuild a table from a checkpoint record.
    ///
    /// Items are replayed in record order (the remover's iteration order at
    /// checkpoint time), so the restored remover evicts in the same order
    /// the original would have. The rate limiter counters are restored from
    /// the record; chunk handles are re-attached from `chunks`.
    pub fn from_checkpoint(
        checkpoint: &TableCheckpoint,
        chunks: &HashMap<ChunkKey, Arc<Chunk>>,
    ) -> Result<Self, TableError> {
        Self::from_checkpoint_with_extensions(checkpoint, chunks, Vec::new())
    }

    /// Rebuild a table from a checkpoint record with extensions attached.
    ///
    /// Extensions must be registered before the items are replayed (they
    /// cannot be retro-fitted to a populated table), so restore wires them
    /// in here. Replayed items do not fire `on_insert`: they are restored
    /// state, not new experience. After every table of the checkpoint has
    /// been rebuilt, dispatch
    /// [`signal_checkpoint_loaded`](Self::signal_checkpoint_loaded) so
    /// cross-table extensions can re-resolve their targets.
    pub fn from_checkpoint_with_extensions(
        checkpoint: &TableCheckpoint,
        chunks: &HashMap<ChunkKey, Arc<Chunk>>,
        extensions: Vec<Box<dyn TableExtension>>,
    ) -> Result<Self, TableError> {
        if checkpoint.max_size <= 0 {
            return Err(TableError::InvalidArgument(format!(
                "max_size {} must be positive",
                checkpoint.max_size
            )));
        }
        let sampler = checkpoint.sampler.build()?;
        let remover = checkpoint.remover.build_remover()?;
        let limiter = RateLimiter::from_checkpoint(&checkpoint.rate_limiter)?;
        let table = Self::with_parts(
            checkpoint.table_name.clone(),
            checkpoint.max_size,
            checkpoint.max_times_sampled,
            sampler,
            remover,
            limiter,
        );
        for extension in extensions {
            table.unsafe_add_extension(extension);
        }
        {
            let mut state = table.state.lock();
            for record in &checkpoint.items {
                let mut handles = Vec::with_capacity(record.chunk_keys.len());
                for chunk_key in &record.chunk_keys {
                    let chunk = chunks.get(chunk_key).ok_or_else(|| {
                        TableError::InvalidArgument(format!(
                            "item {} references missing chunk {}",
                            record.metadata.key, chunk_key
                        ))
                    })?;
                    handles.push(Arc::clone(chunk));
                }
                let key = record.metadata.key;
                let priority = record.metadata.priority;
                state.sampler.insert(key, priority).map_err(TableError::from)?;
                state.remover.insert(key, priority).map_err(TableError::from)?;
                state.items.insert(
                    key,
                    TableItem {
                        metadata: record.metadata.clone(),
                        chunks: handles,
                    },
                );
            }
        }
        Ok(table)
    }

    /// Name of the table.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Maximum number of items the table holds.
    pub fn max_size(&self) -> i64 {
        self.max_size
    }

    /// Sampling cap, zero or negative meaning unlimited.
    pub fn max_times_sampled(&self) -> i32 {
        self.max_times_sampled
    }

    /// Current number of items.
    pub fn size(&self) -> i64 {
        self.state.lock().items.len() as i64
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Insert a new item, or overwrite the priority of an existing one.
    ///
    /// A new key waits on the insert gate (bounded by `timeout`; `None`
    /// waits forever) and, once committed, evicts the remover's victim if
    /// the table overflowed. An existing key is a pure update: no gate, no
    /// insert count. A caller that finds its key inserted by someone else
    /// while it waited degrades to an update and passes the admission on to
    /// the next waiter.
    pub fn insert_or_assign(
        &self,
        mut item: TableItem,
        timeout: Option<Duration>,
    ) -> Result<(), TableError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let key = item.metadata.key;
        let priority = item.metadata.priority;
        if !priority.is_finite() {
            return Err(TableError::InvalidArgument(format!(
                "priority {} must be finite",
                priority
            )));
        }

        let mut state = self.state.lock();
        if state.closed {
            return Err(TableError::Cancelled);
        }
        if state.items.contains_key(&key) {
            return self.update_item(&mut state, key, priority);
        }

        self.await_can_insert(&mut state, deadline)?;
        if state.items.contains_key(&key) {
            // Another producer inserted the key while we waited. Pass the
            // admission to the next waiter and apply a plain update.
            self.can_insert.notify_all();
            return self.update_item(&mut state, key, priority);
        }

        // Stamped under the lock: the timestamp order matches the order the
        // item enters the sampler and remover.
        item.metadata.table = self.name.clone();
        item.metadata.inserted_at = Some(SystemTime::now());

        state.sampler.insert(key, priority).map_err(TableError::from)?;
        if let Err(err) = state.remover.insert(key, priority) {
            let removed = state.sampler.delete(key);
            assert!(
                removed.is_ok(),
                "sampler rejected rollback of key {} after remover insert failed",
                key
            );
            return Err(err.into());
        }
        state.items.insert(key, item);
        self.notify_insert(&mut state, key);
        state.limiter.insert();
        self.can_insert.notify_all();
        self.can_sample.notify_all();

        if state.items.len() as i64 > self.max_size {
            let victim = state.remover.sample().key;
            self.delete_item(&mut state, victim);
        }
        Ok(())
    }

    /// Atomically apply a batch of priority updates and deletions.
    ///
    /// Absent keys are silently skipped on both sides. The batch executes
    /// under a single lock acquisition and never touches the limiter gates
    /// (deletions still count against the table size).
    pub fn mutate_items(
        &self,
        updates: &[PriorityUpdate],
        deletes: &[Key],
    ) -> Result<(), TableError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(TableError::Cancelled);
        }
        for update in updates {
            if state.items.contains_key(&update.key) {
                self.update_item(&mut state, update.key, update.priority)?;
            }
        }
        for &key in deletes {
            if state.items.contains_key(&key) {
                self.delete_item(&mut state, key);
            }
        }
        Ok(())
    }

    /// Sample an item according to the sampler distribution.
    ///
    /// Waits on the sample gate (bounded by `timeout`; `None` waits
    /// forever). The sampled item's `times_sampled` is incremented and, if a
    /// positive cap is configured and reached, the item is auto-deleted
    /// after this snapshot was taken.
    pub fn sample(&self, timeout: Option<Duration>) -> Result<SampledItem, TableError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.state.lock();
        self.await_can_sample(&mut state, deadline)?;

        let sampled = state.sampler.sample();
        let (snapshot, times_sampled) = {
            let Some(item) = state.items.get_mut(&sampled.key) else {
                panic!("sampler out of sync with item map for key {}", sampled.key);
            };
            item.metadata.times_sampled += 1;
            (item.clone(), item.metadata.times_sampled)
        };
        self.notify_sample(&mut state, &snapshot, times_sampled);

        if self.max_times_sampled > 0 && times_sampled >= self.max_times_sampled {
            self.delete_item(&mut state, sampled.key);
        }
        state.limiter.sample();
        self.can_insert.notify_all();
        self.can_sample.notify_all();

        Ok(SampledItem {
            item: snapshot,
            probability: sampled.probability,
            table_size: state.items.len() as i64,
        })
    }

    /// Snapshot a single item by key. Touches neither the limiter nor the
    /// item's sampling count.
    pub fn get(&self, key: Key) -> Option<TableItem> {
        self.state.lock().items.get(&key).cloned()
    }

    /// Snapshot up to `count` items (all of them if `count` is 0) in the
    /// remover's iteration order.
    pub fn copy(&self, count: usize) -> Vec<TableItem> {
        let state = self.state.lock();
        let mut items = Vec::new();
        for key in state.remover.keys() {
            if count > 0 && items.len() >= count {
                break;
            }
            match state.items.get(&key) {
                Some(item) => items.push(item.clone()),
                None => panic!("remover out of sync with item map for key {}", key),
            }
        }
        items
    }

    /// Take a consistent checkpoint of the table.
    ///
    /// The record lists items in the remover's iteration order and is
    /// returned together with the live chunk handles needed to reconstruct
    /// them, so the bytes cannot expire between snapshot and serialization.
    pub fn checkpoint(&self) -> TableCheckpointData {
        let state = self.state.lock();
        let mut items = Vec::with_capacity(state.items.len());
        let mut chunks = Vec::new();
        let mut seen = HashSet::new();
        for key in state.remover.keys() {
            let Some(item) = state.items.get(&key) else {
                panic!("remover out of sync with item map for key {}", key);
            };
            items.push(CheckpointItem {
                metadata: item.metadata.clone(),
                chunk_keys: item.chunk_keys(),
            });
            for chunk in &item.chunks {
                if seen.insert(chunk.key()) {
                    chunks.push(Arc::clone(chunk));
                }
            }
        }
        TableCheckpointData {
            checkpoint: TableCheckpoint {
                table_name: self.name.clone(),
                max_size: self.max_size,
                max_times_sampled: self.max_times_sampled,
                items,
                rate_limiter: state.limiter.checkpoint(),
                sampler: state.sampler.options(),
                remover: state.remover.options(),
            },
            chunks,
        }
    }

    /// Remove every item and zero the rate limiter counters, waking all
    /// waiters. Fails with `Cancelled` once the table is closed.
    pub fn reset(&self) -> Result<(), TableError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(TableError::Cancelled);
        }
        state.items.clear();
        state.sampler.clear();
        state.remover.clear();
        state.limiter.reset();

        let mut extensions = std::mem::take(&mut state.extensions);
        for extension in &mut extensions {
            extension.on_reset();
        }
        state.extensions = extensions;

        self.can_insert.notify_all();
        self.can_sample.notify_all();
        Ok(())
    }

    /// Close the table: cancel the rate limiter and wake all waiters.
    ///
    /// Terminal. Every blocked and subsequent mutating operation returns
    /// `Cancelled`; `get`, `copy`, `size` and `checkpoint` stay readable for
    /// diagnostics.
    pub fn close(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        state.limiter.cancel();
        self.can_insert.notify_all();
        self.can_sample.notify_all();
    }

    /// Register an extension.
    ///
    /// # Panics
    ///
    /// Panics if the table is not empty: extensions observe the full item
    /// lifecycle and cannot be retro-fitted to items they never saw
    /// inserted.
    pub fn unsafe_add_extension(&self, mut extension: Box<dyn TableExtension>) {
        let mut state = self.state.lock();
        assert!(
            state.items.is_empty(),
            "extensions can only be added while the table is empty (size = {})",
            state.items.len()
        );
        extension.after_register(&self.name);
        state.extensions.push(extension);
    }

    /// Remove and return all registered extensions.
    ///
    /// # Panics
    ///
    /// Panics if the table is not empty, for the same reason as
    /// [`unsafe_add_extension`](Self::unsafe_add_extension).
    pub fn unsafe_clear_extensions(&self) -> Vec<Box<dyn TableExtension>> {
        let mut state = self.state.lock();
        assert!(
            state.items.is_empty(),
            "extensions can only be removed while the table is empty (size = {})",
            state.items.len()
        );
        let mut extensions = std::mem::take(&mut state.extensions);
        for extension in &mut extensions {
            extension.before_unregister(&self.name);
        }
        extensions
    }

    /// Dispatch `on_checkpoint_loaded` to this table's extensions after a
    /// checkpoint restore, handing them the full set of restored tables.
    pub fn signal_checkpoint_loaded(&self, tables: &[Arc<PriorityTable>]) {
        let mut state = self.state.lock();
        let mut extensions = std::mem::take(&mut state.extensions);
        for extension in &mut extensions {
            extension.on_checkpoint_loaded(tables);
        }
        state.extensions = extensions;
    }

    /// Block until one insert is admitted, the deadline expires or the table
    /// is cancelled. No state change on failure.
    fn await_can_insert(
        &self,
        state: &mut MutexGuard<'_, TableState>,
        deadline: Option<Instant>,
    ) -> Result<(), TableError> {
        loop {
            if state.closed || state.limiter.is_cancelled() {
                return Err(TableError::Cancelled);
            }
            if state.limiter.can_insert(1) {
                return Ok(());
            }
            match deadline {
                Some(deadline) => {
                    if self.can_insert.wait_until(state, deadline).timed_out() {
                        if state.closed || state.limiter.is_cancelled() {
                            return Err(TableError::Cancelled);
                        }
                        if state.limiter.can_insert(1) {
                            return Ok(());
                        }
                        return Err(TableError::DeadlineExceeded);
                    }
                }
                None => self.can_insert.wait(state),
            }
        }
    }

    /// Block until one sample is admitted, the deadline expires or the table
    /// is cancelled. No state change on failure.
    fn await_can_sample(
        &self,
        state: &mut MutexGuard<'_, TableState>,
        deadline: Option<Instant>,
    ) -> Result<(), TableError> {
        loop {
            if state.closed || state.limiter.is_cancelled() {
                return Err(TableError::Cancelled);
            }
            if state.limiter.can_sample(1) {
                return Ok(());
            }
            match deadline {
                Some(deadline) => {
                    if self.can_sample.wait_until(state, deadline).timed_out() {
                        if state.closed || state.limiter.is_cancelled() {
                            return Err(TableError::Cancelled);
                        }
                        if state.limiter.can_sample(1) {
                            return Ok(());
                        }
                        return Err(TableError::DeadlineExceeded);
                    }
                }
                None => self.can_sample.wait(state),
            }
        }
    }

    /// Overwrite the priority of an existing item in the map and both
    /// distributions. The caller has verified presence.
    fn update_item(
        &self,
        state: &mut TableState,
        key: Key,
        priority: f64,
    ) -> Result<(), TableError> {
        let old_priority = match state.items.get(&key) {
            Some(item) => item.metadata.priority,
            None => panic!("item map lost key {} during update", key),
        };
        state.sampler.update(key, priority).map_err(TableError::from)?;
        if let Err(err) = state.remover.update(key, priority) {
            let rolled_back = state.sampler.update(key, old_priority);
            assert!(
                rolled_back.is_ok(),
                "sampler rejected priority rollback for key {}",
                key
            );
            return Err(err.into());
        }
        if let Some(item) = state.items.get_mut(&key) {
            item.metadata.priority = priority;
        }
        self.notify_update(state, key);
        Ok(())
    }

    /// Remove an item from the map and both distributions, count the
    /// deletion and wake both gates.
    fn delete_item(&self, state: &mut TableState, key: Key) {
        let Some(item) = state.items.remove(&key) else {
            panic!("item map lost key {} during delete", key);
        };
        let removed = state.sampler.delete(key);
        assert!(
            removed.is_ok(),
            "sampler out of sync with item map for key {}",
            key
        );
        let removed = state.remover.delete(key);
        assert!(
            removed.is_ok(),
            "remover out of sync with item map for key {}",
            key
        );
        state.limiter.delete();

        if !state.extensions.is_empty() {
            let mut extensions = std::mem::take(&mut state.extensions);
            for extension in &mut extensions {
                extension.on_delete(&item);
            }
            state.extensions = extensions;
        }
        self.can_insert.notify_all();
        self.can_sample.notify_all();
    }

    fn notify_insert(&self, state: &mut TableState, key: Key) {
        if state.extensions.is_empty() {
            return;
        }
        let mut extensions = std::mem::take(&mut state.extensions);
        if let Some(item) = state.items.get(&key) {
            for extension in &mut extensions {
                extension.on_insert(item);
            }
        }
        state.extensions = extensions;
    }

    fn notify_update(&self, state: &mut TableState, key: Key) {
        if state.extensions.is_empty() {
            return;
        }
        let mut extensions = std::mem::take(&mut state.extensions);
        if let Some(item) = state.items.get(&key) {
            for extension in &mut extensions {
                extension.on_update(item);
            }
        }
        state.extensions = extensions;
    }

    fn notify_sample(&self, state: &mut TableState, item: &TableItem, times_sampled: i32) {
        if state.extensions.is_empty() {
            return;
        }
        let mut extensions = std::mem::take(&mut state.extensions);
        for extension in &mut extensions {
            extension.on_sample(item, times_sampled);
        }
        state.extensions = extensions;
    }
}
