//! # Replay Table: concurrent priority tables for experience replay
//!
//! A bounded, keyed, priority-based replay buffer for reinforcement-learning
//! trainers: many producer threads insert items, many consumer threads
//! sample them under a configurable distribution, and a two-sided rate
//! limiter couples the sampling and insertion rates so neither side outruns
//! the other. Items reference large binary chunks by reference counting, so
//! any number of items (and in-flight sampled snapshots) share one copy of
//! the payload bytes.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                         PriorityTable                          │
//! ├────────────────────────────────────────────────────────────────┤
//! │ Producer 0 ─┐   insert gate          sample gate  ┌─ Consumer 0│
//! │ Producer 1 ─┼──────►┌──────────────────────┐◄─────┼─ Consumer 1│
//! │ Producer N ─┘       │      one mutex       │      └─ Consumer M│
//! │                     │  item map            │                   │
//! │                     │  sampler  (Uniform / │                   │
//! │                     │   FIFO / LIFO /      │                   │
//! │                     │   Prioritized)       │                   │
//! │                     │  remover             │                   │
//! │                     │  rate limiter        │                   │
//! │                     │  extensions          │                   │
//! │                     └──────────┬───────────┘                   │
//! │                                ▼                               │
//! │                           ChunkStore                           │
//! │                 (ref-counted shared payloads)                  │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Inserts beyond `max_size` evict one victim chosen by the remover; items
//! sampled up to a configured cap are auto-deleted. With FIFO sampler and
//! remover, a cap of 1 and a `[0, max_size]` limiter window, the table
//! behaves as a bounded blocking queue.
//!
//! ## Usage
//!
//! ```
//! use replay_table::{SequenceRange, TableConfig, TableItem};
//!
//! # fn main() -> Result<(), replay_table::TableError> {
//! let table = TableConfig::new("experience").build()?;
//!
//! let item = TableItem::new(1, 1.5, SequenceRange::new(100, 0, 1), vec![]);
//! table.insert_or_assign(item, None)?;
//!
//! let sampled = table.sample(None)?;
//! assert_eq!(sampled.item.key(), 1);
//! # Ok(())
//! # }
//! ```

pub mod checkpoint;
pub mod core;
pub mod distributions;
pub mod error;
pub mod table;

// Re-export commonly used types
pub use self::core::chunk_store::{Chunk, ChunkKey, ChunkStore};
pub use self::core::item::{ItemMetadata, Key, PriorityUpdate, SequenceRange, TableItem};

pub use distributions::{
    DistributionError, DistributionOptions, FifoDistribution, KeyDistribution,
    KeyWithProbability, LifoDistribution, PrioritizedDistribution, UniformDistribution,
};

pub use table::{
    InsertOnSampleExtension, PriorityTable, RateLimiter, RateLimiterCheckpoint,
    RateLimiterConfig, SampledItem, TableConfig, TableExtension,
};

pub use checkpoint::{
    CheckpointError, CheckpointItem, Checkpointer, CheckpointerConfig, TableCheckpoint,
    TableCheckpointData,
};

pub use error::TableError;
