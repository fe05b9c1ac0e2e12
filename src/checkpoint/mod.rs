//! Table checkpointing.
//!
//! A checkpoint captures everything needed to rebuild a table: its
//! construction parameters, its items in the remover's iteration order, the
//! rate limiter counters, and the variant tags of the two distributions.
//! The item order is significant — restoring replays the inserts in record
//! order so the remover reconstructs the same eviction queue.
//!
//! ## Example
//!
//! ```rust,ignore
//! use replay_table::checkpoint::{Checkpointer, CheckpointerConfig};
//!
//! let config = CheckpointerConfig::new("./checkpoints").with_keep_last_n(3);
//! let checkpointer = Checkpointer::new(config)?;
//!
//! checkpointer.save(&[table.clone()])?;
//!
//! // On restart:
//! let (tables, chunk_store) = checkpointer.load_latest()?;
//! ```

pub mod checkpointer;

pub use checkpointer::{CheckpointError, Checkpointer, CheckpointerConfig};

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::chunk_store::{Chunk, ChunkKey};
use crate::core::item::ItemMetadata;
use crate::distributions::DistributionOptions;
use crate::table::rate_limiter::RateLimiterCheckpoint;

/// Checkpointed form of a single item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointItem {
    /// The item's metadata record, including priority and sampling count.
    pub metadata: ItemMetadata,
    /// Keys of the chunks the item references; resolved against the chunk
    /// set stored next to the table records.
    pub chunk_keys: Vec<ChunkKey>,
}

/// Checkpointed form of a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableCheckpoint {
    /// Name of the table.
    pub table_name: String,
    /// Maximum table size.
    pub max_size: i64,
    /// Sampling cap; zero or negative means unlimited.
    pub max_times_sampled: i32,
    /// Items in the remover's iteration order at snapshot time.
    pub items: Vec<CheckpointItem>,
    /// Rate limiter parameters and counters.
    pub rate_limiter: RateLimiterCheckpoint,
    /// Variant tag of the sampler.
    pub sampler: DistributionOptions,
    /// Variant tag of the remover.
    pub remover: DistributionOptions,
}

/// A table checkpoint together with the live chunk handles its items
/// reference. Holding the handles keeps the bytes alive between snapshot
/// and serialization.
#[derive(Debug, Clone)]
pub struct TableCheckpointData {
    /// The serializable table record.
    pub checkpoint: TableCheckpoint,
    /// Live handles for every chunk referenced by `checkpoint.items`,
    /// deduplicated by key.
    pub chunks: Vec<Arc<Chunk>>,
}
