//! Item records stored in a priority table.
//!
//! An item bundles a metadata record (key, priority, sampling counters) with
//! a list of shared chunk handles. The table owns the record; the chunk bytes
//! are owned by the [`ChunkStore`](crate::core::chunk_store::ChunkStore) and
//! shared by reference counting, so cloning an item never copies payload
//! data.

use std::sync::Arc;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::core::chunk_store::{Chunk, ChunkKey};

/// Unique identifier of an item within a table.
pub type Key = u64;

/// Slice of a chunk that an item's payload occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceRange {
    /// Key of the chunk holding the sequence.
    pub chunk_key: ChunkKey,
    /// First step of the sequence within the chunk.
    pub offset: u32,
    /// Number of steps in the sequence.
    pub length: u32,
}

impl SequenceRange {
    /// Create a new sequence range.
    pub fn new(chunk_key: ChunkKey, offset: u32, length: u32) -> Self {
        Self {
            chunk_key,
            offset,
            length,
        }
    }
}

/// Metadata record of a table item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemMetadata {
    /// Name of the table the item belongs to.
    pub table: String,
    /// Key of the item, unique within the table.
    pub key: Key,
    /// Sampling priority. Must be finite; the prioritized distribution
    /// additionally requires it to be non-negative.
    pub priority: f64,
    /// Number of times the item has been returned by `sample`.
    pub times_sampled: i32,
    /// Wall-clock time of the insert that created the item. `None` until the
    /// item has been committed to a table.
    pub inserted_at: Option<SystemTime>,
    /// Location of the item's payload within its chunks.
    pub sequence_range: SequenceRange,
}

/// An item as stored in (and returned from) a priority table.
///
/// Cloning produces a deep copy of the metadata but shares the chunk
/// handles, so a sampled snapshot stays valid after the table mutates or
/// drops the original.
#[derive(Debug, Clone)]
pub struct TableItem {
    /// Metadata record.
    pub metadata: ItemMetadata,
    /// Shared handles to the chunks referenced by `sequence_range`.
    pub chunks: Vec<Arc<Chunk>>,
}

impl TableItem {
    /// Create a new item that has not yet been inserted anywhere.
    pub fn new(key: Key, priority: f64, sequence_range: SequenceRange, chunks: Vec<Arc<Chunk>>) -> Self {
        Self {
            metadata: ItemMetadata {
                table: String::new(),
                key,
                priority,
                times_sampled: 0,
                inserted_at: None,
                sequence_range,
            },
            chunks,
        }
    }

    /// Key of the item.
    pub fn key(&self) -> Key {
        self.metadata.key
    }

    /// Current priority of the item.
    pub fn priority(&self) -> f64 {
        self.metadata.priority
    }

    /// Keys of the chunks the item references.
    pub fn chunk_keys(&self) -> Vec<ChunkKey> {
        self.chunks.iter().map(|c| c.key()).collect()
    }
}

/// A priority overwrite addressed to an existing item, as used by
/// [`PriorityTable::mutate_items`](crate::table::PriorityTable::mutate_items).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriorityUpdate {
    /// Key of the item to update.
    pub key: Key,
    /// New priority.
    pub priority: f64,
}

impl PriorityUpdate {
    /// Create a new priority update.
    pub fn new(key: Key, priority: f64) -> Self {
        Self { key, priority }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_item_is_unsampled() {
        let item = TableItem::new(3, 123.0, SequenceRange::new(300, 0, 1), vec![]);
        assert_eq!(item.key(), 3);
        assert_eq!(item.priority(), 123.0);
        assert_eq!(item.metadata.times_sampled, 0);
        assert!(item.metadata.inserted_at.is_none());
        assert!(item.metadata.table.is_empty());
    }

    #[test]
    fn test_clone_shares_chunks() {
        let chunk = Arc::new(Chunk::new(300, vec![1, 2, 3]));
        let item = TableItem::new(3, 1.0, SequenceRange::new(300, 0, 1), vec![chunk.clone()]);
        let copy = item.clone();
        assert!(Arc::ptr_eq(&item.chunks[0], &copy.chunks[0]));
        assert_eq!(copy.chunk_keys(), vec![300]);
    }
}
