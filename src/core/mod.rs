//! Core data types shared across the crate.

pub mod chunk_store;
pub mod item;

pub use chunk_store::{Chunk, ChunkKey, ChunkStore};
pub use item::{ItemMetadata, Key, PriorityUpdate, SequenceRange, TableItem};
