//! Reference-counted store of binary chunks.
//!
//! Chunks hold the large binary payloads (flattened tensor data) that table
//! items reference. Many items can point into the same chunk, so the store
//! hands out `Arc<Chunk>` handles and keeps only `Weak` references itself:
//! a chunk's bytes are freed as soon as the last item or sampled snapshot
//! holding it is dropped. [`ChunkStore::cleanup`] sweeps map entries whose
//! chunk has already expired.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

/// Unique identifier of a chunk.
pub type ChunkKey = u64;

/// An immutable binary chunk shared between items.
#[derive(Debug, PartialEq, Eq)]
pub struct Chunk {
    key: ChunkKey,
    data: Vec<u8>,
}

impl Chunk {
    /// Create a new chunk.
    pub fn new(key: ChunkKey, data: Vec<u8>) -> Self {
        Self { key, data }
    }

    /// Key of the chunk.
    pub fn key(&self) -> ChunkKey {
        self.key
    }

    /// Raw chunk bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Size of the chunk payload in bytes.
    pub fn size_bytes(&self) -> usize {
        self.data.len()
    }
}

/// Keyed store of weakly-held chunks.
pub struct ChunkStore {
    chunks: Mutex<HashMap<ChunkKey, Weak<Chunk>>>,
}

impl ChunkStore {
    /// Create an empty chunk store.
    pub fn new() -> Self {
        Self {
            chunks: Mutex::new(HashMap::new()),
        }
    }

    /// Insert a chunk and return a shared handle to it.
    ///
    /// If a live chunk with the same key already exists the existing handle
    /// is returned and `data` is discarded, so repeated inserts of the same
    /// chunk deduplicate to one allocation.
    pub fn insert(&self, key: ChunkKey, data: Vec<u8>) -> Arc<Chunk> {
        let mut chunks = self.chunks.lock();
        if let Some(existing) = chunks.get(&key).and_then(Weak::upgrade) {
            return existing;
        }
        let chunk = Arc::new(Chunk::new(key, data));
        chunks.insert(key, Arc::downgrade(&chunk));
        chunk
    }

    /// Look up a live chunk by key.
    ///
    /// Returns `None` when the key is unknown or the chunk has expired.
    pub fn get(&self, key: ChunkKey) -> Option<Arc<Chunk>> {
        self.chunks.lock().get(&key).and_then(Weak::upgrade)
    }

    /// Look up a batch of chunks, failing on the first missing key.
    pub fn get_all(&self, keys: &[ChunkKey]) -> Result<Vec<Arc<Chunk>>, ChunkKey> {
        let chunks = self.chunks.lock();
        keys.iter()
            .map(|key| chunks.get(key).and_then(Weak::upgrade).ok_or(*key))
            .collect()
    }

    /// Drop map entries whose chunk has expired. Returns the number of
    /// entries removed.
    pub fn cleanup(&self) -> usize {
        let mut chunks = self.chunks.lock();
        let before = chunks.len();
        chunks.retain(|_, weak| weak.strong_count() > 0);
        before - chunks.len()
    }

    /// Number of chunks currently alive.
    pub fn len(&self) -> usize {
        self.chunks
            .lock()
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    /// Check whether no live chunk remains.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ChunkStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let store = ChunkStore::new();
        let chunk = store.insert(1, vec![1, 2, 3]);
        assert_eq!(chunk.key(), 1);
        assert_eq!(chunk.data(), &[1, 2, 3]);

        let same = store.get(1).unwrap();
        assert!(Arc::ptr_eq(&chunk, &same));
    }

    #[test]
    fn test_insert_deduplicates_by_key() {
        let store = ChunkStore::new();
        let first = store.insert(1, vec![1, 2, 3]);
        let second = store.insert(1, vec![9, 9, 9]);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.data(), &[1, 2, 3]);
    }

    #[test]
    fn test_expired_chunk_is_gone() {
        let store = ChunkStore::new();
        let chunk = store.insert(1, vec![1]);
        drop(chunk);
        assert!(store.get(1).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_cleanup_sweeps_expired_entries() {
        let store = ChunkStore::new();
        let keep = store.insert(1, vec![1]);
        let expire = store.insert(2, vec![2]);
        drop(expire);

        assert_eq!(store.cleanup(), 1);
        assert_eq!(store.len(), 1);
        assert!(store.get(1).is_some());
        drop(keep);
    }

    #[test]
    fn test_get_all_reports_missing_key() {
        let store = ChunkStore::new();
        let _chunk = store.insert(1, vec![1]);
        assert_eq!(store.get_all(&[1, 2]).unwrap_err(), 2);
        assert_eq!(store.get_all(&[1]).unwrap().len(), 1);
    }
}
