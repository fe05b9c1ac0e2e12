//! Disk persistence for table checkpoints.
//!
//! Each save writes a fresh timestamped directory under the configured root:
//! `tables.json` (the table records, items in remover order), `chunks.json`
//! (the referenced chunk bytes, deduplicated across tables) and finally an
//! empty `DONE` marker. A directory without the marker is an interrupted
//! save and is ignored by `load_latest`. Old checkpoints beyond
//! `keep_last_n` are pruned after each successful save.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::checkpoint::TableCheckpoint;
use crate::core::chunk_store::{Chunk, ChunkKey, ChunkStore};
use crate::error::TableError;
use crate::table::PriorityTable;

const TABLES_FILE_NAME: &str = "tables.json";
const CHUNKS_FILE_NAME: &str = "chunks.json";
const DONE_FILE_NAME: &str = "DONE";

/// Configuration for the checkpointer.
#[derive(Debug, Clone)]
pub struct CheckpointerConfig {
    /// Directory that holds one subdirectory per checkpoint.
    pub root_dir: PathBuf,
    /// Number of recent checkpoints to keep (0 = keep all).
    pub keep_last_n: usize,
}

impl CheckpointerConfig {
    /// Create a config rooted at the given directory.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            keep_last_n: 5,
        }
    }

    /// Set the number of checkpoints to keep.
    pub fn with_keep_last_n(mut self, n: usize) -> Self {
        self.keep_last_n = n;
        self
    }
}

/// Error type for checkpoint persistence.
#[derive(Debug)]
pub enum CheckpointError {
    /// IO error during save/load.
    Io(io::Error),
    /// Encoding or decoding of a checkpoint file failed.
    Encode(serde_json::Error),
    /// A table record could not be rebuilt into a table.
    Table(TableError),
    /// No complete checkpoint found under the root directory.
    NoCheckpoints,
}

impl std::fmt::Display for CheckpointError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckpointError::Io(e) => write!(f, "IO error: {}", e),
            CheckpointError::Encode(e) => write!(f, "encode error: {}", e),
            CheckpointError::Table(e) => write!(f, "table restore error: {}", e),
            CheckpointError::NoCheckpoints => write!(f, "no checkpoints found"),
        }
    }
}

impl std::error::Error for CheckpointError {}

impl From<io::Error> for CheckpointError {
    fn from(e: io::Error) -> Self {
        CheckpointError::Io(e)
    }
}

impl From<serde_json::Error> for CheckpointError {
    fn from(e: serde_json::Error) -> Self {
        CheckpointError::Encode(e)
    }
}

impl From<TableError> for CheckpointError {
    fn from(e: TableError) -> Self {
        CheckpointError::Table(e)
    }
}

/// Serialized form of a chunk, stored next to the table records.
#[derive(Debug, Serialize, Deserialize)]
struct StoredChunk {
    key: ChunkKey,
    data: Vec<u8>,
}

/// Saves and loads sets of tables as checkpoint directories.
pub struct Checkpointer {
    config: CheckpointerConfig,
}

impl Checkpointer {
    /// Create a checkpointer, creating the root directory if needed.
    pub fn new(config: CheckpointerConfig) -> Result<Self, CheckpointError> {
        fs::create_dir_all(&config.root_dir)?;
        Ok(Self { config })
    }

    /// Get the configuration.
    pub fn config(&self) -> &CheckpointerConfig {
        &self.config
    }

    /// Save a consistent snapshot of `tables` into a new checkpoint
    /// directory and prune old checkpoints. Returns the directory path.
    pub fn save(&self, tables: &[Arc<PriorityTable>]) -> Result<PathBuf, CheckpointError> {
        let dir_path = self.config.root_dir.join(Self::dir_name_now());
        fs::create_dir_all(&dir_path)?;

        let mut records = Vec::with_capacity(tables.len());
        let mut chunks: Vec<StoredChunk> = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for table in tables {
            let data = table.checkpoint();
            for chunk in &data.chunks {
                if seen.insert(chunk.key()) {
                    chunks.push(StoredChunk {
                        key: chunk.key(),
                        data: chunk.data().to_vec(),
                    });
                }
            }
            records.push(data.checkpoint);
        }

        fs::write(
            dir_path.join(TABLES_FILE_NAME),
            serde_json::to_vec(&records)?,
        )?;
        fs::write(
            dir_path.join(CHUNKS_FILE_NAME),
            serde_json::to_vec(&chunks)?,
        )?;
        // Written last: its presence marks the checkpoint as complete.
        fs::write(dir_path.join(DONE_FILE_NAME), "")?;

        self.cleanup_old_checkpoints()?;
        Ok(dir_path)
    }

    /// Load the most recent complete checkpoint.
    ///
    /// Returns the restored tables (in file order) and a chunk store holding
    /// the restored chunks. Extensions do not survive a checkpoint; after
    /// re-registering them, dispatch
    /// [`signal_checkpoint_loaded`](PriorityTable::signal_checkpoint_loaded)
    /// on each table so cross-table extensions can re-resolve their targets.
    pub fn load_latest(&self) -> Result<(Vec<Arc<PriorityTable>>, ChunkStore), CheckpointError> {
        let dir_path = self
            .list_checkpoints()?
            .pop()
            .ok_or(CheckpointError::NoCheckpoints)?;
        self.load(&dir_path)
    }

    /// Load a specific checkpoint directory.
    pub fn load(
        &self,
        dir_path: &Path,
    ) -> Result<(Vec<Arc<PriorityTable>>, ChunkStore), CheckpointError> {
        let stored_chunks: Vec<StoredChunk> =
            serde_json::from_slice(&fs::read(dir_path.join(CHUNKS_FILE_NAME))?)?;
        let records: Vec<TableCheckpoint> =
            serde_json::from_slice(&fs::read(dir_path.join(TABLES_FILE_NAME))?)?;

        let chunk_store = ChunkStore::new();
        let mut handles: HashMap<ChunkKey, Arc<Chunk>> = HashMap::new();
        for stored in stored_chunks {
            let handle = chunk_store.insert(stored.key, stored.data);
            handles.insert(handle.key(), handle);
        }

        let mut tables = Vec::with_capacity(records.len());
        for record in &records {
            tables.push(Arc::new(PriorityTable::from_checkpoint(record, &handles)?));
        }
        Ok((tables, chunk_store))
    }

    /// Complete checkpoint directories under the root, oldest first.
    pub fn list_checkpoints(&self) -> Result<Vec<PathBuf>, CheckpointError> {
        let mut checkpoints: Vec<PathBuf> = fs::read_dir(&self.config.root_dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_dir() && path.join(DONE_FILE_NAME).exists())
            .collect();
        checkpoints.sort();
        Ok(checkpoints)
    }

    /// Directory name derived from the current wall-clock time; sorts
    /// chronologically.
    fn dir_name_now() -> String {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        format!("ckpt_{:024}", nanos)
    }

    /// Remove complete checkpoints beyond `keep_last_n`, newest kept.
    fn cleanup_old_checkpoints(&self) -> Result<(), CheckpointError> {
        if self.config.keep_last_n == 0 {
            return Ok(());
        }
        let checkpoints = self.list_checkpoints()?;
        if checkpoints.len() <= self.config.keep_last_n {
            return Ok(());
        }
        let excess = checkpoints.len() - self.config.keep_last_n;
        for old in &checkpoints[..excess] {
            if let Err(err) = fs::remove_dir_all(old) {
                log::warn!("failed to prune old checkpoint {}: {}", old.display(), err);
            }
        }
        Ok(())
    }
}
