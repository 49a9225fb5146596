//! Persistence collaborators for learned confidence.

use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Learned confidence for one `rule@target` key.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeuristicRecord {
    /// Confidence in `[0.1, 1.0]`.
    pub confidence: f64,
    /// Number of successful executions.
    #[serde(default)]
    pub successes: u64,
    /// Number of failed executions.
    #[serde(default)]
    pub failures: u64,
}

/// Ordered map of heuristic key to record.
pub type HeuristicMap = IndexMap<String, HeuristicRecord>;

/// Durable backing store for the heuristic map.
pub trait HeuristicStorage: Send + Sync {
    /// Loads the persisted map. `Ok(None)` means nothing has been saved yet.
    fn load(&self) -> Result<Option<HeuristicMap>, StorageError>;

    /// Replaces the persisted map.
    fn save(&self, records: &HeuristicMap) -> Result<(), StorageError>;
}

/// Pretty-printed JSON file written via temp file and rename.
#[derive(Debug, Clone)]
pub struct JsonFileStorage {
    path: PathBuf,
}

impl JsonFileStorage {
    /// Storage rooted at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Destination file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: io::Error) -> StorageError {
        StorageError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl HeuristicStorage for JsonFileStorage {
    fn load(&self) -> Result<Option<HeuristicMap>, StorageError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(self.io_error(err)),
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| StorageError::Corrupt {
                path: self.path.clone(),
                source,
            })
    }

    fn save(&self, records: &HeuristicMap) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| self.io_error(err))?;
        }
        let data = serde_json::to_vec_pretty(records)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, data).map_err(|err| self.io_error(err))?;
        fs::rename(&tmp, &self.path).map_err(|err| self.io_error(err))
    }
}

/// In-memory storage that counts writes and can be told to fail them.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    records: Mutex<Option<HeuristicMap>>,
    saves: AtomicUsize,
    fail_writes: AtomicBool,
}

impl MemoryStorage {
    /// Empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful saves.
    #[must_use]
    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Makes subsequent saves fail with [`StorageError::Unavailable`].
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Last persisted map.
    #[must_use]
    pub fn persisted(&self) -> Option<HeuristicMap> {
        self.records.lock().clone()
    }
}

impl HeuristicStorage for MemoryStorage {
    fn load(&self) -> Result<Option<HeuristicMap>, StorageError> {
        Ok(self.records.lock().clone())
    }

    fn save(&self, records: &HeuristicMap) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("writes disabled".into()));
        }
        *self.records.lock() = Some(records.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
