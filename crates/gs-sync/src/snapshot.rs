// snapshot.rs: Persistence for the last successful goal list response.
//
// The snapshot is the raw JSON body of the last full fetch. It is written
// after every successful fetch, read once when the engine starts so a cold
// start can show goals before the network answers, and removed on sign-out.
// An incremental fetch patches it with `patch_goal_list` instead of
// replacing it. Beyond each entry's `id`, the engine treats the contents as
// opaque.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde_json::Value;

use crate::error::SyncError;

/// Storage for the persisted goal list snapshot.
pub trait SnapshotStore: Send + Sync {
    /// The stored snapshot, or `None` if there is none.
    fn load(&self) -> Result<Option<Value>, SyncError>;

    /// Store `snapshot`, replacing any previous one.
    fn save(&self, snapshot: &Value) -> Result<(), SyncError>;

    /// Remove the stored snapshot. Removing a missing snapshot is not an error.
    fn clear(&self) -> Result<(), SyncError>;
}

/// Snapshot kept in a single JSON file.
pub struct FileSnapshotStore {
    path: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> SyncError {
        SyncError::Persistence {
            path: self.path.display().to_string(),
            source,
        }
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn load(&self) -> Result<Option<Value>, SyncError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let json = fs::read_to_string(&self.path).map_err(|e| self.io_error(e))?;
        Ok(Some(serde_json::from_str(&json)?))
    }

    fn save(&self, snapshot: &Value) -> Result<(), SyncError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| SyncError::Persistence {
                path: parent.display().to_string(),
                source,
            })?;
        }

        // Write-then-rename so a crash mid-write never leaves a truncated snapshot.
        let tmp = self.path.with_extension("json.tmp");
        let json = serde_json::to_string(snapshot)?;
        fs::write(&tmp, json).map_err(|source| SyncError::Persistence {
            path: tmp.display().to_string(),
            source,
        })?;
        fs::rename(&tmp, &self.path).map_err(|e| self.io_error(e))?;
        Ok(())
    }

    fn clear(&self) -> Result<(), SyncError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.io_error(e)),
        }
    }
}

/// Snapshot kept in memory only (tests, or when no snapshot path is configured).
#[derive(Default)]
pub struct MemorySnapshotStore {
    value: Mutex<Option<Value>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seeded with a snapshot, as if a previous run had saved it.
    pub fn with_snapshot(snapshot: Value) -> Self {
        Self {
            value: Mutex::new(Some(snapshot)),
        }
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn load(&self) -> Result<Option<Value>, SyncError> {
        Ok(self
            .value
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn save(&self, snapshot: &Value) -> Result<(), SyncError> {
        *self.value.lock().unwrap_or_else(PoisonError::into_inner) = Some(snapshot.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), SyncError> {
        *self.value.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}

fn entry_id(goal: &Value) -> Option<&str> {
    goal.get("id").and_then(Value::as_str)
}

/// Apply an incremental change set to a stored goal list: entries in
/// `changed` replace the entry with the same id (or are appended), entries
/// whose id is in `deleted` are removed. Order of surviving entries is kept.
pub(crate) fn patch_goal_list(mut goals: Vec<Value>, changed: &[Value], deleted: &[String]) -> Vec<Value> {
    goals.retain(|g| !entry_id(g).is_some_and(|id| deleted.iter().any(|d| d == id)));
    for goal in changed {
        let id = entry_id(goal);
        match goals.iter_mut().find(|g| id.is_some() && entry_id(g) == id) {
            Some(slot) => *slot = goal.clone(),
            None => goals.push(goal.clone()),
        }
    }
    goals
}
