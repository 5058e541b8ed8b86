// error.rs: Error types for the sync engine.

use gs_goal::GoalError;
use gs_remote::RemoteError;
use thiserror::Error;

/// Errors that can occur during fetch, refresh, persistence and settle operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The request to the server failed.
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    /// The server response could not be turned into goal records.
    #[error("goal error: {0}")]
    Goal(#[from] GoalError),

    /// The requested goal is not in the cache.
    #[error("goal not in cache: {0}")]
    UnknownGoal(String),

    /// A snapshot or config file operation failed.
    #[error("I/O error at {path}: {source}")]
    Persistence {
        path: String,
        source: std::io::Error,
    },

    /// Failed to serialize/deserialize a snapshot.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// The config file could not be parsed.
    #[error("config error: {0}")]
    Config(String),

    /// A background task panicked or was aborted.
    #[error("background task failed: {0}")]
    Join(String),
}

impl SyncError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, SyncError::Remote(e) if e.is_unauthorized())
    }
}
