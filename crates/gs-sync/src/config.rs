// config.rs: Sync engine configuration.
//
// SyncConfig is read from `<dir>/config.toml`. Every field has a default so
// an empty or missing file gives a working setup against the public server.
// `for_dir()` fills in the conventional snapshot location next to the
// config file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use gs_remote::Credentials;
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// Name of the config file inside a config directory.
pub const CONFIG_FILE: &str = "config.toml";

/// Name of the persisted goal list inside a config directory.
pub const SNAPSHOT_FILE: &str = "last_fetched_goals.json";

/// Configuration for the goal sync engine and its HTTP client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Server base URL. Paths like `api/v1/users/...` are joined onto it.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Sleep between reconciliation rounds, in milliseconds.
    #[serde(default = "default_reconcile_interval_ms")]
    pub reconcile_interval_ms: u64,

    /// Sleep between settle polls for a single goal, in milliseconds.
    #[serde(default = "default_settle_interval_ms")]
    pub settle_interval_ms: u64,

    /// How many recent datapoints to request and keep per goal.
    #[serde(default = "default_recent_datapoints")]
    pub recent_datapoints: usize,

    /// Where to persist the last goal list. `None` keeps it in memory only.
    #[serde(default)]
    pub snapshot_path: Option<PathBuf>,

    /// Capacity of the sync event broadcast channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Stored credentials, if the user chose to keep them in the file.
    #[serde(default)]
    pub session: Option<Credentials>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            reconcile_interval_ms: default_reconcile_interval_ms(),
            settle_interval_ms: default_settle_interval_ms(),
            recent_datapoints: default_recent_datapoints(),
            snapshot_path: None,
            event_capacity: default_event_capacity(),
            session: None,
        }
    }
}

fn default_base_url() -> String {
    "https://www.beeminder.com".to_string()
}

fn default_reconcile_interval_ms() -> u64 {
    2000
}

fn default_settle_interval_ms() -> u64 {
    2000
}

fn default_recent_datapoints() -> usize {
    5
}

fn default_event_capacity() -> usize {
    64
}

impl SyncConfig {
    /// Load `<dir>/config.toml` (defaults if absent) and point the snapshot
    /// at `<dir>/last_fetched_goals.json` unless the file names another path.
    pub fn for_dir(dir: impl AsRef<Path>) -> Result<Self, SyncError> {
        let dir = dir.as_ref();
        let path = dir.join(CONFIG_FILE);
        let mut config = if path.exists() {
            Self::load(&path)?
        } else {
            Self::default()
        };
        if config.snapshot_path.is_none() {
            config.snapshot_path = Some(dir.join(SNAPSHOT_FILE));
        }
        Ok(config)
    }

    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self, SyncError> {
        let content = std::fs::read_to_string(path).map_err(|source| SyncError::Persistence {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&content)
            .map_err(|e| SyncError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Try to load config, returning default if the file is missing or unreadable.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                if path.exists() {
                    tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable config");
                }
                Self::default()
            }
        }
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_millis(self.reconcile_interval_ms)
    }

    pub fn settle_interval(&self) -> Duration {
        Duration::from_millis(self.settle_interval_ms)
    }
}
