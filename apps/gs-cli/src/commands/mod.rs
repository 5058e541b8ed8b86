// mod.rs: Shared setup for goalsync subcommands.

pub mod goals;
pub mod session;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use gs_remote::{Credentials, GoalApi, HttpRemoteClient, Session};
use gs_sync::{FileSnapshotStore, GoalEngine, MemorySnapshotStore, SnapshotStore, SyncConfig};

/// Everything a subcommand needs: the loaded config and a running engine.
pub struct Context {
    pub config_dir: PathBuf,
    pub config: SyncConfig,
    pub engine: GoalEngine,
}

impl Context {
    /// Load the config from `config_dir`, apply credential overrides and
    /// start the engine (which restores the last snapshot, if any).
    pub fn open(
        config_dir: &Path,
        username: Option<String>,
        token: Option<String>,
    ) -> anyhow::Result<Self> {
        let config = SyncConfig::for_dir(config_dir)
            .with_context(|| format!("loading config from {}", config_dir.display()))?;

        let stored = config.session.clone();
        let username = username.or_else(|| stored.as_ref().map(|c| c.username.clone()));
        let token = token.or_else(|| stored.as_ref().map(|c| c.access_token.clone()));
        let session = Arc::new(match (username, token) {
            (Some(username), Some(token)) => Session::signed_in(Credentials::new(username, token)),
            _ => Session::new(),
        });

        let client = HttpRemoteClient::new(&config.base_url, Arc::clone(&session))?;
        let snapshots: Box<dyn SnapshotStore> = match &config.snapshot_path {
            Some(path) => Box::new(FileSnapshotStore::new(path)),
            None => Box::new(MemorySnapshotStore::new()),
        };
        let engine = GoalEngine::start(GoalApi::new(Arc::new(client)), session, snapshots, &config);

        Ok(Self {
            config_dir: config_dir.to_path_buf(),
            config,
            engine,
        })
    }
}

/// `<platform config dir>/goalsync`.
pub fn default_config_dir() -> anyhow::Result<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join("goalsync"))
        .ok_or_else(|| anyhow::anyhow!("no config directory on this platform; pass --config-dir"))
}

/// Truncate `s` to `max` characters, marking the cut with an ellipsis.
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", cut)
    }
}
