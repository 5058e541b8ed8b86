//! # gs-sync
//!
//! The goal cache and everything that keeps it in step with the server.
//!
//! [`GoalEngine`] owns the cache. It fetches the full goal list (or only
//! what changed since the last fetch), refreshes single goals, keeps
//! re-fetching goals the server reports as `queued` until they settle,
//! and persists the last list so a cold start has
//! something to show. Cached goals are [`GoalRecord`]s shared behind `Arc`;
//! the same instance is updated in place on every fetch that mentions it.
//!
//! ## Key components
//!
//! - [`GoalEngine`] — fetch-all, incremental refresh, refresh-one, reconciliation, wait-until-settled
//! - [`GoalRecord`] — one goal's live, identity-stable state
//! - [`SynchronizedCache`] — mutex-guarded holder for the goal map
//! - [`UpdateAwaiter`] — per-record slot de-duplicating settle waits
//! - [`SnapshotStore`] — where the last goal list is persisted
//! - [`SyncEvent`] / [`EventBus`] — change notifications for observers
//! - [`SyncConfig`] — intervals, base URL and snapshot location

pub mod awaiter;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod record;
pub mod snapshot;

pub use awaiter::{SettleHandle, SettleOutcome, UpdateAwaiter};
pub use cache::{GoalMap, SynchronizedCache};
pub use config::SyncConfig;
pub use engine::GoalEngine;
pub use error::SyncError;
pub use events::{EventBus, SyncEvent};
pub use record::GoalRecord;
pub use snapshot::{FileSnapshotStore, MemorySnapshotStore, SnapshotStore};
