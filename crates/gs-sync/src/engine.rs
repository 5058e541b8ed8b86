// engine.rs: GoalEngine, the single owner of the goal cache.
//
// Every change to the cache map, to a cached record's fields, to the
// reconciliation guard and to the sign-out generation happens while holding
// `EngineInner::state`. That lock is a std mutex and is never held across an
// `.await`: network calls and sleeps happen with it released, and their
// results are applied under it afterwards. Two consequences matter:
//
// - The reconciliation loop decides "nothing queued" and clears its guard in
//   the same lock hold, so a refresh that lands a queued goal either sees the
//   guard cleared (and starts a new loop) or is seen by the running loop.
// - A sign-out bumps the generation. Any fetch that started under an older
//   generation throws its response away instead of resurrecting the cache.
//
// Readers that only want the last known goals go through `stale_snapshot()`,
// which touches the cache mutex alone and never waits on the network.
//
// `refresh_goals()` is the cheap way to catch up: once a full fetch has
// recorded the user's `updated_at`, it asks only for goals changed (or
// deleted) after that time. Until then it falls back to `fetch_all()`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use gs_goal::{user_updated_at, GoalChanges, GoalPayload};
use gs_remote::{GoalApi, Session, SessionEvent};
use tokio::sync::broadcast;
use tokio::task::JoinSet;

use crate::awaiter::SettleOutcome;
use crate::cache::{GoalMap, SynchronizedCache};
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::events::{EventBus, SyncEvent};
use crate::record::GoalRecord;
use crate::snapshot::{patch_goal_list, SnapshotStore};

struct EngineState {
    reconciling: bool,
    generation: u64,
    fetched_at: Option<DateTime<Utc>>,
    /// The user's `updated_at` as of the last fetch.
    user_updated_at: Option<DateTime<Utc>>,
}

struct EngineInner {
    api: GoalApi,
    session: Arc<Session>,
    cache: SynchronizedCache<Option<GoalMap>>,
    state: Mutex<EngineState>,
    snapshots: Box<dyn SnapshotStore>,
    events: EventBus,
    reconcile_interval: Duration,
    settle_interval: Duration,
    recent_datapoints: usize,
}

/// Fetches, caches and reconciles the signed-in user's goals.
///
/// Cloning is cheap; every clone drives the same cache.
#[derive(Clone)]
pub struct GoalEngine {
    inner: Arc<EngineInner>,
}

impl GoalEngine {
    /// Build an engine and restore the persisted snapshot, if any.
    ///
    /// The engine does not listen for sign-out on its own; use [`start`]
    /// for that, or call [`reset_for_sign_out`] yourself.
    ///
    /// [`start`]: GoalEngine::start
    /// [`reset_for_sign_out`]: GoalEngine::reset_for_sign_out
    pub fn new(
        api: GoalApi,
        session: Arc<Session>,
        snapshots: Box<dyn SnapshotStore>,
        config: &SyncConfig,
    ) -> Self {
        let engine = Self {
            inner: Arc::new(EngineInner {
                api,
                session,
                cache: SynchronizedCache::new(None),
                state: Mutex::new(EngineState {
                    reconciling: false,
                    generation: 0,
                    fetched_at: None,
                    user_updated_at: None,
                }),
                snapshots,
                events: EventBus::new(config.event_capacity),
                reconcile_interval: config.reconcile_interval(),
                settle_interval: config.settle_interval(),
                recent_datapoints: config.recent_datapoints,
            }),
        };
        engine.restore_from_persisted_snapshot();
        engine
    }

    /// Like [`new`](GoalEngine::new), and also reset the cache whenever the
    /// session signs out. Must be called inside a tokio runtime.
    pub fn start(
        api: GoalApi,
        session: Arc<Session>,
        snapshots: Box<dyn SnapshotStore>,
        config: &SyncConfig,
    ) -> Self {
        let engine = Self::new(api, session, snapshots, config);
        engine.watch_session();
        engine
    }

    pub fn api(&self) -> &GoalApi {
        &self.inner.api
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.inner.session
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    /// Time of the last successful full fetch since start or sign-out.
    pub fn fetched_at(&self) -> Option<DateTime<Utc>> {
        self.lock_state().fetched_at
    }

    pub fn is_reconciling(&self) -> bool {
        self.lock_state().reconciling
    }

    /// Last known goals, without touching the network.
    ///
    /// `None` means nothing has been fetched (or restored) since start or
    /// sign-out; `Some(vec![])` means the user has no goals.
    pub fn stale_snapshot(&self) -> Option<Vec<Arc<GoalRecord>>> {
        self.inner
            .cache
            .get()
            .map(|goals| goals.values().cloned().collect())
    }

    pub fn record(&self, id: &str) -> Option<Arc<GoalRecord>> {
        self.inner
            .cache
            .get()
            .and_then(|goals| goals.get(id).cloned())
    }

    pub fn record_by_slug(&self, slug: &str) -> Option<Arc<GoalRecord>> {
        self.inner
            .cache
            .get()
            .and_then(|goals| goals.values().find(|r| r.slug() == slug).cloned())
    }

    /// Fetch every goal, merge into the cache and persist the response.
    ///
    /// Returns the live records in server order. On any error the cache is
    /// left as it was.
    pub async fn fetch_all(&self) -> Result<Vec<Arc<GoalRecord>>, SyncError> {
        if !self.inner.session.is_signed_in() {
            tracing::info!("fetch requested with no signed-in user");
            self.inner.session.sign_out();
            self.reset_for_sign_out();
            return Ok(Vec::new());
        }

        let generation = self.lock_state().generation;
        tracing::debug!("fetching goal list");
        // The user first: its updated_at must not cover changes the list missed.
        let user = self.inner.api.fetch_user().await?;
        let response = self.inner.api.fetch_goals().await?;
        let payloads = GoalPayload::parse_list(&response, self.inner.recent_datapoints)?;

        let records = {
            let mut state = self.lock_state();
            if state.generation != generation {
                tracing::info!("discarding goal list fetched before sign-out");
                return Ok(Vec::new());
            }
            let records = self.merge(payloads);
            state.fetched_at = Some(Utc::now());
            state.user_updated_at = user_updated_at(&user);
            if let Err(e) = self.inner.snapshots.save(&response) {
                tracing::warn!(error = %e, "failed to persist goal snapshot");
            }
            records
        };

        tracing::info!(count = records.len(), "fetched goals");
        self.after_update();
        Ok(records)
    }

    /// Fetch only what changed since the last fetch and apply it.
    ///
    /// Falls back to [`fetch_all`](GoalEngine::fetch_all) when nothing is
    /// cached or no fetch has recorded the user's `updated_at` yet. Changed
    /// goals are applied in place (new ones are added) and goals the server
    /// reports deleted leave the cache; every other cached goal is kept.
    /// Returns every cached record afterwards.
    pub async fn refresh_goals(&self) -> Result<Vec<Arc<GoalRecord>>, SyncError> {
        let since = {
            let state = self.lock_state();
            let known = self.inner.cache.get().is_some();
            state.user_updated_at.filter(|_| known)
        };
        let Some(since) = since else {
            tracing::debug!("goals unknown, doing full fetch");
            return self.fetch_all().await;
        };
        if !self.inner.session.is_signed_in() {
            return self.fetch_all().await;
        }

        let generation = self.lock_state().generation;
        tracing::debug!(%since, "fetching goal changes");
        let response = self
            .inner
            .api
            .fetch_user_changes(since.timestamp() + 1)
            .await?;
        let changes = GoalChanges::parse(&response, self.inner.recent_datapoints)?;

        {
            let mut state = self.lock_state();
            if state.generation != generation {
                tracing::info!("discarding goal changes fetched before sign-out");
                return Ok(Vec::new());
            }
            let changed = changes.goals.len();
            let deleted = changes.deleted.clone();
            if let Some(updated_at) = changes.updated_at {
                state.user_updated_at = Some(updated_at);
            }
            self.merge_changes(changes);
            self.patch_snapshot(&response, &deleted);
            tracing::info!(changed, deleted = deleted.len(), "applied goal changes");
        }

        self.after_update();
        Ok(self.stale_snapshot().unwrap_or_default())
    }

    /// Re-fetch one cached goal and apply it to the existing record.
    pub async fn refresh_one(&self, id: &str) -> Result<(), SyncError> {
        if self.refresh_record(id).await? {
            self.after_update();
        }
        Ok(())
    }

    /// Post a datapoint to a cached goal, then refresh it.
    ///
    /// The returned record is usually still queued; pass it to
    /// [`wait_until_settled`](GoalEngine::wait_until_settled) to see the result.
    pub async fn add_datapoint(&self, id: &str, urtext: &str) -> Result<Arc<GoalRecord>, SyncError> {
        let record = self
            .record(id)
            .ok_or_else(|| SyncError::UnknownGoal(id.to_string()))?;
        let slug = record.slug();
        self.inner.api.add_datapoint(&slug, urtext).await?;
        tracing::info!(goal_id = %id, %slug, "added datapoint");
        self.refresh_one(id).await?;
        Ok(record)
    }

    /// Wait until `record` is no longer queued, polling the server.
    ///
    /// Concurrent callers for the same record share one poll task and all
    /// receive its outcome. Dropping the returned future does not stop the
    /// task.
    pub async fn wait_until_settled(&self, record: &Arc<GoalRecord>) -> SettleOutcome {
        let handle = record.awaiter().join_or_attach(|generation| {
            let engine = self.clone();
            let record = Arc::clone(record);
            let task = tokio::spawn(async move {
                let outcome = engine.poll_until_settled(&record).await.map_err(Arc::new);
                record.awaiter().clear_if_current(generation);
                outcome
            });
            async move {
                task.await
                    .unwrap_or_else(|e| Err(Arc::new(SyncError::Join(e.to_string()))))
            }
            .boxed()
            .shared()
        });
        handle.await
    }

    /// Drop every cached goal and the persisted snapshot.
    ///
    /// The cache goes back to "unknown" (`stale_snapshot()` returns `None`),
    /// and fetches already in flight will discard their responses.
    pub fn reset_for_sign_out(&self) {
        {
            let mut state = self.lock_state();
            state.generation += 1;
            state.fetched_at = None;
            state.user_updated_at = None;
            self.inner.cache.set(None);
            self.discard_snapshot();
        }
        tracing::info!("goal cache reset after sign-out");
        self.inner.events.publish(SyncEvent::SignedOut);
    }

    fn lock_state(&self) -> MutexGuard<'_, EngineState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Build the new map from `payloads`, reusing records already cached.
    /// Caller holds the state lock.
    fn merge(&self, payloads: Vec<GoalPayload>) -> Vec<Arc<GoalRecord>> {
        self.inner.cache.replace_with(|current| {
            let mut next = GoalMap::new();
            let mut ordered = Vec::with_capacity(payloads.len());
            for payload in payloads {
                let existing = next
                    .get(&payload.id)
                    .or_else(|| current.as_ref().and_then(|goals| goals.get(&payload.id)))
                    .cloned();
                let record = match existing {
                    Some(record) => {
                        if let Err(e) = record.update_to_match(payload) {
                            tracing::error!(error = %e, "refused goal update");
                        }
                        record
                    }
                    None => Arc::new(GoalRecord::new(payload)),
                };
                next.insert(record.id().to_string(), Arc::clone(&record));
                ordered.push(record);
            }
            let dropped = current
                .as_ref()
                .map(|goals| goals.keys().filter(|id| !next.contains_key(*id)).count())
                .unwrap_or(0);
            if dropped > 0 {
                tracing::debug!(dropped, "goals no longer on the server");
            }
            (Some(next), ordered)
        })
    }

    /// Apply changed goals in place or add them, then drop deleted ones.
    /// Caller holds the state lock.
    fn merge_changes(&self, changes: GoalChanges) {
        self.inner.cache.replace_with(|current| {
            let mut next = current.clone().unwrap_or_default();
            for payload in changes.goals {
                match next.get(&payload.id).cloned() {
                    Some(record) => {
                        if let Err(e) = record.update_to_match(payload) {
                            tracing::error!(error = %e, "refused goal update");
                        }
                    }
                    None => {
                        let record = Arc::new(GoalRecord::new(payload));
                        next.insert(record.id().to_string(), record);
                    }
                }
            }
            for id in &changes.deleted {
                next.remove(id);
            }
            (Some(next), ())
        });
    }

    /// Fold an incremental response into the persisted goal list.
    /// Caller holds the state lock.
    fn patch_snapshot(&self, response: &serde_json::Value, deleted: &[String]) {
        let stored = match self.inner.snapshots.load() {
            Ok(Some(serde_json::Value::Array(goals))) => goals,
            Ok(_) => return,
            Err(e) => {
                tracing::warn!(error = %e, "failed to read goal snapshot for patching");
                return;
            }
        };
        let changed = response
            .get("goals")
            .and_then(serde_json::Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        let patched = serde_json::Value::Array(patch_goal_list(stored, changed, deleted));
        if let Err(e) = self.inner.snapshots.save(&patched) {
            tracing::warn!(error = %e, "failed to persist goal snapshot");
        }
    }

    /// Fetch one goal and apply it in place. `Ok(false)` means the response
    /// was dropped because of a sign-out or because the goal left the cache.
    async fn refresh_record(&self, id: &str) -> Result<bool, SyncError> {
        let (slug, generation) = {
            let state = self.lock_state();
            let record = self
                .record(id)
                .ok_or_else(|| SyncError::UnknownGoal(id.to_string()))?;
            (record.slug(), state.generation)
        };

        let response = self
            .inner
            .api
            .fetch_goal(&slug, self.inner.recent_datapoints)
            .await?;
        let payload = GoalPayload::parse(&response, self.inner.recent_datapoints)?;

        let state = self.lock_state();
        if state.generation != generation {
            tracing::info!(goal_id = %id, "discarding goal refreshed before sign-out");
            return Ok(false);
        }
        let Some(record) = self.record(id) else {
            tracing::debug!(goal_id = %id, "goal left the cache while refreshing");
            return Ok(false);
        };
        record.update_to_match(payload)?;
        tracing::debug!(goal_id = %id, %slug, "refreshed goal");
        Ok(true)
    }

    fn after_update(&self) {
        self.inner.events.publish(SyncEvent::GoalsUpdated);
        let engine = self.clone();
        tokio::spawn(async move { engine.reconcile_queued().await });
    }

    fn queued_ids(&self) -> Vec<String> {
        self.inner
            .cache
            .get()
            .map(|goals| {
                goals
                    .values()
                    .filter(|r| r.is_queued())
                    .map(|r| r.id().to_string())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Re-fetch queued goals in rounds until none are queued.
    ///
    /// At most one of these runs at a time; extra calls return immediately.
    async fn reconcile_queued(&self) {
        let mut queued = {
            let mut state = self.lock_state();
            if state.reconciling {
                tracing::trace!("reconciliation already running");
                return;
            }
            let queued = self.queued_ids();
            if queued.is_empty() {
                return;
            }
            state.reconciling = true;
            queued
        };
        tracing::info!(queued = queued.len(), "reconciliation started");
        self.inner.events.publish(SyncEvent::ReconciliationStarted);

        let mut rounds = 0u32;
        let error = loop {
            rounds += 1;
            tracing::debug!(round = rounds, queued = queued.len(), "re-fetching queued goals");
            let failures = self.refresh_each(queued).await;
            if !failures.is_empty() {
                for (id, e) in &failures {
                    tracing::error!(goal_id = %id, error = %e, "reconciliation refresh failed");
                }
                self.lock_state().reconciling = false;
                break Some(format!("{} of the queued goals failed to refresh", failures.len()));
            }

            tokio::time::sleep(self.inner.reconcile_interval).await;

            // The emptiness check and the guard release share one lock hold.
            queued = {
                let mut state = self.lock_state();
                let next = self.queued_ids();
                if next.is_empty() {
                    state.reconciling = false;
                    break None;
                }
                next
            };
        };

        tracing::info!(rounds, failed = error.is_some(), "reconciliation finished");
        self.inner
            .events
            .publish(SyncEvent::ReconciliationFinished { rounds, error });
    }

    /// Refresh `ids` concurrently; return the ones that failed.
    ///
    /// A goal that left the cache meanwhile is not a failure. These
    /// refreshes notify observers but do not schedule another pass; the
    /// loop running them is that pass.
    async fn refresh_each(&self, ids: Vec<String>) -> Vec<(String, SyncError)> {
        let mut set = JoinSet::new();
        for id in ids {
            let engine = self.clone();
            set.spawn(async move {
                let result = engine.refresh_record(&id).await;
                (id, result)
            });
        }

        let mut updated = false;
        let mut failures = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((_, Ok(applied))) => updated |= applied,
                Ok((_, Err(SyncError::UnknownGoal(_)))) => {}
                Ok((id, Err(e))) => failures.push((id, e)),
                Err(e) => failures.push(("<task>".to_string(), SyncError::Join(e.to_string()))),
            }
        }
        if updated {
            self.inner.events.publish(SyncEvent::GoalsUpdated);
        }
        failures
    }

    /// Poll until `record` settles. Fails with `UnknownGoal` once the cache
    /// no longer holds this exact record, e.g. after a sign-out followed by
    /// a fresh fetch of a goal with the same id.
    async fn poll_until_settled(&self, record: &Arc<GoalRecord>) -> Result<(), SyncError> {
        while record.is_queued() {
            tokio::time::sleep(self.inner.settle_interval).await;
            match self.record(record.id()) {
                Some(current) if Arc::ptr_eq(&current, record) => {}
                _ => {
                    tracing::debug!(goal_id = %record.id(), "awaited goal left the cache");
                    return Err(SyncError::UnknownGoal(record.id().to_string()));
                }
            }
            self.refresh_one(record.id()).await?;
        }
        Ok(())
    }

    /// Seed the cache from the persisted snapshot. Does not notify or
    /// reconcile; the first live fetch does that.
    fn restore_from_persisted_snapshot(&self) {
        let snapshot = match self.inner.snapshots.load() {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(error = %e, "discarding unreadable goal snapshot");
                self.discard_snapshot();
                return;
            }
        };

        match GoalPayload::parse_list(&snapshot, self.inner.recent_datapoints) {
            Ok(payloads) => {
                let _state = self.lock_state();
                let records = self.merge(payloads);
                tracing::info!(count = records.len(), "restored goals from snapshot");
            }
            Err(e) => {
                tracing::warn!(error = %e, "discarding malformed goal snapshot");
                self.discard_snapshot();
            }
        }
    }

    fn discard_snapshot(&self) {
        if let Err(e) = self.inner.snapshots.clear() {
            tracing::warn!(error = %e, "failed to remove goal snapshot");
        }
    }

    /// Reset on every sign-out until the engine or the session goes away.
    fn watch_session(&self) {
        let mut rx = self.inner.session.subscribe();
        let weak: Weak<EngineInner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            loop {
                let received = rx.recv().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let engine = GoalEngine { inner };
                match received {
                    Ok(SessionEvent::SignedOut) => engine.reset_for_sign_out(),
                    Ok(SessionEvent::SignedIn { username }) => {
                        tracing::debug!(%username, "session signed in");
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "session events lagged");
                        if !engine.inner.session.is_signed_in() {
                            engine.reset_for_sign_out();
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }
}
