// common/mod.rs: Scripted in-memory server shared by the engine tests.
//
// ScriptedServer implements RemoteClient by answering the user, goal list,
// single goal and add-datapoint endpoints from a small in-memory model. A
// goal can be put in the `queued` state for a given number of single-goal
// fetches, after which it reports settled. Every change to the model ticks
// a clock that serves as the user's `updated_at`, so `diff_since` requests
// see exactly the goals changed or removed after a given tick. Every call is
// counted per path, and concurrent single-goal fetches are measured per slug.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{broadcast, Notify};

use gs_remote::{Credentials, GoalApi, Method, Params, RemoteClient, RemoteError, Session};
use gs_sync::{GoalEngine, MemorySnapshotStore, SnapshotStore, SyncConfig, SyncEvent};

pub const LIST_PATH: &str = "api/v1/users/{username}/goals.json";
pub const USER_PATH: &str = "api/v1/users/{username}.json";
const GOAL_PREFIX: &str = "api/v1/users/{username}/goals/";

/// The clock value before any change.
const EPOCH: i64 = 1_740_000_000;

/// Bound for every wait in the tests.
pub const WAIT: Duration = Duration::from_secs(5);

pub fn goal_json(id: &str, slug: &str, queued: bool) -> Value {
    json!({
        "id": id,
        "slug": slug,
        "title": format!("Goal {}", slug),
        "queued": queued,
        "deadline": 0,
        "leadtime": 0,
        "alertstart": 34200,
        "losedate": 1740988799,
        "pledge": 5.0,
        "runits": "d",
        "yaw": 1,
        "dir": 1
    })
}

pub fn single_path(slug: &str) -> String {
    format!("{}{}.json", GOAL_PREFIX, slug)
}

struct ScriptedGoal {
    id: String,
    queued: bool,
    /// Single-goal fetches left before `queued` flips to false.
    polls_left: usize,
    changed_at: i64,
}

#[derive(Default)]
struct ServerState {
    goals: BTreeMap<String, ScriptedGoal>,
    order: Vec<String>,
    calls: BTreeMap<String, usize>,
    in_flight: BTreeMap<String, usize>,
    max_in_flight: BTreeMap<String, usize>,
    failing: BTreeSet<String>,
    list_override: Option<Value>,
    changes_override: Option<Value>,
    list_gate: Option<Arc<Notify>>,
    clock: i64,
    /// Removed goal ids with the tick they were removed at.
    removed: Vec<(String, i64)>,
    rejecting: Option<Arc<Session>>,
}

impl ServerState {
    fn tick(&mut self) -> i64 {
        self.clock = self.clock.max(EPOCH) + 1;
        self.clock
    }

    fn user_body(&self, diff_since: Option<i64>) -> Value {
        let updated_at = self.clock.max(EPOCH);
        let Some(since) = diff_since else {
            return json!({"username": "alice", "updated_at": updated_at});
        };
        let goals: Vec<Value> = self
            .order
            .iter()
            .filter_map(|slug| self.goals.get(slug).map(|g| (slug, g)))
            .filter(|(_, g)| g.changed_at >= since)
            .map(|(slug, g)| goal_json(&g.id, slug, g.queued))
            .collect();
        let deleted: Vec<Value> = self
            .removed
            .iter()
            .filter(|(_, at)| *at >= since)
            .map(|(id, _)| json!({"id": id}))
            .collect();
        json!({
            "username": "alice",
            "updated_at": updated_at,
            "goals": goals,
            "deleted_goals": deleted
        })
    }
}

#[derive(Default)]
pub struct ScriptedServer {
    state: Mutex<ServerState>,
    fetch_delay: Duration,
}

impl ScriptedServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Single-goal fetches take `delay`, so overlapping fetches are visible.
    pub fn with_fetch_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            fetch_delay: delay,
            ..Self::default()
        })
    }

    /// Add a goal. A queued goal settles after `polls` single-goal fetches.
    pub fn add_goal(&self, id: &str, slug: &str, polls: usize) {
        let mut state = self.state.lock().unwrap();
        let changed_at = state.tick();
        state.goals.insert(
            slug.to_string(),
            ScriptedGoal {
                id: id.to_string(),
                queued: polls > 0,
                polls_left: polls,
                changed_at,
            },
        );
        if !state.order.iter().any(|s| s == slug) {
            state.order.push(slug.to_string());
        }
    }

    pub fn remove_goal(&self, slug: &str) {
        let mut state = self.state.lock().unwrap();
        let at = state.tick();
        if let Some(goal) = state.goals.remove(slug) {
            state.removed.push((goal.id, at));
        }
        state.order.retain(|s| s != slug);
    }

    /// Put an existing goal back in the queue for `polls` single-goal fetches.
    pub fn queue(&self, slug: &str, polls: usize) {
        let mut state = self.state.lock().unwrap();
        let at = state.tick();
        if let Some(goal) = state.goals.get_mut(slug) {
            goal.queued = polls > 0;
            goal.polls_left = polls;
            goal.changed_at = at;
        }
    }

    pub fn is_queued(&self, slug: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .goals
            .get(slug)
            .map(|g| g.queued)
            .unwrap_or(false)
    }

    /// Make every request touching `slug` fail with a server error.
    pub fn fail(&self, slug: &str) {
        self.state.lock().unwrap().failing.insert(slug.to_string());
    }

    /// Make the goal list and user endpoints fail with a transport error.
    pub fn fail_list(&self) {
        self.fail("*");
    }

    pub fn heal(&self, slug: &str) {
        self.state.lock().unwrap().failing.remove(slug);
    }

    /// Answer the list endpoint with `body` instead of the goal model.
    pub fn override_list(&self, body: Value) {
        self.state.lock().unwrap().list_override = Some(body);
    }

    /// Answer `diff_since` requests with `body` instead of the goal model.
    pub fn override_changes(&self, body: Value) {
        self.state.lock().unwrap().changes_override = Some(body);
    }

    /// Hold list responses until the returned handle is notified.
    pub fn hold_list(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.state.lock().unwrap().list_gate = Some(Arc::clone(&gate));
        gate
    }

    /// Reject every request with 401 and sign `session` out, as the HTTP
    /// client does when the server refuses the token.
    pub fn reject_token(&self, session: &Arc<Session>) {
        self.state.lock().unwrap().rejecting = Some(Arc::clone(session));
    }

    pub fn calls(&self, path: &str) -> usize {
        self.state.lock().unwrap().calls.get(path).copied().unwrap_or(0)
    }

    pub fn goal_fetches(&self, slug: &str) -> usize {
        self.calls(&single_path(slug))
    }

    pub fn total_calls(&self) -> usize {
        self.state.lock().unwrap().calls.values().sum()
    }

    pub fn max_concurrent_fetches(&self, slug: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .max_in_flight
            .get(slug)
            .copied()
            .unwrap_or(0)
    }

    fn list_body(&self) -> Result<Value, RemoteError> {
        let state = self.state.lock().unwrap();
        if let Some(body) = &state.list_override {
            return Ok(body.clone());
        }
        if state.failing.contains("*") {
            return Err(RemoteError::Transport("connection reset".into()));
        }
        let goals: Vec<Value> = state
            .order
            .iter()
            .filter_map(|slug| state.goals.get(slug).map(|g| goal_json(&g.id, slug, g.queued)))
            .collect();
        Ok(Value::Array(goals))
    }

    async fn fetch_single(&self, slug: &str) -> Result<Value, RemoteError> {
        {
            let mut state = self.state.lock().unwrap();
            let now = {
                let n = state.in_flight.entry(slug.to_string()).or_insert(0);
                *n += 1;
                *n
            };
            let max = state.max_in_flight.entry(slug.to_string()).or_insert(0);
            *max = (*max).max(now);
        }

        if !self.fetch_delay.is_zero() {
            tokio::time::sleep(self.fetch_delay).await;
        }

        let mut state = self.state.lock().unwrap();
        if let Some(n) = state.in_flight.get_mut(slug) {
            *n -= 1;
        }
        if state.failing.contains(slug) {
            return Err(RemoteError::Server {
                status: 500,
                message: format!("{} is broken", slug),
            });
        }
        let at = state.tick();
        let goal = state.goals.get_mut(slug).ok_or_else(|| RemoteError::Server {
            status: 404,
            message: "not found".into(),
        })?;
        if goal.polls_left > 0 {
            goal.polls_left -= 1;
            if goal.polls_left == 0 {
                goal.queued = false;
                goal.changed_at = at;
            }
        }
        Ok(goal_json(&goal.id, slug, goal.queued))
    }
}

#[async_trait]
impl RemoteClient for ScriptedServer {
    async fn request(&self, path: &str, method: Method, params: Params) -> Result<Value, RemoteError> {
        let (gate, rejecting) = {
            let mut state = self.state.lock().unwrap();
            *state.calls.entry(path.to_string()).or_insert(0) += 1;
            let gate = if path == LIST_PATH {
                state.list_gate.take()
            } else {
                None
            };
            (gate, state.rejecting.clone())
        };

        if let Some(session) = rejecting {
            session.sign_out();
            return Err(RemoteError::Unauthorized);
        }

        if path == USER_PATH {
            let state = self.state.lock().unwrap();
            if state.failing.contains("*") {
                return Err(RemoteError::Transport("connection reset".into()));
            }
            let diff_since = params.get("diff_since").and_then(|s| s.parse().ok());
            if let (Some(_), Some(body)) = (diff_since, &state.changes_override) {
                return Ok(body.clone());
            }
            return Ok(state.user_body(diff_since));
        }

        if path == LIST_PATH {
            if let Some(gate) = gate {
                gate.notified().await;
            }
            return self.list_body();
        }

        let rest = path
            .strip_prefix(GOAL_PREFIX)
            .ok_or_else(|| RemoteError::Server {
                status: 404,
                message: path.to_string(),
            })?;

        if let (Method::Post, Some(slug)) = (method, rest.strip_suffix("/datapoints.json")) {
            let mut state = self.state.lock().unwrap();
            if state.failing.contains(slug) {
                return Err(RemoteError::Server {
                    status: 500,
                    message: format!("{} is broken", slug),
                });
            }
            let at = state.tick();
            if let Some(goal) = state.goals.get_mut(slug) {
                // New data keeps the goal queued for the next two fetches.
                goal.queued = true;
                goal.polls_left = 2;
                goal.changed_at = at;
            }
            return Ok(json!({"id": "dp1", "value": 1.0}));
        }

        match rest.strip_suffix(".json") {
            Some(slug) if !slug.contains('/') => self.fetch_single(slug).await,
            _ => Err(RemoteError::Server {
                status: 404,
                message: path.to_string(),
            }),
        }
    }
}

pub fn test_config() -> SyncConfig {
    SyncConfig {
        reconcile_interval_ms: 10,
        settle_interval_ms: 10,
        ..SyncConfig::default()
    }
}

pub fn signed_in() -> Arc<Session> {
    Arc::new(Session::signed_in(Credentials::new("alice", "secret")))
}

pub fn engine(server: &Arc<ScriptedServer>) -> GoalEngine {
    engine_with(server, signed_in(), Box::new(MemorySnapshotStore::new()))
}

/// An engine that also resets itself when `session` signs out.
pub fn started_engine(server: &Arc<ScriptedServer>, session: Arc<Session>) -> GoalEngine {
    let client: Arc<dyn RemoteClient> = Arc::clone(server) as Arc<dyn RemoteClient>;
    GoalEngine::start(
        GoalApi::new(client),
        session,
        Box::new(MemorySnapshotStore::new()),
        &test_config(),
    )
}

pub fn engine_with(
    server: &Arc<ScriptedServer>,
    session: Arc<Session>,
    snapshots: Box<dyn SnapshotStore>,
) -> GoalEngine {
    let client: Arc<dyn RemoteClient> = Arc::clone(server) as Arc<dyn RemoteClient>;
    GoalEngine::new(GoalApi::new(client), session, snapshots, &test_config())
}

/// Wait for the next `ReconciliationFinished`, returning its fields.
pub async fn next_finished(rx: &mut broadcast::Receiver<SyncEvent>) -> (u32, Option<String>) {
    tokio::time::timeout(WAIT, async {
        loop {
            if let SyncEvent::ReconciliationFinished { rounds, error } = rx.recv().await.unwrap() {
                return (rounds, error);
            }
        }
    })
    .await
    .expect("reconciliation did not finish in time")
}

/// Poll `condition` every millisecond until it holds.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("condition not reached in time")
}

pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(WAIT, future)
        .await
        .expect("timed out")
}
