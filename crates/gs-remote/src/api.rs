// api.rs: Typed helpers for the goal and datapoint endpoints.
//
// GoalApi knows the server's URL layout; it does not interpret responses
// beyond handing back the JSON. Writes (datapoint add/update/delete) are
// fire-and-return: callers refresh the goal afterwards through the sync
// engine, since the server may process the write asynchronously.

use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use crate::client::{Method, Params, RemoteClient};
use crate::error::RemoteError;

/// Goal and datapoint endpoints on top of any [`RemoteClient`].
#[derive(Clone)]
pub struct GoalApi {
    client: Arc<dyn RemoteClient>,
}

const USER_PATH: &str = "api/v1/users/{username}.json";

/// Leave out the bulky road and datapoint history the client never reads.
fn emaciated() -> Params {
    let mut params = Params::new();
    params.insert("emaciated".to_string(), "true".to_string());
    params
}

fn goal_path(slug: &str) -> String {
    format!("api/v1/users/{{username}}/goals/{}", slug)
}

impl GoalApi {
    pub fn new(client: Arc<dyn RemoteClient>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Arc<dyn RemoteClient> {
        &self.client
    }

    /// The signed-in user's object, without goals.
    pub async fn fetch_user(&self) -> Result<Value, RemoteError> {
        self.client
            .request(USER_PATH, Method::Get, Params::new())
            .await
    }

    /// The user's object with only the goals changed after `diff_since`
    /// (unix seconds) under `goals`, and those deleted under `deleted_goals`.
    pub async fn fetch_user_changes(&self, diff_since: i64) -> Result<Value, RemoteError> {
        let mut params = emaciated();
        params.insert("diff_since".to_string(), diff_since.to_string());
        self.client.request(USER_PATH, Method::Get, params).await
    }

    /// The full goal list for the signed-in user.
    pub async fn fetch_goals(&self) -> Result<Value, RemoteError> {
        self.client
            .request("api/v1/users/{username}/goals.json", Method::Get, emaciated())
            .await
    }

    /// One goal, including its last `datapoints_count` datapoints.
    pub async fn fetch_goal(&self, slug: &str, datapoints_count: usize) -> Result<Value, RemoteError> {
        let mut params = emaciated();
        params.insert("datapoints_count".to_string(), datapoints_count.to_string());
        self.client
            .request(&format!("{}.json", goal_path(slug)), Method::Get, params)
            .await
    }

    /// Add a datapoint from free text (e.g. `"12 3.5 \"morning run\""`).
    ///
    /// A fresh `requestid` makes retries of the same submission idempotent
    /// server-side.
    pub async fn add_datapoint(&self, slug: &str, urtext: &str) -> Result<Value, RemoteError> {
        let mut params = Params::new();
        params.insert("urtext".to_string(), urtext.to_string());
        params.insert("requestid".to_string(), Uuid::new_v4().to_string());
        self.client
            .request(
                &format!("{}/datapoints.json", goal_path(slug)),
                Method::Post,
                params,
            )
            .await
    }

    pub async fn update_datapoint(
        &self,
        slug: &str,
        datapoint_id: &str,
        value: f64,
        comment: &str,
    ) -> Result<Value, RemoteError> {
        let mut params = Params::new();
        params.insert("value".to_string(), value.to_string());
        params.insert("comment".to_string(), comment.to_string());
        self.client
            .request(
                &format!("{}/datapoints/{}.json", goal_path(slug), datapoint_id),
                Method::Put,
                params,
            )
            .await
    }

    pub async fn delete_datapoint(&self, slug: &str, datapoint_id: &str) -> Result<Value, RemoteError> {
        self.client
            .request(
                &format!("{}/datapoints/{}.json", goal_path(slug), datapoint_id),
                Method::Delete,
                Params::new(),
            )
            .await
    }

    /// Ask the server to re-pull autodata and redraw the graph.
    pub async fn force_autodata_refresh(&self, slug: &str) -> Result<Value, RemoteError> {
        self.client
            .request(
                &format!("{}/refresh_graph.json", goal_path(slug)),
                Method::Get,
                Params::new(),
            )
            .await
    }
}
