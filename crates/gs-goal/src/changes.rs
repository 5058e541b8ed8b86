// changes.rs: The user object returned by an incremental fetch.
//
// Asked with `diff_since`, the server answers with the user object carrying
// only the goals changed since that time under `goals`, the ids of goals
// deleted since then under `deleted_goals`, and the user's own `updated_at`.
// Like a goal list, the change set is rejected as a whole if any goal in it
// is malformed.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::GoalError;
use crate::payload::{json_type_name, GoalPayload};

/// Goals changed and deleted since a point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct GoalChanges {
    pub goals: Vec<GoalPayload>,
    pub deleted: Vec<String>,
    /// The user's `updated_at`; the next incremental fetch asks for changes
    /// after this.
    pub updated_at: Option<DateTime<Utc>>,
}

impl GoalChanges {
    pub fn parse(value: &Value, recent_cap: usize) -> Result<Self, GoalError> {
        if !value.is_object() {
            return Err(GoalError::MalformedUser {
                reason: format!("expected an object, found {}", json_type_name(value)),
            });
        }

        let goals = match value.get("goals") {
            None | Some(Value::Null) => Vec::new(),
            Some(list) => GoalPayload::parse_list(list, recent_cap)?,
        };

        let deleted = match value.get("deleted_goals") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(entries)) => entries
                .iter()
                .map(|entry| {
                    entry
                        .get("id")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .ok_or_else(|| GoalError::MalformedUser {
                            reason: "deleted goal without an id".into(),
                        })
                })
                .collect::<Result<_, _>>()?,
            Some(other) => {
                return Err(GoalError::MalformedUser {
                    reason: format!("deleted_goals is {}", json_type_name(other)),
                })
            }
        };

        Ok(Self {
            goals,
            deleted,
            updated_at: user_updated_at(value),
        })
    }
}

/// The `updated_at` of a user object, in unix seconds on the wire.
///
/// A missing or zero timestamp counts as unknown.
pub fn user_updated_at(user: &Value) -> Option<DateTime<Utc>> {
    let seconds = user
        .get("updated_at")
        .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)))?;
    if seconds <= 0 {
        return None;
    }
    DateTime::from_timestamp(seconds, 0)
}
