// payload.rs: Parsing server goal objects into typed fields.
//
// The server's goal object carries far more than the client uses. We keep
// the fields that drive display and reconciliation, require the handful
// without which a goal is meaningless, and default the rest. A payload
// that fails validation is rejected as a whole: callers never see a goal
// with some fields from the new response and some from the old one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::datapoint::DataPoint;
use crate::error::GoalError;

/// Wire shape of a goal object. Fields without `Option`/`default` are required.
#[derive(Debug, Deserialize)]
struct RawGoal {
    id: String,
    slug: String,
    title: String,
    queued: bool,
    deadline: i64,
    leadtime: i64,
    alertstart: i64,
    losedate: i64,
    pledge: f64,
    runits: String,
    yaw: i64,
    dir: i64,

    initday: Option<i64>,
    lasttouch: Option<String>,
    yaxis: Option<String>,
    rate: Option<f64>,
    delta_text: Option<String>,
    #[serde(default)]
    won: bool,
    lane: Option<i64>,
    limsum: Option<String>,
    safesum: Option<String>,
    safebuf: Option<i64>,
    #[serde(default)]
    use_defaults: bool,
    safebump: Option<f64>,
    curval: Option<f64>,
    autodata: Option<String>,
    graph_url: Option<String>,
    thumb_url: Option<String>,
    healthkitmetric: Option<String>,
    #[serde(default)]
    todayta: bool,
    #[serde(default)]
    hhmmformat: bool,
    #[serde(default)]
    recent_data: Vec<Value>,
    /// `[goaldate, goalval, rate]` as computed server-side.
    mathishard: Option<Vec<Option<f64>>>,
}

/// Values the server derives from the goal's road (the `mathishard` triple).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DerivedValues {
    pub goaldate: f64,
    pub goalval: f64,
    pub rate: f64,
}

/// Every server-mirrored field of a goal, except its immutable `id`.
///
/// This is a plain value: replacing a record's `GoalFields` wholesale is how
/// the sync engine applies a fresh server response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalFields {
    pub slug: String,
    pub title: String,

    /// True while the server is still recomputing this goal's derived state.
    pub queued: bool,

    pub initday: Option<i64>,
    pub deadline: i64,
    pub leadtime: i64,
    pub alertstart: i64,
    pub losedate: i64,
    pub lasttouch: Option<DateTime<Utc>>,
    pub pledge: f64,
    pub rate: Option<f64>,
    pub runits: String,
    pub yaxis: String,
    pub delta_text: String,
    pub won: bool,
    pub lane: Option<i64>,
    pub yaw: i64,
    pub dir: i64,
    pub limsum: Option<String>,
    pub safesum: Option<String>,
    pub safebuf: Option<i64>,
    pub safebump: Option<f64>,
    pub curval: Option<f64>,
    pub use_defaults: bool,
    pub autodata: String,
    pub graph_url: Option<String>,
    pub thumb_url: Option<String>,
    pub healthkitmetric: Option<String>,
    pub todayta: bool,
    pub hhmmformat: bool,

    /// Most recent first, capped when parsed.
    pub recent_data: Vec<DataPoint>,

    pub derived: DerivedValues,
}

/// One goal object from a server response: its identity plus its fields.
#[derive(Debug, Clone, PartialEq)]
pub struct GoalPayload {
    pub id: String,
    pub fields: GoalFields,
}

impl GoalPayload {
    /// Parse a single goal object, keeping at most `recent_cap` recent datapoints.
    pub fn parse(value: &Value, recent_cap: usize) -> Result<Self, GoalError> {
        let raw: RawGoal =
            serde_json::from_value(value.clone()).map_err(|e| GoalError::MalformedPayload {
                goal_id: value
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or("<unknown>")
                    .to_string(),
                reason: e.to_string(),
            })?;
        Ok(raw.into_payload(recent_cap))
    }

    /// Parse a goal list response. Fails as a whole if any entry is malformed.
    pub fn parse_list(value: &Value, recent_cap: usize) -> Result<Vec<Self>, GoalError> {
        let entries = value.as_array().ok_or_else(|| GoalError::NotAnArray {
            found: json_type_name(value).to_string(),
        })?;
        entries.iter().map(|v| Self::parse(v, recent_cap)).collect()
    }
}

impl RawGoal {
    fn into_payload(self, recent_cap: usize) -> GoalPayload {
        let lasttouch = self.lasttouch.as_deref().and_then(|s| {
            match DateTime::parse_from_rfc3339(s) {
                Ok(dt) => Some(dt.with_timezone(&Utc)),
                Err(e) => {
                    tracing::debug!("ignoring unparsable lasttouch {:?} on {}: {}", s, self.id, e);
                    None
                }
            }
        });

        // Corrupted goals occasionally lack mathishard; zero is fine for display.
        let derived = self
            .mathishard
            .as_deref()
            .map(|m| DerivedValues {
                goaldate: m.first().copied().flatten().unwrap_or(0.0),
                goalval: m.get(1).copied().flatten().unwrap_or(0.0),
                rate: m.get(2).copied().flatten().unwrap_or(0.0),
            })
            .unwrap_or_default();

        GoalPayload {
            id: self.id,
            fields: GoalFields {
                slug: self.slug,
                title: self.title,
                queued: self.queued,
                initday: self.initday,
                deadline: self.deadline,
                leadtime: self.leadtime,
                alertstart: self.alertstart,
                losedate: self.losedate,
                lasttouch,
                pledge: self.pledge,
                rate: self.rate,
                runits: self.runits,
                yaxis: self.yaxis.unwrap_or_default(),
                delta_text: self.delta_text.unwrap_or_default(),
                won: self.won,
                lane: self.lane,
                yaw: self.yaw,
                dir: self.dir,
                limsum: self.limsum,
                safesum: self.safesum,
                safebuf: self.safebuf,
                safebump: self.safebump,
                curval: self.curval,
                use_defaults: self.use_defaults,
                autodata: self.autodata.unwrap_or_default(),
                graph_url: self.graph_url,
                thumb_url: self.thumb_url,
                healthkitmetric: self.healthkitmetric,
                todayta: self.todayta,
                hhmmformat: self.hhmmformat,
                recent_data: DataPoint::recent_from_json(&self.recent_data, recent_cap),
                derived,
            },
        }
    }
}

pub(crate) fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl GoalFields {
    /// Lane position relative to the goal's "good side".
    pub fn relative_lane(&self) -> i64 {
        self.lane.map(|lane| lane * self.yaw).unwrap_or(0)
    }

    /// Rate units spelled out (`"d"` → `"day"`). Unknown units read as weeks.
    pub fn humanized_runits(&self) -> &'static str {
        match self.runits.as_str() {
            "d" => "day",
            "m" => "month",
            "h" => "hour",
            "y" => "year",
            _ => "week",
        }
    }

    /// The safety summary with its first letter upper-cased.
    pub fn capital_safesum(&self) -> String {
        let Some(safe) = self.safesum.as_deref() else {
            return String::new();
        };
        let mut chars = safe.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    }

    pub fn is_data_provided_automatically(&self) -> bool {
        !self.autodata.is_empty()
    }

    /// Manual data entry makes no sense for autodata goals or goals already won.
    pub fn hide_data_entry(&self) -> bool {
        self.is_data_provided_automatically() || self.won
    }

    /// One-line `slug: limsum` summary, slug truncated to 20 characters.
    pub fn brief_summary(&self) -> String {
        let short_slug: String = self.slug.chars().take(20).collect();
        format!("{}: {}", short_slug, self.limsum.as_deref().unwrap_or(""))
    }
}
