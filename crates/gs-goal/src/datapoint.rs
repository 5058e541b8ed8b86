// datapoint.rs: Recent datapoints embedded in a goal payload.
//
// Only the fields the client actually reads are parsed. Anything missing
// falls back to an empty value instead of failing the whole goal, so a
// server-side schema tweak to datapoints never blocks a goal refresh.

use serde::{Deserialize, Serialize};

/// A datapoint reported by the server inside a goal's `recent_data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    /// Server-assigned datapoint id.
    #[serde(default, deserialize_with = "deserialize_id")]
    pub id: String,

    /// Day the datapoint counts towards, as `YYYYMMDD`.
    #[serde(default)]
    pub daystamp: String,

    #[serde(default)]
    pub value: f64,

    #[serde(default)]
    pub comment: String,

    /// Client-supplied idempotency key, if the datapoint was created with one.
    #[serde(default)]
    pub requestid: String,
}

/// The server sends ids either as a plain string or as `{"$oid": "..."}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Plain(String),
    Oid {
        #[serde(rename = "$oid")]
        oid: String,
    },
}

fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = Option::<RawId>::deserialize(deserializer)?;
    Ok(match raw {
        Some(RawId::Plain(id)) => id,
        Some(RawId::Oid { oid }) => oid,
        None => String::new(),
    })
}

impl DataPoint {
    /// Parse a server `recent_data` array (oldest first) into a list that is
    /// most-recent-first and holds at most `cap` entries.
    pub fn recent_from_json(values: &[serde_json::Value], cap: usize) -> Vec<DataPoint> {
        values
            .iter()
            .rev()
            .filter_map(|v| match serde_json::from_value::<DataPoint>(v.clone()) {
                Ok(point) => Some(point),
                Err(e) => {
                    tracing::debug!("skipping unreadable datapoint: {}", e);
                    None
                }
            })
            .take(cap)
            .collect()
    }
}
