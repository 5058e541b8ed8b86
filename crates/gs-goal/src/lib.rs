//! # gs-goal
//!
//! Goal record model for goalsync.
//!
//! The server reports each goal as a JSON object. This crate turns that
//! object into a strongly typed [`GoalFields`] value (plus its stable `id`)
//! and offers the read-only helpers the rest of the workspace uses to
//! present a goal.
//!
//! ## Key components
//!
//! - [`GoalPayload`] — one parsed goal object: `id` + [`GoalFields`]
//! - [`GoalFields`] — every server-mirrored field of a goal
//! - [`GoalChanges`] — goals changed and deleted since a point in time
//! - [`DataPoint`] — one entry of a goal's recent datapoints
//! - [`GoalError`] — malformed payloads and identity violations
//!
//! ```rust
//! use gs_goal::GoalPayload;
//!
//! let json = serde_json::json!({
//!     "id": "g1", "slug": "pushups", "title": "Do pushups", "queued": false,
//!     "deadline": 0, "leadtime": 0, "alertstart": 34200, "losedate": 1740988799,
//!     "pledge": 5.0, "runits": "d", "yaw": 1, "dir": 1
//! });
//! let payload = GoalPayload::parse(&json, 5).unwrap();
//! assert_eq!(payload.id, "g1");
//! assert_eq!(payload.fields.humanized_runits(), "day");
//! ```

pub mod changes;
pub mod datapoint;
pub mod error;
pub mod payload;

pub use changes::{user_updated_at, GoalChanges};
pub use datapoint::DataPoint;
pub use error::GoalError;
pub use payload::{DerivedValues, GoalFields, GoalPayload};
