// error.rs: Error types for goal payload handling.

use thiserror::Error;

/// Errors that can occur while turning server JSON into goal records.
#[derive(Debug, Error)]
pub enum GoalError {
    /// A goal object was missing a required field or had the wrong type.
    /// `goal_id` is `"<unknown>"` when the payload had no readable id.
    #[error("malformed goal payload for {goal_id}: {reason}")]
    MalformedPayload { goal_id: String, reason: String },

    /// A goal list response was not a JSON array.
    #[error("expected a JSON array of goals, found {found}")]
    NotAnArray { found: String },

    /// A user object (the answer to an incremental fetch) had the wrong shape.
    #[error("malformed user payload: {reason}")]
    MalformedUser { reason: String },

    /// An attempt was made to apply a payload to a record with a different id.
    #[error("cannot change goal id from {expected} to {actual}")]
    IdMismatch { expected: String, actual: String },

    /// Failed to serialize/deserialize goal data.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
