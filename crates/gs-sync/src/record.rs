// record.rs: GoalRecord, the live, shared view of one goal.
//
// A GoalRecord is created the first time a goal id shows up in a server
// response and is then reused for as long as the id stays in the cache.
// Later responses are applied in place, so anyone holding an
// `Arc<GoalRecord>` (a screen showing the goal, a task waiting for it to
// settle) keeps seeing current data without re-resolving it.

use std::fmt;
use std::sync::{PoisonError, RwLock};

use gs_goal::{GoalError, GoalFields, GoalPayload};

use crate::awaiter::UpdateAwaiter;

/// One goal's server-reported state, identity-stable across fetches.
pub struct GoalRecord {
    id: String,
    fields: RwLock<GoalFields>,
    awaiter: UpdateAwaiter,
}

impl GoalRecord {
    pub(crate) fn new(payload: GoalPayload) -> Self {
        Self {
            id: payload.id,
            fields: RwLock::new(payload.fields),
            awaiter: UpdateAwaiter::default(),
        }
    }

    /// Server-assigned id. Never changes.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// A consistent copy of every field as of now.
    pub fn fields(&self) -> GoalFields {
        self.read(GoalFields::clone)
    }

    /// Run `f` against the current fields under the read lock.
    pub fn read<R>(&self, f: impl FnOnce(&GoalFields) -> R) -> R {
        let guard = self.fields.read().unwrap_or_else(PoisonError::into_inner);
        f(&*guard)
    }

    pub fn slug(&self) -> String {
        self.read(|f| f.slug.clone())
    }

    pub fn is_queued(&self) -> bool {
        self.read(|f| f.queued)
    }

    /// Replace every field with the payload's, in one write.
    ///
    /// Only the sync engine applies payloads, and only to the record whose
    /// id they carry; a mismatched id is refused untouched.
    pub(crate) fn update_to_match(&self, payload: GoalPayload) -> Result<(), GoalError> {
        if payload.id != self.id {
            return Err(GoalError::IdMismatch {
                expected: self.id.clone(),
                actual: payload.id,
            });
        }
        *self.fields.write().unwrap_or_else(PoisonError::into_inner) = payload.fields;
        Ok(())
    }

    pub(crate) fn awaiter(&self) -> &UpdateAwaiter {
        &self.awaiter
    }

    /// Whether a settle task is currently attached to this record.
    pub fn is_settling(&self) -> bool {
        self.awaiter.is_attached()
    }
}

impl fmt::Debug for GoalRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GoalRecord")
            .field("id", &self.id)
            .field("fields", &self.fields())
            .finish()
    }
}
