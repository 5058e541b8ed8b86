// awaiter.rs: Per-record slot for the "wait until settled" task.
//
// After a write, the server may keep a goal `queued` for a while. Several
// callers can want to wait for the same goal at once; they should share one
// poll loop rather than each hammering the server. The slot holds the
// shared handle of the running loop plus the generation it was attached
// under. Clearing is compare-and-clear on that generation: a finished task
// may only empty the slot if nobody attached a newer task in the meantime.

use std::sync::{Arc, Mutex, PoisonError};

use futures::future::{BoxFuture, Shared};

use crate::error::SyncError;

/// What every waiter on a settle task receives.
pub type SettleOutcome = Result<(), Arc<SyncError>>;

/// Cloneable handle to a running settle task.
pub type SettleHandle = Shared<BoxFuture<'static, SettleOutcome>>;

struct Attached {
    generation: u64,
    handle: SettleHandle,
}

#[derive(Default)]
struct Slot {
    attached: Option<Attached>,
    next_generation: u64,
}

/// At most one outstanding settle task per record.
#[derive(Default)]
pub struct UpdateAwaiter {
    slot: Mutex<Slot>,
}

impl UpdateAwaiter {
    /// Return the attached handle, or attach the one built by `start`.
    ///
    /// `start` receives the generation the new task is attached under and
    /// runs while the slot is locked, so it must not block.
    pub(crate) fn join_or_attach(&self, start: impl FnOnce(u64) -> SettleHandle) -> SettleHandle {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(attached) = &slot.attached {
            return attached.handle.clone();
        }
        slot.next_generation += 1;
        let generation = slot.next_generation;
        let handle = start(generation);
        slot.attached = Some(Attached {
            generation,
            handle: handle.clone(),
        });
        handle
    }

    /// Empty the slot if it still holds the task attached under `generation`.
    pub(crate) fn clear_if_current(&self, generation: u64) -> bool {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        let is_current = slot
            .attached
            .as_ref()
            .is_some_and(|attached| attached.generation == generation);
        if is_current {
            slot.attached = None;
        }
        is_current
    }

    pub fn is_attached(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .attached
            .is_some()
    }
}
