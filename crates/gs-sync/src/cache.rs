// cache.rs: Mutex-protected holder for the goal map.
//
// SynchronizedCache is deliberately dumb: whole-value get and set, each
// serialized against every other call. It is what lets UI-side callers read
// the last known goals without going through the engine. Read-modify-write
// sequences belong to the engine, which runs them under its own state lock.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::record::GoalRecord;

/// Goal id → live record.
pub type GoalMap = BTreeMap<String, Arc<GoalRecord>>;

/// Thread-safe container for a single value.
///
/// `T` should be cheap to clone or hold shared handles: `get()` hands out
/// a clone so no caller ever holds the lock.
pub struct SynchronizedCache<T> {
    inner: Mutex<T>,
}

impl<T: Clone> SynchronizedCache<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    pub fn get(&self) -> T {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set(&self, value: T) {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = value;
    }

    /// Compute the replacement from the current value and store it, all
    /// under one lock hold. Readers see either the old value or the new one.
    pub fn replace_with<R>(&self, f: impl FnOnce(&T) -> (T, R)) -> R {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let (next, result) = f(&*guard);
        *guard = next;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn starts_with_initial_value() {
        let cache: SynchronizedCache<Option<Vec<u32>>> = SynchronizedCache::new(None);
        assert_eq!(cache.get(), None);

        cache.set(Some(vec![]));
        assert_eq!(cache.get(), Some(vec![]));
    }

    #[test]
    fn replace_with_sees_current_value() {
        let cache = SynchronizedCache::new(1u32);
        let previous = cache.replace_with(|v| (v + 1, *v));
        assert_eq!(previous, 1);
        assert_eq!(cache.get(), 2);
    }

    #[test]
    fn concurrent_writers_never_tear() {
        let cache = Arc::new(SynchronizedCache::new(vec![0u32; 64]));
        let handles: Vec<_> = (1..=8u32)
            .map(|n| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for _ in 0..200 {
                        cache.set(vec![n; 64]);
                        let seen = cache.get();
                        assert!(seen.iter().all(|v| *v == seen[0]));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    }
}
