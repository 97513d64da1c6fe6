//! In-flight deduplication by key.
//!
//! The first caller for a key becomes the leader and runs the work; callers
//! arriving while the leader is still running block on the same slot and
//! share its outcome. The slot is removed once settled, so a later request
//! for the same key starts a fresh attempt. Invariant: at most one active
//! execution per key at any time.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::foundation::error::{ForgeError, ForgeResult};

pub(crate) struct Flights<K, V> {
    inflight: Mutex<HashMap<K, Arc<FlightSlot<V>>>>,
}

struct FlightSlot<V> {
    state: Mutex<Option<Result<V, Arc<ForgeError>>>>,
    done: Condvar,
}

impl<V: Clone> FlightSlot<V> {
    fn new() -> Self {
        Self {
            state: Mutex::new(None),
            done: Condvar::new(),
        }
    }

    fn settle(&self, value: Result<V, Arc<ForgeError>>) {
        let mut state = self.state.lock();
        *state = Some(value);
        self.done.notify_all();
    }

    fn wait(&self) -> ForgeResult<V> {
        let mut state = self.state.lock();
        while state.is_none() {
            self.done.wait(&mut state);
        }
        match state.as_ref().expect("slot settled") {
            Ok(v) => Ok(v.clone()),
            Err(e) => Err(ForgeError::Shared(e.clone())),
        }
    }
}

impl<K: Eq + Hash + Clone, V: Clone> Flights<K, V> {
    pub(crate) fn new() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Run `work` for `key`, or join an execution already in flight.
    ///
    /// Returns the outcome plus whether it was reused from another caller's
    /// execution. Failures reach every joined caller as
    /// [`ForgeError::Shared`] of the leader's error.
    pub(crate) fn run(
        &self,
        key: K,
        work: impl FnOnce() -> ForgeResult<V>,
    ) -> (ForgeResult<V>, bool) {
        let slot = {
            let mut map = self.inflight.lock();
            if let Some(existing) = map.get(&key) {
                let existing = existing.clone();
                drop(map);
                return (existing.wait(), true);
            }
            let slot = Arc::new(FlightSlot::new());
            map.insert(key.clone(), slot.clone());
            slot
        };

        let outcome = match work() {
            Ok(v) => Ok(v),
            Err(e) => Err(Arc::new(e)),
        };
        slot.settle(outcome.clone());
        self.inflight.lock().remove(&key);

        let result = match outcome {
            Ok(v) => Ok(v),
            Err(e) => Err(ForgeError::Shared(e)),
        };
        (result, false)
    }
}
