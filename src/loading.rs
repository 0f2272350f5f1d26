//! Single-flight coordination for `get_with`-style loads.
//!
//! At most one computation runs per key across all simultaneous callers.
//! The first caller to claim a key becomes the **leader** and runs the
//! loader outside of every cache lock; later callers become **followers**
//! and block on the leader's waiter.  When the leader finishes it publishes
//! one shared outcome — the loaded value, "no value", or the load error —
//! and every follower observes that same outcome.
//!
//! If a leader panics (or is otherwise torn down before completing), its
//! waiter is abandoned and followers wake up and retry from scratch rather
//! than hang.

use std::hash::Hash;
use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::{Condvar, Mutex};

use crate::error::LoadError;

/// What a completed load produced.  `Ok(None)` means the loader declined to
/// produce a value; nothing was stored.
pub(crate) type LoadOutcome<V> = Result<Option<Arc<V>>, LoadError>;

enum WaitState<V> {
    Pending,
    Done(LoadOutcome<V>),
    /// The leader went away without completing; waiters must retry.
    Abandoned,
}

/// The completion primitive a cohort blocks on.
pub(crate) struct Waiter<V> {
    state: Mutex<WaitState<V>>,
    cond: Condvar,
}

impl<V> Waiter<V> {
    fn new() -> Self {
        Waiter {
            state: Mutex::new(WaitState::Pending),
            cond: Condvar::new(),
        }
    }

    /// Blocks until the leader publishes an outcome.
    ///
    /// Returns `None` if the load was abandoned and the caller should
    /// retry.
    pub(crate) fn wait(&self) -> Option<LoadOutcome<V>> {
        let mut state = self.state.lock();
        loop {
            match &*state {
                WaitState::Done(outcome) => return Some(outcome.clone()),
                WaitState::Abandoned => return None,
                WaitState::Pending => {}
            }
            self.cond.wait(&mut state);
        }
    }

    fn publish(&self, state: WaitState<V>) {
        *self.state.lock() = state;
        self.cond.notify_all();
    }
}

/// Role assigned by [`InFlight::join`].
pub(crate) enum Joined<V> {
    /// This caller claimed the key and must run the loader, then call
    /// [`InFlight::complete`] (or let the guard abandon on unwind).
    Leader,
    /// Another caller is already loading this key.
    Follower(Arc<Waiter<V>>),
}

/// The table of in-flight loads, keyed by cache key.
pub(crate) struct InFlight<K, V> {
    map: Mutex<AHashMap<K, Arc<Waiter<V>>>>,
}

impl<K: Hash + Eq + Clone, V> InFlight<K, V> {
    pub(crate) fn new() -> Self {
        InFlight {
            map: Mutex::new(AHashMap::new()),
        }
    }

    /// Claims the key or joins the existing cohort.
    pub(crate) fn join(&self, key: &K) -> Joined<V> {
        let mut map = self.map.lock();
        if let Some(waiter) = map.get(key) {
            Joined::Follower(Arc::clone(waiter))
        } else {
            map.insert(key.clone(), Arc::new(Waiter::new()));
            Joined::Leader
        }
    }

    /// Publishes the leader's outcome and releases the key.
    pub(crate) fn complete(&self, key: &K, outcome: LoadOutcome<V>) {
        let waiter = self.map.lock().remove(key);
        if let Some(waiter) = waiter {
            waiter.publish(WaitState::Done(outcome));
        }
    }

    /// Releases the key without an outcome; followers retry.
    pub(crate) fn abandon(&self, key: &K) {
        let waiter = self.map.lock().remove(key);
        if let Some(waiter) = waiter {
            waiter.publish(WaitState::Abandoned);
        }
    }
}

/// Drop guard for the leader: abandons the in-flight slot unless the load
/// was completed, so a panicking loader cannot strand its followers.
pub(crate) struct LeaderGuard<'a, K: Hash + Eq + Clone, V> {
    inflight: &'a InFlight<K, V>,
    key: &'a K,
    completed: bool,
}

impl<'a, K: Hash + Eq + Clone, V> LeaderGuard<'a, K, V> {
    pub(crate) fn new(inflight: &'a InFlight<K, V>, key: &'a K) -> Self {
        LeaderGuard {
            inflight,
            key,
            completed: false,
        }
    }

    pub(crate) fn complete(mut self, outcome: LoadOutcome<V>) {
        self.completed = true;
        self.inflight.complete(self.key, outcome);
    }
}

impl<K: Hash + Eq + Clone, V> Drop for LeaderGuard<'_, K, V> {
    fn drop(&mut self) {
        if !self.completed {
            self.inflight.abandon(self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn leader_then_followers() {
        let inflight: Arc<InFlight<u64, u64>> = Arc::new(InFlight::new());
        assert!(matches!(inflight.join(&1), Joined::Leader));

        let follower = match inflight.join(&1) {
            Joined::Follower(w) => w,
            Joined::Leader => panic!("second join must follow"),
        };

        let bg = {
            let inflight = Arc::clone(&inflight);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                inflight.complete(&1, Ok(Some(Arc::new(42))));
            })
        };

        let outcome = follower.wait().expect("completed, not abandoned");
        assert_eq!(outcome.unwrap(), Some(Arc::new(42)));
        bg.join().unwrap();

        // Key released: a new join leads again.
        assert!(matches!(inflight.join(&1), Joined::Leader));
    }

    #[test]
    fn abandoned_waiters_are_told_to_retry() {
        let inflight: InFlight<u64, u64> = InFlight::new();
        assert!(matches!(inflight.join(&1), Joined::Leader));
        let follower = match inflight.join(&1) {
            Joined::Follower(w) => w,
            Joined::Leader => panic!(),
        };

        {
            let guard = LeaderGuard::new(&inflight, &1);
            drop(guard); // leader "panicked" without completing
        }
        assert!(follower.wait().is_none());
        assert!(matches!(inflight.join(&1), Joined::Leader));
    }

    #[test]
    fn distinct_keys_load_independently() {
        let inflight: InFlight<u64, u64> = InFlight::new();
        assert!(matches!(inflight.join(&1), Joined::Leader));
        assert!(matches!(inflight.join(&2), Joined::Leader));
    }
}
