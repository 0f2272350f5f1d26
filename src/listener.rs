//! Removal listener — a callback invoked whenever an entry leaves the cache.
//!
//! Listeners run on the cache's [`Executor`](crate::exec::Executor), never
//! while internal locks are held.  A panicking listener is caught, logged,
//! and discarded; it cannot corrupt the cache.
//!
//! # Example
//! ```
//! use cortado::CacheBuilder;
//! use cortado::listener::RemovalCause;
//! use std::sync::{Arc, Mutex};
//!
//! let log: Arc<Mutex<Vec<(u64, RemovalCause)>>> = Arc::new(Mutex::new(Vec::new()));
//! let log2 = Arc::clone(&log);
//!
//! let cache: cortado::Cache<u64, u64> = CacheBuilder::new(2)
//!     .removal_listener(move |key: &u64, _val, cause| {
//!         log2.lock().unwrap().push((*key, cause));
//!     })
//!     .build();
//!
//! cache.insert(1, 10);
//! cache.invalidate(&1);
//! cache.clean_up();
//! assert_eq!(log.lock().unwrap()[0], (1, RemovalCause::Explicit));
//! ```

use std::sync::Arc;

// ---------------------------------------------------------------------------
// RemovalCause
// ---------------------------------------------------------------------------

/// The reason an entry was removed from the cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RemovalCause {
    /// Removed explicitly via [`Cache::invalidate`],
    /// [`Cache::invalidate_all`], or a refresh reload that returned no
    /// value.
    ///
    /// [`Cache::invalidate`]: crate::Cache::invalidate
    /// [`Cache::invalidate_all`]: crate::Cache::invalidate_all
    Explicit,
    /// The value was overwritten by an insert, replace, or a successful
    /// refresh reload.
    Replaced,
    /// The entry's write- or access-time deadline passed.
    Expired,
    /// The cache exceeded its capacity and this entry was the
    /// least-recently-used victim.
    Size,
}

impl RemovalCause {
    /// Returns `true` when the removal was automatic (not requested by the
    /// caller): eviction for size or expiry.
    pub fn was_evicted(self) -> bool {
        matches!(self, RemovalCause::Expired | RemovalCause::Size)
    }
}

// ---------------------------------------------------------------------------
// RemovalListener trait
// ---------------------------------------------------------------------------

/// A callback invoked each time an entry is removed for any reason.
///
/// The callback receives a reference to the removed key, a shared reference
/// to the removed value (`Arc<V>`), and the removal cause.  Exactly one
/// notification is delivered per removal event.
///
/// The listener runs on the configured executor; with the default
/// caller-runs executor that is the thread whose operation triggered the
/// removal, after all internal locks have been released.
pub trait RemovalListener<K, V>: Send + Sync + 'static {
    fn on_removal(&self, key: &K, value: Arc<V>, cause: RemovalCause);
}

/// A [`RemovalListener`] backed by a closure.
///
/// Created via [`CacheBuilder::removal_listener`](crate::CacheBuilder::removal_listener).
pub struct FnListener<F>(pub F);

impl<K, V, F> RemovalListener<K, V> for FnListener<F>
where
    F: Fn(&K, Arc<V>, RemovalCause) + Send + Sync + 'static,
{
    fn on_removal(&self, key: &K, value: Arc<V>, cause: RemovalCause) {
        (self.0)(key, value, cause)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn was_evicted_classification() {
        assert!(RemovalCause::Expired.was_evicted());
        assert!(RemovalCause::Size.was_evicted());
        assert!(!RemovalCause::Explicit.was_evicted());
        assert!(!RemovalCause::Replaced.was_evicted());
    }
}
