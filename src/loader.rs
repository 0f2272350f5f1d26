//! Cache loader — computes values for keys on demand.
//!
//! A [`CacheLoader`] serves two call sites:
//!
//! - [`Cache::get_all`](crate::Cache::get_all) issues one [`load_all`] bulk
//!   call for the keys that are not already present.
//! - [`refresh_after_write`](crate::CacheBuilder::refresh_after_write)
//!   invokes [`reload`] asynchronously when a read finds a stale entry.
//!
//! `load` returning `Ok(None)` means "no value for this key": nothing is
//! stored and the absence is not an error.
//!
//! [`load_all`]: CacheLoader::load_all
//! [`reload`]: CacheLoader::reload

use std::sync::Arc;

use crate::error::BoxError;

/// Computes values for cache keys.
///
/// # Example
/// ```
/// use cortado::loader::CacheLoader;
/// use cortado::error::BoxError;
///
/// struct SquareLoader;
///
/// impl CacheLoader<u64, u64> for SquareLoader {
///     fn load(&self, key: &u64) -> Result<Option<u64>, BoxError> {
///         Ok(Some(key * key))
///     }
/// }
/// ```
pub trait CacheLoader<K, V>: Send + Sync + 'static {
    /// Computes the value for `key`, or `Ok(None)` if the key has no value.
    fn load(&self, key: &K) -> Result<Option<V>, BoxError>;

    /// Computes values for a batch of keys in one call.
    ///
    /// The default implementation loads each key individually, stopping at
    /// the first error.  Override when the backing source supports a
    /// cheaper bulk fetch.  Keys absent from the returned set are treated
    /// as having no value; returned keys that were not requested are
    /// discarded by the cache.
    fn load_all(&self, keys: Vec<K>) -> Result<Vec<(K, V)>, BoxError> {
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.load(&key)? {
                out.push((key, value));
            }
        }
        Ok(out)
    }

    /// Recomputes the value for a key that is being refreshed.
    ///
    /// `old_value` is the currently cached value.  Returning `Ok(None)`
    /// removes the entry; an `Err` leaves the stale value in place.  The
    /// default delegates to [`load`](Self::load).
    fn reload(&self, key: &K, old_value: Arc<V>) -> Result<Option<V>, BoxError> {
        let _ = old_value;
        self.load(key)
    }
}

/// A [`CacheLoader`] backed by a closure (no bulk or reload overrides).
pub struct FnLoader<F>(pub F);

impl<K, V, F> CacheLoader<K, V> for FnLoader<F>
where
    F: Fn(&K) -> Result<Option<V>, BoxError> + Send + Sync + 'static,
{
    fn load(&self, key: &K) -> Result<Option<V>, BoxError> {
        (self.0)(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Doubler;

    impl CacheLoader<u32, u32> for Doubler {
        fn load(&self, key: &u32) -> Result<Option<u32>, BoxError> {
            if *key == 0 {
                Ok(None)
            } else {
                Ok(Some(key * 2))
            }
        }
    }

    #[test]
    fn default_load_all_skips_absent_keys() {
        let loader = Doubler;
        let loaded = loader.load_all(vec![0, 1, 2]).unwrap();
        assert_eq!(loaded, vec![(1, 2), (2, 4)]);
    }

    #[test]
    fn default_reload_delegates_to_load() {
        let loader = Doubler;
        let reloaded = loader.reload(&3, Arc::new(6)).unwrap();
        assert_eq!(reloaded, Some(6));
    }
}
