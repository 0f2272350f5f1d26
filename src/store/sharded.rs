use std::hash::Hash;
use std::sync::Arc;

use ahash::{AHashMap, RandomState};
use parking_lot::RwLock;

use crate::store::entry::EntryRecord;

// ---------------------------------------------------------------------------
// Shard
// ---------------------------------------------------------------------------

/// Cache-line padding to prevent false sharing between shards.
#[repr(align(64))]
pub(crate) struct Shard<K, V> {
    pub(crate) map: RwLock<AHashMap<K, Arc<EntryRecord<K, V>>>>,
}

// ---------------------------------------------------------------------------
// ShardedStore
// ---------------------------------------------------------------------------

/// The hash index: a key → entry-record map backed by `N` independently
/// locked shards.
///
/// Reads use a shared lock, writes use an exclusive lock, both per-shard.
/// The store treats records opaquely — freshness, status, and policy
/// decisions all live in the cache layer.  The generation-checked variants
/// (`replace_if`, `remove_if`) are the compare-and-set primitives the
/// eviction and refresh paths rely on: they only act when the key still
/// maps to the exact record the caller observed.
pub(crate) struct ShardedStore<K, V> {
    shards: Box<[Shard<K, V>]>,
    /// Always `shards.len() - 1`; shards.len() is a power of two.
    shard_mask: usize,
    /// Hasher used only to compute shard indices.
    build_hasher: RandomState,
}

impl<K: Hash + Eq + Clone, V> ShardedStore<K, V> {
    pub(crate) fn new(num_shards: usize, initial_capacity: usize) -> Self {
        assert!(num_shards.is_power_of_two());
        let per_shard = initial_capacity.div_ceil(num_shards);
        let shards = (0..num_shards)
            .map(|_| Shard {
                map: RwLock::new(AHashMap::with_capacity(per_shard)),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        ShardedStore {
            shards,
            shard_mask: num_shards - 1,
            build_hasher: RandomState::new(),
        }
    }

    #[inline]
    fn shard_index(&self, key: &K) -> usize {
        let h = self.build_hasher.hash_one(key);
        // Use the high bits (better avalanche from ahash).
        ((h >> 32) as usize) & self.shard_mask
    }

    // -----------------------------------------------------------------------
    // Core operations
    // -----------------------------------------------------------------------

    /// Returns the record for `key`, or `None` if absent.  Never blocks a
    /// writer on another shard.
    pub(crate) fn get(&self, key: &K) -> Option<Arc<EntryRecord<K, V>>> {
        let idx = self.shard_index(key);
        self.shards[idx].map.read().get(key).map(Arc::clone)
    }

    /// Installs `entry`, returning the record it displaced, if any.
    pub(crate) fn insert(&self, entry: Arc<EntryRecord<K, V>>) -> Option<Arc<EntryRecord<K, V>>> {
        let idx = self.shard_index(&entry.key);
        self.shards[idx]
            .map
            .write()
            .insert(entry.key.clone(), entry)
    }

    /// Installs `entry` only if the key is absent.
    ///
    /// Returns `None` on success, or the existing record without modifying
    /// the map.
    pub(crate) fn insert_if_absent(
        &self,
        entry: Arc<EntryRecord<K, V>>,
    ) -> Option<Arc<EntryRecord<K, V>>> {
        let idx = self.shard_index(&entry.key);
        let mut map = self.shards[idx].map.write();
        match map.entry(entry.key.clone()) {
            std::collections::hash_map::Entry::Occupied(occupied) => Some(Arc::clone(occupied.get())),
            std::collections::hash_map::Entry::Vacant(vacant) => {
                vacant.insert(entry);
                None
            }
        }
    }

    /// Swaps in `entry` only if the key still maps to generation
    /// `expected_generation`.  Compare-and-set on the mapping.
    pub(crate) fn replace_if(
        &self,
        key: &K,
        expected_generation: u64,
        entry: Arc<EntryRecord<K, V>>,
    ) -> bool {
        let idx = self.shard_index(key);
        let mut map = self.shards[idx].map.write();
        match map.get_mut(key) {
            Some(slot) if slot.generation == expected_generation => {
                *slot = entry;
                true
            }
            _ => false,
        }
    }

    /// Removes the mapping for `key`, returning the removed record.
    pub(crate) fn remove(&self, key: &K) -> Option<Arc<EntryRecord<K, V>>> {
        let idx = self.shard_index(key);
        self.shards[idx].map.write().remove(key)
    }

    /// Removes the mapping only if the key still maps to generation
    /// `expected_generation`.  Compare-and-remove.
    pub(crate) fn remove_if(
        &self,
        key: &K,
        expected_generation: u64,
    ) -> Option<Arc<EntryRecord<K, V>>> {
        let idx = self.shard_index(key);
        let mut map = self.shards[idx].map.write();
        match map.get(key) {
            Some(cur) if cur.generation == expected_generation => map.remove(key),
            _ => None,
        }
    }

    /// Returns the total number of records across all shards.
    pub(crate) fn len(&self) -> usize {
        self.shards.iter().map(|s| s.map.read().len()).sum()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.map.read().is_empty())
    }

    /// Removes and returns every record.  Used by `invalidate_all`, which
    /// retires and notifies each record afterwards.
    pub(crate) fn drain_entries(&self) -> Vec<Arc<EntryRecord<K, V>>> {
        let mut out = Vec::new();
        for shard in self.shards.iter() {
            let mut map = shard.map.write();
            out.extend(map.drain().map(|(_, entry)| entry));
        }
        out
    }

    // -----------------------------------------------------------------------
    // Iteration support
    // -----------------------------------------------------------------------

    pub(crate) fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Snapshots one shard's records under its read lock.  The weakly
    /// consistent iterator walks shards one at a time with this.
    pub(crate) fn shard_entries(&self, idx: usize) -> Vec<Arc<EntryRecord<K, V>>> {
        self.shards[idx].map.read().values().map(Arc::clone).collect()
    }
}
