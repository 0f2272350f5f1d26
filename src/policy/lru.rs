//! Weighted LRU eviction policy with expiry scans.
//!
//! All methods are called **single-threadedly** by the maintenance pass,
//! under the maintenance lock; the cache wraps the policy in a `Mutex`.
//!
//! The policy tracks every alive record in an index-arena of nodes linked
//! into up to two intrusive doubly-linked lists:
//!
//! - the **access-order list** (always): most-recently-used entries sit at
//!   the head side, the least-recently-used victim at the tail side;
//! - the **write-order list** (only when write-expiry is configured):
//!   ordered by `write_time`, newest writes at the head side.
//!
//! Because the lists are recency-sorted, the expiry sweeps walk from the
//! tail and stop at the first record whose deadline has not passed.
//!
//! Nodes are stored in a `Vec` and linked by index, avoiding raw pointers
//! at the cost of a little indirection.  Index 0 and 1 are the head and
//! tail sentinels shared by both lists (each sentinel carries both link
//! pairs).

use std::hash::Hash;
use std::sync::Arc;

use ahash::AHashMap;

use crate::listener::RemovalCause;
use crate::store::entry::EntryRecord;

/// Sentinel indices in the `nodes` arena.
const HEAD: usize = 0; // most-recently-used / most-recently-written end
const TAIL: usize = 1; // least-recently-used / oldest-written end
const NULL: usize = usize::MAX;

struct PolicyNode<K, V> {
    /// `None` only for the HEAD and TAIL sentinels and freed slots.
    entry: Option<Arc<EntryRecord<K, V>>>,
    /// Access-order links.
    acc_prev: usize,
    acc_next: usize,
    /// Write-order links.  `NULL` when write-order tracking is off.
    wr_prev: usize,
    wr_next: usize,
}

/// A record the policy retired during a sweep.  The caller finishes the
/// removal: compare-and-remove from the index, then notify.
pub(crate) struct Removal<K, V> {
    pub(crate) entry: Arc<EntryRecord<K, V>>,
    pub(crate) cause: RemovalCause,
}

/// O(1) weighted LRU policy backed by an index-arena doubly-linked list.
pub(crate) struct LruPolicy<K, V> {
    /// Index 0 = HEAD sentinel, 1 = TAIL sentinel, 2+ = real entries.
    nodes: Vec<PolicyNode<K, V>>,
    /// Maps a key to its index in `nodes`.
    map: AHashMap<K, usize>,
    /// Indices of freed (reusable) slots.
    free_list: Vec<usize>,
    total_weight: u64,
    max_weight: u64,
    /// Write-expiry duration in nanos; enables the write-order list.
    ttl: Option<u64>,
    /// Access-expiry duration in nanos.
    tti: Option<u64>,
}

impl<K: Hash + Eq + Clone, V> LruPolicy<K, V> {
    pub(crate) fn new(max_weight: u64, ttl: Option<u64>, tti: Option<u64>) -> Self {
        let mut nodes: Vec<PolicyNode<K, V>> = Vec::with_capacity(16);
        // HEAD sentinel (index 0).
        nodes.push(PolicyNode {
            entry: None,
            acc_prev: NULL,
            acc_next: TAIL,
            wr_prev: NULL,
            wr_next: TAIL,
        });
        // TAIL sentinel (index 1).
        nodes.push(PolicyNode {
            entry: None,
            acc_prev: HEAD,
            acc_next: NULL,
            wr_prev: HEAD,
            wr_next: NULL,
        });

        LruPolicy {
            nodes,
            map: AHashMap::new(),
            free_list: Vec::new(),
            total_weight: 0,
            max_weight,
            ttl,
            tti,
        }
    }

    #[inline]
    fn track_write_order(&self) -> bool {
        self.ttl.is_some()
    }

    // -----------------------------------------------------------------------
    // Link management
    // -----------------------------------------------------------------------

    /// Links `idx` immediately after HEAD in the access list (marks it MRU).
    fn acc_link_after_head(&mut self, idx: usize) {
        let old_first = self.nodes[HEAD].acc_next;
        self.nodes[idx].acc_prev = HEAD;
        self.nodes[idx].acc_next = old_first;
        self.nodes[HEAD].acc_next = idx;
        self.nodes[old_first].acc_prev = idx;
    }

    /// Detaches `idx` from the access list.
    fn acc_unlink(&mut self, idx: usize) {
        let prev = self.nodes[idx].acc_prev;
        let next = self.nodes[idx].acc_next;
        self.nodes[prev].acc_next = next;
        self.nodes[next].acc_prev = prev;
        self.nodes[idx].acc_prev = NULL;
        self.nodes[idx].acc_next = NULL;
    }

    /// Links `idx` immediately after HEAD in the write list (newest write).
    fn wr_link_after_head(&mut self, idx: usize) {
        let old_first = self.nodes[HEAD].wr_next;
        self.nodes[idx].wr_prev = HEAD;
        self.nodes[idx].wr_next = old_first;
        self.nodes[HEAD].wr_next = idx;
        self.nodes[old_first].wr_prev = idx;
    }

    /// Detaches `idx` from the write list.
    fn wr_unlink(&mut self, idx: usize) {
        let prev = self.nodes[idx].wr_prev;
        let next = self.nodes[idx].wr_next;
        self.nodes[prev].wr_next = next;
        self.nodes[next].wr_prev = prev;
        self.nodes[idx].wr_prev = NULL;
        self.nodes[idx].wr_next = NULL;
    }

    /// Allocates a new node (reusing from the free list when available).
    fn alloc_node(&mut self, entry: Arc<EntryRecord<K, V>>) -> usize {
        if let Some(idx) = self.free_list.pop() {
            let node = &mut self.nodes[idx];
            node.entry = Some(entry);
            node.acc_prev = NULL;
            node.acc_next = NULL;
            node.wr_prev = NULL;
            node.wr_next = NULL;
            idx
        } else {
            let idx = self.nodes.len();
            self.nodes.push(PolicyNode {
                entry: Some(entry),
                acc_prev: NULL,
                acc_next: NULL,
                wr_prev: NULL,
                wr_next: NULL,
            });
            idx
        }
    }

    /// Unlinks `idx` from every list, drops it from the key map, adjusts
    /// the weight total, and finalizes the record as dead.
    fn unlink_and_free(&mut self, idx: usize) -> Arc<EntryRecord<K, V>> {
        self.acc_unlink(idx);
        if self.track_write_order() {
            self.wr_unlink(idx);
        }
        let entry = self.nodes[idx].entry.take().expect("freeing a sentinel or empty node");
        self.map.remove(&entry.key);
        self.total_weight -= entry.weight;
        entry.mark_dead();
        self.free_list.push(idx);
        entry
    }

    // -----------------------------------------------------------------------
    // Buffered-event application
    // -----------------------------------------------------------------------

    /// Applies a drained read event: promotes the record's key to MRU.
    ///
    /// Events for records that were removed (or replaced by a newer
    /// generation) still promote the key — recency belongs to the key, and
    /// a dropped or late promotion only weakens the LRU approximation.
    pub(crate) fn on_access(&mut self, entry: &Arc<EntryRecord<K, V>>) {
        if let Some(&idx) = self.map.get(&entry.key) {
            self.acc_unlink(idx);
            self.acc_link_after_head(idx);
        }
    }

    /// Applies an `Add` task: links the record at the MRU / newest-write
    /// positions.
    pub(crate) fn on_add(&mut self, entry: Arc<EntryRecord<K, V>>) {
        if let Some(&idx) = self.map.get(&entry.key) {
            // The key is already tracked (the previous generation's Add was
            // applied in an earlier drain) — treat as an update.
            self.repoint(idx, entry);
            return;
        }
        if !entry.is_alive() {
            // The record was retired before its Add drained and the
            // corresponding Remove task was already applied (tasks from
            // different producers may enqueue out of program order).
            // Linking it now would strand a zombie node.
            entry.mark_dead();
            return;
        }
        let weight = entry.weight;
        let key = entry.key.clone();
        let idx = self.alloc_node(entry);
        self.map.insert(key, idx);
        self.acc_link_after_head(idx);
        if self.track_write_order() {
            self.wr_link_after_head(idx);
        }
        self.total_weight += weight;
    }

    /// Applies an `Update` task: re-points the key's node at the new record
    /// generation and refreshes both list positions (a write is also an
    /// access for recency purposes).
    pub(crate) fn on_update(&mut self, entry: Arc<EntryRecord<K, V>>) {
        match self.map.get(&entry.key) {
            Some(&idx) => self.repoint(idx, entry),
            // The old node was already evicted or expired out from under
            // this update; the new generation still needs tracking.
            None => self.on_add(entry),
        }
    }

    fn repoint(&mut self, idx: usize, entry: Arc<EntryRecord<K, V>>) {
        {
            let tracked = self.nodes[idx]
                .entry
                .as_ref()
                .expect("repointing a sentinel or empty node");
            // Generations are globally monotonic and per-key replacement is
            // serialized by the shard lock, so a task carrying an older
            // generation lost the enqueue race to its successor: drop it.
            if entry.generation < tracked.generation {
                entry.mark_dead();
                return;
            }
        }
        if !entry.is_alive() {
            // The new generation was already retired and its Remove task
            // was applied before this one arrived; drop the whole node.
            self.unlink_and_free(idx);
            entry.mark_dead();
            return;
        }
        let weight = entry.weight;
        let old = self.nodes[idx]
            .entry
            .replace(entry)
            .expect("repointing a sentinel or empty node");
        self.total_weight = self.total_weight - old.weight + weight;
        old.mark_dead();
        self.acc_unlink(idx);
        self.acc_link_after_head(idx);
        if self.track_write_order() {
            self.wr_unlink(idx);
            self.wr_link_after_head(idx);
        }
    }

    /// Applies a `Remove` or `Expire` task.
    ///
    /// Generation-checked: a task for an older generation of the key must
    /// not unlink its successor.
    pub(crate) fn on_remove(&mut self, entry: &Arc<EntryRecord<K, V>>) {
        if let Some(&idx) = self.map.get(&entry.key) {
            let tracked = self.nodes[idx]
                .entry
                .as_ref()
                .expect("tracked node without a record");
            if tracked.generation == entry.generation {
                self.unlink_and_free(idx);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Sweep: expiration, then capacity
    // -----------------------------------------------------------------------

    /// Runs expiration and size eviction after all buffered events have
    /// been applied.  Retired victims are appended to `out`; the caller
    /// removes them from the index and dispatches notifications.
    pub(crate) fn sweep(&mut self, now: u64, out: &mut Vec<Removal<K, V>>) {
        self.expire_by_access(now, out);
        self.expire_by_write(now, out);
        self.evict_over_weight(out);
    }

    fn expire_by_access(&mut self, now: u64, out: &mut Vec<Removal<K, V>>) {
        let Some(tti) = self.tti else { return };
        loop {
            let idx = self.nodes[TAIL].acc_prev;
            if idx == HEAD {
                break;
            }
            let entry = self.nodes[idx].entry.as_ref().expect("linked node without a record");
            if now.saturating_sub(entry.access_time()) < tti {
                // The list is recency-sorted: the first fresh record ends
                // the scan.
                break;
            }
            let won = entry.retire();
            let entry = self.unlink_and_free(idx);
            if won {
                out.push(Removal {
                    entry,
                    cause: RemovalCause::Expired,
                });
            }
        }
    }

    fn expire_by_write(&mut self, now: u64, out: &mut Vec<Removal<K, V>>) {
        let Some(ttl) = self.ttl else { return };
        loop {
            let idx = self.nodes[TAIL].wr_prev;
            if idx == HEAD {
                break;
            }
            let entry = self.nodes[idx].entry.as_ref().expect("linked node without a record");
            if now.saturating_sub(entry.write_time) < ttl {
                break;
            }
            let won = entry.retire();
            let entry = self.unlink_and_free(idx);
            if won {
                out.push(Removal {
                    entry,
                    cause: RemovalCause::Expired,
                });
            }
        }
    }

    fn evict_over_weight(&mut self, out: &mut Vec<Removal<K, V>>) {
        while self.total_weight > self.max_weight {
            // Walk up from the LRU end, skipping weight-0 (exempt) records.
            let mut idx = self.nodes[TAIL].acc_prev;
            while idx != HEAD {
                let entry = self.nodes[idx].entry.as_ref().expect("linked node without a record");
                if entry.weight > 0 {
                    break;
                }
                idx = self.nodes[idx].acc_prev;
            }
            if idx == HEAD {
                break; // only exempt records remain
            }
            let won = self.nodes[idx]
                .entry
                .as_ref()
                .expect("linked node without a record")
                .retire();
            let entry = self.unlink_and_free(idx);
            if won {
                out.push(Removal {
                    entry,
                    cause: RemovalCause::Size,
                });
            }
        }
    }

    // -----------------------------------------------------------------------
    // Introspection & reset
    // -----------------------------------------------------------------------

    /// Total weight currently tracked.
    pub(crate) fn current_weight(&self) -> u64 {
        self.total_weight
    }

    /// Number of records currently tracked.
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.map.len()
    }

    /// Drops all tracking state.  Used by `invalidate_all`, which retires
    /// and notifies the records itself.
    pub(crate) fn clear(&mut self) {
        for node in self.nodes.drain(2..) {
            if let Some(entry) = node.entry {
                entry.mark_dead();
            }
        }
        self.nodes[HEAD].acc_next = TAIL;
        self.nodes[HEAD].wr_next = TAIL;
        self.nodes[TAIL].acc_prev = HEAD;
        self.nodes[TAIL].wr_prev = HEAD;
        self.map.clear();
        self.free_list.clear();
        self.total_weight = 0;
    }
}
