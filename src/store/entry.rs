//! Per-entry record shared between the index, the buffers, and the policy.
//!
//! A record is created on insert (or load completion) and is immutable
//! except for three fields: `access_time` (touched on every read),
//! `status`, and the `refreshing` flag.  Replacing a key's value installs a
//! **new** record with a fresh generation number; the generation is what
//! makes compare-and-remove on the index exact, so a policy decision made
//! against an old record can never remove its successor.
//!
//! ## Status lifecycle
//!
//! ```text
//!   Alive ──(retire: CAS, one winner)──► Retired ──(maintenance)──► Dead
//! ```
//!
//! The `Alive → Retired` transition is a single compare-and-swap and is the
//! deduplication point for removal notifications: whichever actor wins the
//! CAS (an evicting drain, an explicit invalidation, a replacement, or an
//! inline expiry check) owns the one notification for this record.
//! `Retired` records are no longer visible to readers but may still be
//! linked into policy lists until the next drain unlinks them and marks
//! them `Dead`.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

/// Visible to queries.
const ALIVE: u8 = 0;
/// Logically removed; may still be linked into policy lists.
const RETIRED: u8 = 1;
/// Unlinked from everything.
const DEAD: u8 = 2;

pub(crate) struct EntryRecord<K, V> {
    pub(crate) key: K,
    pub(crate) value: Arc<V>,
    /// Cost assigned by the weigher at insertion time.  0 = exempt from
    /// size-based eviction.
    pub(crate) weight: u64,
    /// Monotonically increasing across all records of a cache; identifies
    /// this generation of the mapping for compare-and-remove.
    pub(crate) generation: u64,
    /// Ticker time of the insert/replace that created this record.
    pub(crate) write_time: u64,
    access_time: AtomicU64,
    status: AtomicU8,
    refreshing: AtomicBool,
}

impl<K, V> EntryRecord<K, V> {
    pub(crate) fn new(key: K, value: Arc<V>, weight: u64, generation: u64, now: u64) -> Self {
        EntryRecord {
            key,
            value,
            weight,
            generation,
            write_time: now,
            access_time: AtomicU64::new(now),
            status: AtomicU8::new(ALIVE),
            refreshing: AtomicBool::new(false),
        }
    }

    #[inline]
    pub(crate) fn access_time(&self) -> u64 {
        self.access_time.load(Ordering::Relaxed)
    }

    /// Records a read at `now`.  Relaxed: ordering between events is
    /// established by the write buffer, not by timestamps.
    #[inline]
    pub(crate) fn touch(&self, now: u64) {
        self.access_time.store(now, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn is_alive(&self) -> bool {
        self.status.load(Ordering::Acquire) == ALIVE
    }

    /// Attempts the `Alive → Retired` transition.
    ///
    /// Returns `true` for exactly one caller per record; the winner owns
    /// the removal notification.
    #[inline]
    pub(crate) fn retire(&self) -> bool {
        self.status
            .compare_exchange(ALIVE, RETIRED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Finalizes a retired record once it is unlinked from every policy
    /// structure.
    ///
    /// Only the `Retired → Dead` step is taken; a record whose remover has
    /// not yet won the retire CAS keeps its status so that exactly one
    /// notification still fires.
    #[inline]
    pub(crate) fn mark_dead(&self) {
        let _ = self
            .status
            .compare_exchange(RETIRED, DEAD, Ordering::AcqRel, Ordering::Acquire);
    }

    /// Returns `true` if either configured deadline has passed.
    ///
    /// `ttl`/`tti` are nanosecond durations; both schedules may be active
    /// at once and either alone expires the record.
    #[inline]
    pub(crate) fn is_expired(&self, ttl: Option<u64>, tti: Option<u64>, now: u64) -> bool {
        if let Some(ttl) = ttl {
            if now.saturating_sub(self.write_time) >= ttl {
                return true;
            }
        }
        if let Some(tti) = tti {
            if now.saturating_sub(self.access_time()) >= tti {
                return true;
            }
        }
        false
    }

    /// Claims the refresh slot for this record.  At most one outstanding
    /// refresh per record.
    #[inline]
    pub(crate) fn try_begin_refresh(&self) -> bool {
        self.refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Releases the refresh slot after a failed or discarded reload.
    #[inline]
    pub(crate) fn end_refresh(&self) {
        self.refreshing.store(false, Ordering::Release);
    }
}
