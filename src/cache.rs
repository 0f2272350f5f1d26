//! The cache engine: fast paths, buffers, and the maintenance drain.
//!
//! ## Data flow
//!
//! Reads look the record up in the sharded index, validate freshness
//! inline, record a read event in a per-stripe lossy ring, and return.
//! Writes mutate the index under a shard lock, enqueue a write task in the
//! lossless write buffer, and attempt a drain.  The drain — serialized by
//! the maintenance lock — replays read events (recency), applies write
//! tasks in FIFO order (list membership + weight), then sweeps expired and
//! over-weight records and dispatches their removal notifications.
//!
//! No user code (listener, loader) ever runs while the policy mutex is
//! held; notifications and refresh reloads go through the configured
//! executor after policy mutation completes.

use std::hash::Hash;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use ahash::{AHashMap, AHashSet};
use parking_lot::Mutex;

use crate::buffer::read::StripedReadBuffer;
use crate::buffer::write::{WriteBuffer, WriteTask};
use crate::builder::CacheBuilder;
use crate::error::LoadError;
use crate::exec::Executor;
use crate::listener::{RemovalCause, RemovalListener};
use crate::loader::CacheLoader;
use crate::loading::{InFlight, Joined, LeaderGuard};
use crate::metrics::stats::{CacheStats, StatsCounter};
use crate::policy::lru::{LruPolicy, Removal};
use crate::store::entry::EntryRecord;
use crate::store::sharded::ShardedStore;
use crate::time::Ticker;
use crate::weigher::Weigher;

// ---------------------------------------------------------------------------
// Expiry configuration
// ---------------------------------------------------------------------------

/// Fixed expiry schedules, in nanoseconds.  Both may be active at once;
/// either alone expires a record.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct ExpiryConfig {
    /// Expire `ttl` after the entry was written (or replaced).
    pub(crate) ttl: Option<u64>,
    /// Expire `tti` after the entry was last accessed.
    pub(crate) tti: Option<u64>,
}

impl ExpiryConfig {
    #[inline]
    pub(crate) fn is_expired<K, V>(&self, entry: &EntryRecord<K, V>, now: u64) -> bool {
        entry.is_expired(self.ttl, self.tti, now)
    }
}

// ---------------------------------------------------------------------------
// Maintenance status
// ---------------------------------------------------------------------------

/// No drain is scheduled.
const IDLE: u8 = 0;
/// Buffered work exists; a drain must run.
const REQUIRED: u8 = 1;
/// A drain is in progress.
const PROCESSING: u8 = 2;

// ---------------------------------------------------------------------------
// Cache interior
// ---------------------------------------------------------------------------

/// Everything the builder hands to [`Cache::new`].
pub(crate) struct Config<K, V> {
    pub(crate) max_weight: u64,
    pub(crate) num_shards: usize,
    pub(crate) initial_capacity: usize,
    pub(crate) weigher: Box<dyn Weigher<K, V>>,
    pub(crate) expiry: ExpiryConfig,
    pub(crate) refresh_after_write: Option<u64>,
    pub(crate) loader: Option<Arc<dyn CacheLoader<K, V>>>,
    pub(crate) listener: Option<Arc<dyn RemovalListener<K, V>>>,
    pub(crate) record_stats: bool,
    pub(crate) ticker: Arc<dyn Ticker>,
    pub(crate) executor: Executor,
}

/// Shared interior of a [`Cache`].
struct Inner<K, V> {
    store: ShardedStore<K, V>,
    policy: Mutex<LruPolicy<K, V>>,
    weigher: Box<dyn Weigher<K, V>>,
    expiry: ExpiryConfig,
    refresh_after_write: Option<u64>,
    loader: Option<Arc<dyn CacheLoader<K, V>>>,
    /// Optional removal listener.  `None` if the user didn't register one.
    listener: Option<Arc<dyn RemovalListener<K, V>>>,
    read_buf: StripedReadBuffer<K, V>,
    write_buf: WriteBuffer<K, V>,
    maintenance_lock: Mutex<()>,
    drain_status: AtomicU8,
    /// Source of record generation numbers; monotonic across the cache.
    generation: AtomicU64,
    inflight: InFlight<K, V>,
    ticker: Arc<dyn Ticker>,
    executor: Executor,
    stats: StatsCounter,
}

// ---------------------------------------------------------------------------
// Cache handle
// ---------------------------------------------------------------------------

/// A concurrent in-memory cache bounded by weighted LRU eviction, with
/// optional time-based expiry, refresh, and single-flight loading.
///
/// # Example
/// ```
/// let cache: cortado::Cache<String, String> = cortado::CacheBuilder::new(100).build();
/// cache.insert("hello".to_string(), "world".to_string());
/// assert_eq!(
///     cache.get(&"hello".to_string()),
///     Some(std::sync::Arc::new("world".to_string()))
/// );
/// ```
pub struct Cache<K, V> {
    inner: Arc<Inner<K, V>>,
}

impl<K, V> Clone for Cache<K, V> {
    /// Makes a clone of this shared cache.
    ///
    /// Cheap: only bumps the reference count on the shared interior.
    fn clone(&self) -> Self {
        Cache {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> std::fmt::Debug for Cache<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("entries", &self.entry_count())
            .field("weighted_size", &self.weighted_size())
            .finish_non_exhaustive()
    }
}

impl<K, V> Cache<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    pub(crate) fn new(config: Config<K, V>) -> Self {
        Cache {
            inner: Arc::new(Inner {
                store: ShardedStore::new(config.num_shards, config.initial_capacity),
                policy: Mutex::new(LruPolicy::new(
                    config.max_weight,
                    config.expiry.ttl,
                    config.expiry.tti,
                )),
                weigher: config.weigher,
                expiry: config.expiry,
                refresh_after_write: config.refresh_after_write,
                loader: config.loader,
                listener: config.listener,
                read_buf: StripedReadBuffer::new(),
                write_buf: WriteBuffer::new(),
                maintenance_lock: Mutex::new(()),
                drain_status: AtomicU8::new(IDLE),
                generation: AtomicU64::new(1),
                inflight: InFlight::new(),
                ticker: config.ticker,
                executor: config.executor,
                stats: StatsCounter::new(config.record_stats),
            }),
        }
    }

    /// Returns a [`CacheBuilder`] for constructing a new cache.
    pub fn builder(max_capacity: u64) -> CacheBuilder<K, V> {
        CacheBuilder::new(max_capacity)
    }

    // -----------------------------------------------------------------------
    // Time & record helpers
    // -----------------------------------------------------------------------

    #[inline]
    fn now(&self) -> u64 {
        self.inner.ticker.now_nanos()
    }

    #[inline]
    fn next_generation(&self) -> u64 {
        self.inner.generation.fetch_add(1, Ordering::Relaxed)
    }

    fn new_entry(&self, key: K, value: Arc<V>, now: u64) -> Arc<EntryRecord<K, V>> {
        let weight = self.inner.weigher.weigh(&key, value.as_ref());
        Arc::new(EntryRecord::new(
            key,
            value,
            weight,
            self.next_generation(),
            now,
        ))
    }

    // -----------------------------------------------------------------------
    // Hot-path: get
    // -----------------------------------------------------------------------

    /// Returns the value for `key` if it is present and not expired.
    ///
    /// Records a hit or a miss, promotes the entry's recency, and — when
    /// `refresh_after_write` is configured — triggers at most one
    /// asynchronous reload for a stale entry while returning the stale
    /// value immediately.
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        let now = self.now();
        let Some(entry) = self.inner.store.get(key) else {
            self.inner.stats.record_miss();
            return None;
        };
        if !entry.is_alive() {
            self.inner.stats.record_miss();
            return None;
        }
        if self.inner.expiry.is_expired(&entry, now) {
            self.expire_inline(key, entry);
            self.inner.stats.record_miss();
            return None;
        }

        self.inner.stats.record_hit();
        let value = Arc::clone(&entry.value);
        entry.touch(now);
        self.maybe_refresh(&entry, now);

        if !self.inner.read_buf.offer(entry) {
            // The stripe is full: the event is dropped (recency is an
            // approximation) but a drain is due.
            self.schedule_drain();
        }
        Some(value)
    }

    /// Removes a record the fast path found expired.  The status CAS picks
    /// the one actor that fires the notification.
    fn expire_inline(&self, key: &K, entry: Arc<EntryRecord<K, V>>) {
        if entry.retire() {
            self.inner.store.remove_if(key, entry.generation);
            self.inner.stats.record_eviction(1);
            self.notify_removal(&entry, RemovalCause::Expired);
            self.after_write(WriteTask::Expire { entry });
        }
    }

    // -----------------------------------------------------------------------
    // Hot-path: insert & friends
    // -----------------------------------------------------------------------

    /// Inserts `value` for `key`.  If the key already exists the value is
    /// replaced and the displaced entry is reported to the removal listener
    /// with cause [`RemovalCause::Replaced`].
    pub fn insert(&self, key: K, value: V) {
        self.do_insert(key, Arc::new(value));
    }

    fn do_insert(&self, key: K, value: Arc<V>) -> Arc<V> {
        let now = self.now();
        let entry = self.new_entry(key, value, now);
        let installed = Arc::clone(&entry.value);
        match self.inner.store.insert(Arc::clone(&entry)) {
            Some(old) => {
                if old.retire() {
                    // An entry overwritten after its deadline passed counts
                    // as an expiry, not a replacement.
                    if self.inner.expiry.is_expired(&old, now) {
                        self.inner.stats.record_eviction(1);
                        self.notify_removal(&old, RemovalCause::Expired);
                    } else {
                        self.notify_removal(&old, RemovalCause::Replaced);
                    }
                }
                self.after_write(WriteTask::Update { entry });
            }
            None => self.after_write(WriteTask::Add { entry }),
        }
        installed
    }

    /// Inserts `value` only if `key` has no live mapping.  Returns the
    /// current value otherwise.
    pub fn insert_if_absent(&self, key: K, value: V) -> Option<Arc<V>> {
        let value = Arc::new(value);
        loop {
            let now = self.now();
            let entry = self.new_entry(key.clone(), Arc::clone(&value), now);
            match self.inner.store.insert_if_absent(Arc::clone(&entry)) {
                None => {
                    self.after_write(WriteTask::Add { entry });
                    return None;
                }
                Some(existing) => {
                    if existing.is_alive() && !self.inner.expiry.is_expired(&existing, now) {
                        return Some(Arc::clone(&existing.value));
                    }
                    // The occupant is expired or mid-removal; clear the
                    // slot and retry.
                    if existing.retire() {
                        self.inner.store.remove_if(&key, existing.generation);
                        self.inner.stats.record_eviction(1);
                        self.notify_removal(&existing, RemovalCause::Expired);
                        self.after_write(WriteTask::Expire { entry: existing });
                    } else {
                        self.inner.store.remove_if(&key, existing.generation);
                    }
                }
            }
        }
    }

    /// Replaces the value for `key` only if a live mapping exists.
    /// Returns the previous value on success.
    pub fn replace(&self, key: &K, value: V) -> Option<Arc<V>> {
        let value = Arc::new(value);
        loop {
            let now = self.now();
            let current = self.inner.store.get(key)?;
            if !current.is_alive() {
                return None;
            }
            if self.inner.expiry.is_expired(&current, now) {
                self.expire_inline(key, current);
                return None;
            }
            let entry = self.new_entry(key.clone(), Arc::clone(&value), now);
            if self
                .inner
                .store
                .replace_if(key, current.generation, Arc::clone(&entry))
            {
                if current.retire() {
                    self.notify_removal(&current, RemovalCause::Replaced);
                }
                self.after_write(WriteTask::Update { entry });
                return Some(Arc::clone(&current.value));
            }
            // Lost a race with another writer; retry against the new state.
        }
    }

    /// Replaces the value for `key` only if the current value equals
    /// `expected`.  Returns `true` on success.
    pub fn replace_if(&self, key: &K, expected: &V, value: V) -> bool
    where
        V: PartialEq,
    {
        let value = Arc::new(value);
        loop {
            let now = self.now();
            let Some(current) = self.inner.store.get(key) else {
                return false;
            };
            if !current.is_alive() {
                return false;
            }
            if self.inner.expiry.is_expired(&current, now) {
                self.expire_inline(key, current);
                return false;
            }
            if *current.value != *expected {
                return false;
            }
            let entry = self.new_entry(key.clone(), Arc::clone(&value), now);
            if self
                .inner
                .store
                .replace_if(key, current.generation, Arc::clone(&entry))
            {
                if current.retire() {
                    self.notify_removal(&current, RemovalCause::Replaced);
                }
                self.after_write(WriteTask::Update { entry });
                return true;
            }
        }
    }

    // -----------------------------------------------------------------------
    // Invalidation
    // -----------------------------------------------------------------------

    /// Removes the entry for `key`, if present.  Fires
    /// [`RemovalCause::Explicit`].
    pub fn invalidate(&self, key: &K) {
        if let Some(old) = self.inner.store.remove(key) {
            if old.retire() {
                self.notify_removal(&old, RemovalCause::Explicit);
                self.after_write(WriteTask::Remove { entry: old });
            }
        }
    }

    /// Removes the entries for all of `keys`.
    pub fn invalidate_all_keys<'a, I>(&self, keys: I)
    where
        I: IntoIterator<Item = &'a K>,
        K: 'a,
    {
        for key in keys {
            self.invalidate(key);
        }
    }

    /// Removes every entry.  Each removed entry fires
    /// [`RemovalCause::Explicit`].
    pub fn invalidate_all(&self) {
        let mut removed = Vec::new();
        {
            let _guard = self.inner.maintenance_lock.lock();
            // Apply the backlog first so the policy agrees with the store.
            self.run_maintenance();
            // Retire before the policy reset: clear() finalizes retired
            // records, and only retire winners may notify.
            for entry in self.inner.store.drain_entries() {
                if entry.retire() {
                    removed.push(entry);
                }
            }
            self.inner.policy.lock().clear();
        }
        for entry in removed {
            self.notify_removal(&entry, RemovalCause::Explicit);
        }
    }

    // -----------------------------------------------------------------------
    // Single-flight loading
    // -----------------------------------------------------------------------

    /// Returns the value for `key`, computing and caching it with `init`
    /// if absent.
    ///
    /// For any number of concurrent callers of the `get_with` family on the
    /// same key, the initializer runs **at most once**; every other caller
    /// blocks until it completes and observes the same outcome.
    ///
    /// # Example
    /// ```
    /// let cache: cortado::Cache<u64, u64> = cortado::CacheBuilder::new(10).build();
    /// let v = cache.get_with(&7, || 49);
    /// assert_eq!(*v, 49);
    /// // Present now; the initializer is not run again.
    /// let v = cache.get_with(&7, || unreachable!());
    /// assert_eq!(*v, 49);
    /// ```
    pub fn get_with(&self, key: &K, init: impl FnOnce() -> V) -> Arc<V> {
        let mut init = Some(init);
        loop {
            let f = || -> Result<Option<V>, LoadError> {
                let init = init.take().expect("initializer consumed twice");
                Ok(Some(init()))
            };
            match self.do_get_with(key, f) {
                Ok(Some(value)) => return value,
                // A concurrent optionally_/try_ cohort produced nothing for
                // this key; load it ourselves on the next pass.
                Ok(None) | Err(_) => continue,
            }
        }
    }

    /// Like [`get_with`](Self::get_with), but the initializer may decline
    /// to produce a value.  Nothing is stored on `None`.
    pub fn optionally_get_with(
        &self,
        key: &K,
        init: impl FnOnce() -> Option<V>,
    ) -> Option<Arc<V>> {
        let mut init = Some(init);
        loop {
            let f = || -> Result<Option<V>, LoadError> {
                let init = init.take().expect("initializer consumed twice");
                Ok(init())
            };
            match self.do_get_with(key, f) {
                Ok(value) => return value,
                Err(_) => continue,
            }
        }
    }

    /// Like [`get_with`](Self::get_with), but the initializer may fail.
    ///
    /// The error is propagated to the caller (and to every caller waiting
    /// on the same in-flight load); nothing is stored.
    pub fn try_get_with<E>(
        &self,
        key: &K,
        init: impl FnOnce() -> Result<V, E>,
    ) -> Result<Arc<V>, LoadError>
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        let mut init = Some(init);
        loop {
            let f = || -> Result<Option<V>, LoadError> {
                let init = init.take().expect("initializer consumed twice");
                match init() {
                    Ok(value) => Ok(Some(value)),
                    Err(err) => Err(LoadError::new(Box::new(err))),
                }
            };
            match self.do_get_with(key, f) {
                Ok(Some(value)) => return Ok(value),
                Ok(None) => continue,
                Err(err) => return Err(err),
            }
        }
    }

    fn do_get_with<F>(&self, key: &K, init: F) -> Result<Option<Arc<V>>, LoadError>
    where
        F: FnOnce() -> Result<Option<V>, LoadError>,
    {
        let mut init = Some(init);
        loop {
            if let Some(value) = self.get(key) {
                return Ok(Some(value));
            }
            match self.inner.inflight.join(key) {
                Joined::Leader => {
                    let guard = LeaderGuard::new(&self.inner.inflight, key);
                    let init = init.take().expect("leader role claimed twice");
                    let started = self.now();
                    let result = init();
                    let elapsed = self.now().saturating_sub(started);
                    let outcome = match result {
                        Ok(Some(value)) => {
                            self.inner.stats.record_load_success(elapsed);
                            Ok(Some(self.do_insert(key.clone(), Arc::new(value))))
                        }
                        Ok(None) => {
                            self.inner.stats.record_load_failure(elapsed);
                            Ok(None)
                        }
                        Err(err) => {
                            self.inner.stats.record_load_failure(elapsed);
                            Err(err)
                        }
                    };
                    guard.complete(outcome.clone());
                    return outcome;
                }
                Joined::Follower(waiter) => match waiter.wait() {
                    Some(outcome) => return outcome,
                    // The leader was torn down without completing; retry.
                    None => continue,
                },
            }
        }
    }

    /// Returns the values for `keys`, loading the missing ones with a
    /// single [`CacheLoader::load_all`] bulk call.
    ///
    /// Duplicate keys are deduplicated by equality and the result preserves
    /// the input iteration order.  Only requested keys are installed;
    /// requested keys the loader does not produce are counted as load
    /// failures and omitted from the returned vector.
    pub fn get_all<L, I>(&self, keys: I, loader: &L) -> Result<Vec<(K, Arc<V>)>, LoadError>
    where
        L: CacheLoader<K, V>,
        I: IntoIterator<Item = K>,
    {
        let mut ordered: Vec<K> = Vec::new();
        let mut seen: AHashSet<K> = AHashSet::new();
        let mut found: AHashMap<K, Arc<V>> = AHashMap::new();
        let mut missing: Vec<K> = Vec::new();

        for key in keys {
            if !seen.insert(key.clone()) {
                continue;
            }
            match self.get(&key) {
                Some(value) => {
                    found.insert(key.clone(), value);
                }
                None => missing.push(key.clone()),
            }
            ordered.push(key);
        }

        if !missing.is_empty() {
            // Requested keys, drained as the loader produces them; whatever
            // is left over failed to load.
            let mut unresolved: AHashSet<K> = missing.iter().cloned().collect();
            let started = self.now();
            match loader.load_all(missing) {
                Ok(loaded) => {
                    self.inner
                        .stats
                        .record_load_success(self.now().saturating_sub(started));
                    for (key, value) in loaded {
                        if !unresolved.remove(&key) {
                            continue; // extraneous and duplicate keys are not installed
                        }
                        let value = self.do_insert(key.clone(), Arc::new(value));
                        found.insert(key, value);
                    }
                    // The bulk call's elapsed time is already accounted
                    // above; each unproduced key is a load failure.
                    for _ in 0..unresolved.len() {
                        self.inner.stats.record_load_failure(0);
                    }
                }
                Err(err) => {
                    self.inner
                        .stats
                        .record_load_failure(self.now().saturating_sub(started));
                    return Err(LoadError::new(err));
                }
            }
        }

        Ok(ordered
            .into_iter()
            .filter_map(|key| {
                let value = found.remove(&key)?;
                Some((key, value))
            })
            .collect())
    }

    /// Returns the present, unexpired values for `keys`, preserving the
    /// input iteration order.  Duplicate keys are deduplicated by equality.
    pub fn get_all_present<I>(&self, keys: I) -> Vec<(K, Arc<V>)>
    where
        I: IntoIterator<Item = K>,
    {
        let mut seen: AHashSet<K> = AHashSet::new();
        let mut out = Vec::new();
        for key in keys {
            if !seen.insert(key.clone()) {
                continue;
            }
            if let Some(value) = self.get(&key) {
                out.push((key, value));
            }
        }
        out
    }

    // -----------------------------------------------------------------------
    // Refresh
    // -----------------------------------------------------------------------

    fn maybe_refresh(&self, entry: &Arc<EntryRecord<K, V>>, now: u64) {
        let Some(refresh_ns) = self.inner.refresh_after_write else {
            return;
        };
        if now.saturating_sub(entry.write_time) < refresh_ns {
            return;
        }
        if !entry.try_begin_refresh() {
            return; // a reload for this record is already outstanding
        }
        let cache = self.clone();
        let stale = Arc::clone(entry);
        self.inner
            .executor
            .execute(Box::new(move || cache.run_reload(stale)));
    }

    /// Runs `loader.reload` for a stale record.  Success installs the new
    /// value if the mapping is unchanged; `Ok(None)` removes the entry;
    /// errors are logged and swallowed, leaving the stale value in place.
    fn run_reload(&self, stale: Arc<EntryRecord<K, V>>) {
        let Some(loader) = self.inner.loader.as_ref().map(Arc::clone) else {
            stale.end_refresh();
            return;
        };
        let started = self.now();
        let result = loader.reload(&stale.key, Arc::clone(&stale.value));
        let elapsed = self.now().saturating_sub(started);
        match result {
            Ok(Some(value)) => {
                self.inner.stats.record_load_success(elapsed);
                let now = self.now();
                let entry = self.new_entry(stale.key.clone(), Arc::new(value), now);
                if self
                    .inner
                    .store
                    .replace_if(&stale.key, stale.generation, Arc::clone(&entry))
                {
                    if stale.retire() {
                        self.notify_removal(&stale, RemovalCause::Replaced);
                    }
                    self.after_write(WriteTask::Update { entry });
                } else {
                    // The mapping changed while reloading; drop the result.
                    stale.end_refresh();
                }
            }
            Ok(None) => {
                self.inner.stats.record_load_failure(elapsed);
                if let Some(removed) = self.inner.store.remove_if(&stale.key, stale.generation) {
                    if removed.retire() {
                        self.notify_removal(&removed, RemovalCause::Explicit);
                        self.after_write(WriteTask::Remove { entry: removed });
                    }
                }
                stale.end_refresh();
            }
            Err(err) => {
                self.inner.stats.record_load_failure(elapsed);
                log::warn!("refresh reload failed; keeping stale value: {err}");
                stale.end_refresh();
            }
        }
    }

    // -----------------------------------------------------------------------
    // Maintenance
    // -----------------------------------------------------------------------

    fn after_write(&self, task: WriteTask<K, V>) {
        match self.inner.write_buf.push(task) {
            Ok(()) => {
                self.inner.drain_status.store(REQUIRED, Ordering::Release);
                self.try_maintain();
            }
            Err(task) => {
                // The queue is full.  Write tasks are lossless: apply the
                // backlog plus this task synchronously.
                let _guard = self.inner.maintenance_lock.lock();
                self.inner.drain_status.store(PROCESSING, Ordering::Release);
                self.drain_buffers(Some(task));
                let _ = self.inner.drain_status.compare_exchange(
                    PROCESSING,
                    IDLE,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
            }
        }
    }

    fn schedule_drain(&self) {
        self.inner.drain_status.store(REQUIRED, Ordering::Release);
        self.try_maintain();
    }

    fn try_maintain(&self) {
        let Some(_guard) = self.inner.maintenance_lock.try_lock() else {
            // The current holder observes the Required status after its own
            // drain and loops; nothing is stranded.
            return;
        };
        self.run_maintenance();
    }

    /// Runs drains until no new work was recorded mid-drain.  Caller must
    /// hold the maintenance lock.
    fn run_maintenance(&self) {
        loop {
            self.inner.drain_status.store(PROCESSING, Ordering::Release);
            self.drain_buffers(None);
            if self
                .inner
                .drain_status
                .compare_exchange(PROCESSING, IDLE, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                break;
            }
            // Another thread recorded work while we were draining.
        }
    }

    /// One drain pass: read events, then write tasks (FIFO), then the
    /// expiry and capacity sweep, then the deferred removals.
    fn drain_buffers(&self, extra: Option<WriteTask<K, V>>) {
        let mut reads = Vec::new();
        let mut writes = Vec::new();
        self.inner.read_buf.drain(&mut reads);
        self.inner.write_buf.drain(&mut writes);
        if let Some(task) = extra {
            writes.push(task);
        }

        let now = self.now();
        let mut removals: Vec<Removal<K, V>> = Vec::new();
        {
            let mut policy = self.inner.policy.lock();
            for entry in &reads {
                policy.on_access(entry);
            }
            for task in writes {
                match task {
                    WriteTask::Add { entry } => policy.on_add(entry),
                    WriteTask::Update { entry } => policy.on_update(entry),
                    WriteTask::Remove { entry } | WriteTask::Expire { entry } => {
                        policy.on_remove(&entry)
                    }
                }
            }
            policy.sweep(now, &mut removals);
        }

        // Outside the policy lock: finish the index removal and notify.
        for Removal { entry, cause } in removals {
            self.inner.store.remove_if(&entry.key, entry.generation);
            self.inner.stats.record_eviction(1);
            self.notify_removal(&entry, cause);
        }
    }

    /// Forces a drain: applies all buffered events, expires what is due,
    /// and evicts down to capacity before returning.
    pub fn clean_up(&self) {
        let _guard = self.inner.maintenance_lock.lock();
        self.run_maintenance();
    }

    fn notify_removal(&self, entry: &Arc<EntryRecord<K, V>>, cause: RemovalCause) {
        let Some(listener) = &self.inner.listener else {
            return;
        };
        let listener = Arc::clone(listener);
        let key = entry.key.clone();
        let value = Arc::clone(&entry.value);
        self.inner.executor.execute(Box::new(move || {
            let outcome = catch_unwind(AssertUnwindSafe(|| listener.on_removal(&key, value, cause)));
            if outcome.is_err() {
                log::warn!("removal listener panicked; notification discarded");
            }
        }));
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    /// Returns `true` if `key` has a live, unexpired mapping.  Does not
    /// update recency or statistics.
    pub fn contains_key(&self, key: &K) -> bool {
        let now = self.now();
        match self.inner.store.get(key) {
            Some(entry) => entry.is_alive() && !self.inner.expiry.is_expired(&entry, now),
            None => false,
        }
    }

    /// Approximate number of entries.  May transiently include records
    /// whose removal has not been drained yet.
    pub fn entry_count(&self) -> usize {
        self.inner.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.store.is_empty()
    }

    /// Total weight currently tracked by the policy.  Like
    /// [`entry_count`](Self::entry_count), this is approximate between
    /// drains.
    pub fn weighted_size(&self) -> u64 {
        self.inner.policy.lock().current_weight()
    }

    /// Returns a point-in-time snapshot of the statistics counters.
    pub fn stats(&self) -> CacheStats {
        self.inner.stats.snapshot()
    }

    /// Returns a weakly consistent iterator over the live entries.
    ///
    /// The iterator snapshots one shard at a time, so it may observe any
    /// subset of the mutations that run concurrently with the iteration;
    /// it never blocks writers for long and never panics because of them.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            cache: self,
            shard_idx: 0,
            pending: Vec::new().into_iter(),
        }
    }
}

// ---------------------------------------------------------------------------
// Iteration
// ---------------------------------------------------------------------------

/// Weakly consistent iterator over `(key, value)` pairs.
///
/// Created by [`Cache::iter`].
pub struct Iter<'a, K, V> {
    cache: &'a Cache<K, V>,
    shard_idx: usize,
    pending: std::vec::IntoIter<(K, Arc<V>)>,
}

impl<K, V> Iterator for Iter<'_, K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    type Item = (K, Arc<V>);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.pending.next() {
                return Some(item);
            }
            if self.shard_idx >= self.cache.inner.store.shard_count() {
                return None;
            }
            let now = self.cache.now();
            let snapshot: Vec<(K, Arc<V>)> = self
                .cache
                .inner
                .store
                .shard_entries(self.shard_idx)
                .into_iter()
                .filter(|entry| {
                    entry.is_alive() && !self.cache.inner.expiry.is_expired(entry, now)
                })
                .map(|entry| (entry.key.clone(), Arc::clone(&entry.value)))
                .collect();
            self.shard_idx += 1;
            self.pending = snapshot.into_iter();
        }
    }
}
