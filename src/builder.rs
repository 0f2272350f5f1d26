use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{Cache, Config, ExpiryConfig};
use crate::error::ConfigError;
use crate::exec::Executor;
use crate::listener::{FnListener, RemovalCause, RemovalListener};
use crate::loader::CacheLoader;
use crate::time::{SystemTicker, Ticker};
use crate::weigher::{FnWeigher, UnitWeigher, Weigher};

/// Builder for configuring and constructing a [`Cache`].
///
/// Misuse of a single option (a non-power-of-two shard count, a zero
/// refresh interval) panics in the offending setter; invalid *combinations*
/// are reported by [`try_build`](Self::try_build).
///
/// # Example
/// ```
/// use cortado::CacheBuilder;
/// use std::time::Duration;
///
/// let cache: cortado::Cache<String, String> = CacheBuilder::new(1_000)
///     .expire_after_write(Duration::from_secs(60))
///     .build();
/// # let _ = cache;
/// ```
pub struct CacheBuilder<K, V> {
    max_capacity: u64,
    num_shards: usize,
    initial_capacity: usize,
    weigher: Box<dyn Weigher<K, V>>,
    expire_after_write: Option<Duration>,
    expire_after_access: Option<Duration>,
    refresh_after_write: Option<Duration>,
    loader: Option<Arc<dyn CacheLoader<K, V>>>,
    listener: Option<Arc<dyn RemovalListener<K, V>>>,
    record_stats: bool,
    ticker: Option<Arc<dyn Ticker>>,
    executor: Executor,
}

impl<K: 'static, V: 'static> CacheBuilder<K, V> {
    /// Starts a builder for a cache bounded by `max_capacity` total weight.
    ///
    /// With the default unit weigher this is simply the maximum number of
    /// entries.  A capacity of 0 is permitted and evicts every insertion on
    /// the next drain.
    pub fn new(max_capacity: u64) -> Self {
        CacheBuilder {
            max_capacity,
            num_shards: 64,
            initial_capacity: 0,
            weigher: Box::new(UnitWeigher),
            expire_after_write: None,
            expire_after_access: None,
            refresh_after_write: None,
            loader: None,
            listener: None,
            record_stats: false,
            ticker: None,
            executor: Executor::default(),
        }
    }

    /// Set the number of internal shards (must be a power of two; default: 64).
    pub fn num_shards(mut self, n: usize) -> Self {
        assert!(n > 0 && n.is_power_of_two(), "num_shards must be a power of two");
        self.num_shards = n;
        self
    }

    /// Pre-sizes the hash index for an expected number of entries.
    pub fn initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = capacity;
        self
    }

    /// Each entry expires `ttl` after it was **written** (or replaced).
    ///
    /// A zero duration collapses the whole configuration to a
    /// zero-capacity cache: every insertion is evicted on the next drain,
    /// dominating all other bounds.
    pub fn expire_after_write(mut self, ttl: Duration) -> Self {
        self.expire_after_write = Some(ttl);
        self
    }

    /// Each entry expires `tti` after it was **last accessed** (reads and
    /// writes both count).  A zero duration collapses to a zero-capacity
    /// cache, as with [`expire_after_write`](Self::expire_after_write).
    pub fn expire_after_access(mut self, tti: Duration) -> Self {
        self.expire_after_access = Some(tti);
        self
    }

    /// A read of an entry older than `interval` triggers one asynchronous
    /// reload through the configured [`loader`](Self::loader); the stale
    /// value keeps being served until the reload lands.
    pub fn refresh_after_write(mut self, interval: Duration) -> Self {
        assert!(!interval.is_zero(), "refresh_after_write interval must be positive");
        self.refresh_after_write = Some(interval);
        self
    }

    /// Registers the loader used by [`refresh_after_write`](Self::refresh_after_write).
    pub fn loader<L: CacheLoader<K, V>>(mut self, loader: L) -> Self {
        self.loader = Some(Arc::new(loader));
        self
    }

    /// Register a removal listener closure.
    ///
    /// The closure runs on the cache's executor each time an entry is
    /// removed for any reason; see [`RemovalCause`].  Do **not** call
    /// [`Cache::clean_up`] or [`Cache::invalidate_all`] from within the
    /// closure — with the default caller-runs executor it may run while the
    /// maintenance lock is held.
    ///
    /// # Example
    /// ```
    /// use cortado::CacheBuilder;
    /// use cortado::listener::RemovalCause;
    ///
    /// let cache: cortado::Cache<u64, u64> = CacheBuilder::new(10)
    ///     .removal_listener(|key: &u64, _val, cause| {
    ///         println!("removed key={key} cause={cause:?}");
    ///     })
    ///     .build();
    /// # let _ = cache;
    /// ```
    pub fn removal_listener<F>(mut self, f: F) -> Self
    where
        F: Fn(&K, Arc<V>, RemovalCause) + Send + Sync + 'static,
    {
        self.listener = Some(Arc::new(FnListener(f)));
        self
    }

    /// Register a removal listener via the [`RemovalListener`] trait.
    pub fn removal_listener_impl<L: RemovalListener<K, V>>(mut self, l: L) -> Self {
        self.listener = Some(Arc::new(l));
        self
    }

    /// Set a custom entry weigher via closure.  A weight of 0 exempts the
    /// entry from size-based eviction.
    ///
    /// # Example
    /// ```
    /// use cortado::CacheBuilder;
    ///
    /// let cache: cortado::Cache<String, Vec<u8>> = CacheBuilder::new(4096)
    ///     .weigher(|_k: &String, v: &Vec<u8>| v.len() as u64 + 1)
    ///     .build();
    /// # let _ = cache;
    /// ```
    pub fn weigher<F>(mut self, f: F) -> Self
    where
        F: Fn(&K, &V) -> u64 + Send + Sync + 'static,
    {
        self.weigher = Box::new(FnWeigher(f));
        self
    }

    /// Set a weigher using any type that implements the [`Weigher`] trait.
    pub fn weigher_impl<W: Weigher<K, V>>(mut self, w: W) -> Self {
        self.weigher = Box::new(w);
        self
    }

    /// Enables the statistics counters read by [`Cache::stats`].
    pub fn record_stats(mut self) -> Self {
        self.record_stats = true;
        self
    }

    /// Substitutes the time source.  Defaults to a monotonic system clock
    /// anchored at build time; tests use
    /// [`ManualTicker`](crate::time::ManualTicker).
    pub fn ticker(mut self, ticker: Arc<dyn Ticker>) -> Self {
        self.ticker = Some(ticker);
        self
    }

    /// Substitutes the executor used for removal notifications and refresh
    /// reloads.  Defaults to [`Executor::caller_runs`].
    pub fn executor(mut self, executor: Executor) -> Self {
        self.executor = executor;
        self
    }
}

impl<K, V> CacheBuilder<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Builds the cache, validating option combinations.
    pub fn try_build(self) -> Result<Cache<K, V>, ConfigError> {
        if self.refresh_after_write.is_some() && self.loader.is_none() {
            return Err(ConfigError::new("refresh_after_write requires a loader"));
        }

        let mut max_weight = self.max_capacity;
        let mut ttl = self.expire_after_write;
        let mut tti = self.expire_after_access;
        if ttl == Some(Duration::ZERO) || tti == Some(Duration::ZERO) {
            // A zero expiry collapses to a zero-capacity cache: every
            // insertion evicts on the next drain, dominating other bounds.
            max_weight = 0;
            ttl = None;
            tti = None;
        }

        Ok(Cache::new(Config {
            max_weight,
            num_shards: self.num_shards,
            initial_capacity: self.initial_capacity,
            weigher: self.weigher,
            expiry: ExpiryConfig {
                ttl: ttl.map(|d| d.as_nanos() as u64),
                tti: tti.map(|d| d.as_nanos() as u64),
            },
            refresh_after_write: self.refresh_after_write.map(|d| d.as_nanos() as u64),
            loader: self.loader,
            listener: self.listener,
            record_stats: self.record_stats,
            ticker: self
                .ticker
                .unwrap_or_else(|| Arc::new(SystemTicker::new())),
            executor: self.executor,
        }))
    }

    /// Builds the cache, panicking on an invalid configuration.
    pub fn build(self) -> Cache<K, V> {
        match self.try_build() {
            Ok(cache) => cache,
            Err(err) => panic!("invalid cache configuration: {err}"),
        }
    }
}
