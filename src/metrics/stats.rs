use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters updated on every cache operation.
///
/// Counters are only bumped when statistics were enabled via
/// [`CacheBuilder::record_stats`](crate::CacheBuilder::record_stats);
/// otherwise every record call is a no-op and [`snapshot`] reports zeros.
///
/// [`snapshot`]: StatsCounter::snapshot
pub struct StatsCounter {
    enabled: bool,
    hits: AtomicU64,
    misses: AtomicU64,
    load_successes: AtomicU64,
    load_failures: AtomicU64,
    load_time_nanos: AtomicU64,
    evictions: AtomicU64,
}

impl StatsCounter {
    pub fn new(enabled: bool) -> Self {
        StatsCounter {
            enabled,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            load_successes: AtomicU64::new(0),
            load_failures: AtomicU64::new(0),
            load_time_nanos: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn record_hit(&self) {
        if self.enabled {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_miss(&self) {
        if self.enabled {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_eviction(&self, count: u64) {
        if self.enabled {
            self.evictions.fetch_add(count, Ordering::Relaxed);
        }
    }

    /// Records one completed loader invocation that produced a value.
    #[inline]
    pub fn record_load_success(&self, load_time_nanos: u64) {
        if self.enabled {
            self.load_successes.fetch_add(1, Ordering::Relaxed);
            self.load_time_nanos
                .fetch_add(load_time_nanos, Ordering::Relaxed);
        }
    }

    /// Records one completed loader invocation that failed or produced no
    /// value.
    #[inline]
    pub fn record_load_failure(&self, load_time_nanos: u64) {
        if self.enabled {
            self.load_failures.fetch_add(1, Ordering::Relaxed);
            self.load_time_nanos
                .fetch_add(load_time_nanos, Ordering::Relaxed);
        }
    }

    /// Returns a point-in-time snapshot of the statistics.
    pub fn snapshot(&self) -> CacheStats {
        CacheStats {
            hit_count: self.hits.load(Ordering::Relaxed),
            miss_count: self.misses.load(Ordering::Relaxed),
            load_success_count: self.load_successes.load(Ordering::Relaxed),
            load_failure_count: self.load_failures.load(Ordering::Relaxed),
            total_load_time_nanos: self.load_time_nanos.load(Ordering::Relaxed),
            eviction_count: self.evictions.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of lookups that returned a cached value.
    pub hit_count: u64,
    /// Number of lookups that found nothing (and possibly went to a loader).
    pub miss_count: u64,
    /// Number of completed loader invocations that produced a value.
    pub load_success_count: u64,
    /// Number of completed loader invocations that failed or produced none.
    pub load_failure_count: u64,
    /// Total wall time spent inside loader invocations, in nanoseconds.
    pub total_load_time_nanos: u64,
    /// Number of entries evicted automatically (size or expiry).
    pub eviction_count: u64,
}

impl CacheStats {
    pub fn request_count(&self) -> u64 {
        self.hit_count + self.miss_count
    }

    pub fn load_count(&self) -> u64 {
        self.load_success_count + self.load_failure_count
    }

    /// `hit_count / request_count`, or `1.0` when no requests were made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.request_count();
        if total == 0 {
            1.0
        } else {
            self.hit_count as f64 / total as f64
        }
    }

    /// Mean time spent per completed load, in nanoseconds.
    pub fn average_load_penalty(&self) -> f64 {
        let loads = self.load_count();
        if loads == 0 {
            0.0
        } else {
            self.total_load_time_nanos as f64 / loads as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = StatsCounter::new(true);
        stats.record_hit();
        stats.record_hit();
        stats.record_miss();
        stats.record_eviction(3);
        stats.record_load_success(100);
        stats.record_load_failure(50);

        let snap = stats.snapshot();
        assert_eq!(snap.hit_count, 2);
        assert_eq!(snap.miss_count, 1);
        assert_eq!(snap.eviction_count, 3);
        assert_eq!(snap.load_success_count, 1);
        assert_eq!(snap.load_failure_count, 1);
        assert_eq!(snap.total_load_time_nanos, 150);
        assert_eq!(snap.request_count(), 3);
        assert!((snap.hit_rate() - 2.0 / 3.0).abs() < 1e-9);
        assert!((snap.average_load_penalty() - 75.0).abs() < 1e-9);
    }

    #[test]
    fn disabled_counters_report_zero() {
        let stats = StatsCounter::new(false);
        stats.record_hit();
        stats.record_miss();
        stats.record_load_success(10);
        assert_eq!(stats.snapshot(), CacheStats::default());
        assert_eq!(stats.snapshot().hit_rate(), 1.0);
    }
}
