//! Time-based expiry and refresh, driven by a manual ticker so every
//! deadline is exact.

use cortado::exec::Executor;
use cortado::listener::RemovalCause;
use cortado::time::ManualTicker;
use cortado::CacheBuilder;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn nanos(n: u64) -> Duration {
    Duration::from_nanos(n)
}

// ---------------------------------------------------------------------------
// Write expiry (TTL)
// ---------------------------------------------------------------------------

#[test]
fn write_expiry_at_exact_deadline() {
    let ticker = Arc::new(ManualTicker::new());
    let log: Arc<Mutex<Vec<(String, RemovalCause)>>> = Arc::new(Mutex::new(Vec::new()));
    let log2 = Arc::clone(&log);

    let cache: cortado::Cache<String, String> = CacheBuilder::new(100)
        .expire_after_write(nanos(10))
        .ticker(Arc::clone(&ticker) as Arc<dyn cortado::time::Ticker>)
        .removal_listener(move |key: &String, _val, cause| {
            log2.lock().unwrap().push((key.clone(), cause));
        })
        .build();

    cache.insert("k".to_string(), "v".to_string()); // written at t=0
    ticker.set_nanos(9);
    assert_eq!(
        cache.get(&"k".to_string()),
        Some(Arc::new("v".to_string())),
        "one nanosecond before the deadline the entry is alive"
    );

    ticker.set_nanos(11);
    assert_eq!(cache.get(&"k".to_string()), None, "past the deadline");

    let events = log.lock().unwrap();
    assert_eq!(events.as_slice(), &[("k".to_string(), RemovalCause::Expired)]);
}

#[test]
fn replacing_a_value_resets_its_write_deadline() {
    let ticker = Arc::new(ManualTicker::new());
    let cache: cortado::Cache<String, String> = CacheBuilder::new(100)
        .expire_after_write(nanos(10))
        .ticker(Arc::clone(&ticker) as Arc<dyn cortado::time::Ticker>)
        .build();

    cache.insert("k".to_string(), "v1".to_string()); // deadline 10
    ticker.set_nanos(6);
    cache.insert("k".to_string(), "v2".to_string()); // deadline 16
    ticker.set_nanos(12);
    assert_eq!(
        cache.get(&"k".to_string()),
        Some(Arc::new("v2".to_string())),
        "the rewrite at t=6 moved the deadline to 16"
    );
    ticker.set_nanos(16);
    assert_eq!(cache.get(&"k".to_string()), None);
}

#[test]
fn clean_up_sweeps_expired_entries_without_reads() {
    let ticker = Arc::new(ManualTicker::new());
    let log: Arc<Mutex<Vec<(u64, RemovalCause)>>> = Arc::new(Mutex::new(Vec::new()));
    let log2 = Arc::clone(&log);

    let cache: cortado::Cache<u64, u64> = CacheBuilder::new(100)
        .expire_after_write(nanos(10))
        .ticker(Arc::clone(&ticker) as Arc<dyn cortado::time::Ticker>)
        .removal_listener(move |key: &u64, _val, cause| {
            log2.lock().unwrap().push((*key, cause));
        })
        .build();

    for i in 0..5u64 {
        cache.insert(i, i);
    }
    ticker.set_nanos(50);
    cache.clean_up(); // the write-order scan must expire everything

    assert_eq!(cache.entry_count(), 0);
    let events = log.lock().unwrap();
    assert_eq!(events.len(), 5);
    assert!(events.iter().all(|(_, c)| *c == RemovalCause::Expired));
}

// ---------------------------------------------------------------------------
// Access expiry (TTI)
// ---------------------------------------------------------------------------

#[test]
fn idle_entry_expires_without_access() {
    let ticker = Arc::new(ManualTicker::new());
    let cache: cortado::Cache<String, String> = CacheBuilder::new(100)
        .expire_after_access(nanos(10))
        .ticker(Arc::clone(&ticker) as Arc<dyn cortado::time::Ticker>)
        .build();

    cache.insert("k".to_string(), "v".to_string());
    ticker.set_nanos(11);
    assert_eq!(cache.get(&"k".to_string()), None, "idle past the deadline");
}

#[test]
fn access_resets_the_idle_deadline() {
    let ticker = Arc::new(ManualTicker::new());
    let cache: cortado::Cache<String, String> = CacheBuilder::new(100)
        .expire_after_access(nanos(10))
        .ticker(Arc::clone(&ticker) as Arc<dyn cortado::time::Ticker>)
        .build();

    cache.insert("k".to_string(), "v".to_string()); // accessed at t=0
    ticker.set_nanos(5);
    assert!(cache.get(&"k".to_string()).is_some()); // deadline now 15

    ticker.set_nanos(14);
    // contains_key probes without touching: still inside the deadline.
    assert!(cache.contains_key(&"k".to_string()));
    ticker.set_nanos(15);
    assert!(
        !cache.contains_key(&"k".to_string()),
        "the read at t=5 set the deadline to exactly 15"
    );
    assert_eq!(cache.get(&"k".to_string()), None);
}

#[test]
fn repeated_reads_keep_an_entry_alive() {
    let ticker = Arc::new(ManualTicker::new());
    let cache: cortado::Cache<String, String> = CacheBuilder::new(100)
        .expire_after_access(nanos(10))
        .ticker(Arc::clone(&ticker) as Arc<dyn cortado::time::Ticker>)
        .build();

    cache.insert("k".to_string(), "v".to_string());
    for t in [5u64, 12, 19, 26] {
        ticker.set_nanos(t);
        assert!(
            cache.get(&"k".to_string()).is_some(),
            "entry should be alive while being accessed (t={t})"
        );
    }
    ticker.set_nanos(40);
    assert_eq!(cache.get(&"k".to_string()), None);
}

#[test]
fn both_schedules_apply_independently() {
    let ticker = Arc::new(ManualTicker::new());
    let cache: cortado::Cache<u64, u64> = CacheBuilder::new(100)
        .expire_after_write(nanos(20))
        .expire_after_access(nanos(10))
        .ticker(Arc::clone(&ticker) as Arc<dyn cortado::time::Ticker>)
        .build();

    cache.insert(1, 1);
    for t in [5u64, 12, 19] {
        ticker.set_nanos(t);
        assert!(cache.get(&1).is_some(), "reads keep the idle clock fresh (t={t})");
    }
    ticker.set_nanos(21);
    assert_eq!(
        cache.get(&1),
        None,
        "the write deadline expires the entry no matter how often it is read"
    );
}

#[test]
fn expired_entries_are_invisible_to_bulk_views() {
    let ticker = Arc::new(ManualTicker::new());
    let cache: cortado::Cache<u64, u64> = CacheBuilder::new(100)
        .expire_after_write(nanos(10))
        .ticker(Arc::clone(&ticker) as Arc<dyn cortado::time::Ticker>)
        .build();

    cache.insert(1, 1);
    ticker.set_nanos(5);
    cache.insert(2, 2);
    ticker.set_nanos(12); // key 1 expired, key 2 alive until 15

    assert_eq!(cache.iter().count(), 1);
    let present = cache.get_all_present(vec![1, 2]);
    assert_eq!(present, vec![(2, Arc::new(2))]);
}

// ---------------------------------------------------------------------------
// Refresh-after-write
// ---------------------------------------------------------------------------

/// Loader that returns `v<N>` with a running counter, so each reload is
/// distinguishable.
struct SequenceLoader {
    calls: AtomicU64,
}

impl cortado::CacheLoader<String, String> for SequenceLoader {
    fn load(&self, _key: &String) -> Result<Option<String>, cortado::error::BoxError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Some(format!("v{}", n + 1)))
    }
}

#[test]
fn stale_read_returns_old_value_and_schedules_reload() {
    let ticker = Arc::new(ManualTicker::new());
    let cache: cortado::Cache<String, String> = CacheBuilder::new(100)
        .refresh_after_write(nanos(10))
        .loader(SequenceLoader {
            calls: AtomicU64::new(0),
        })
        .ticker(Arc::clone(&ticker) as Arc<dyn cortado::time::Ticker>)
        .record_stats()
        .build();

    cache.insert("k".to_string(), "v1".to_string()); // written at t=0
    ticker.set_nanos(11);

    // The stale value is returned immediately; the reload (caller-runs
    // executor) installs v2 before the next read.
    assert_eq!(
        cache.get(&"k".to_string()),
        Some(Arc::new("v1".to_string()))
    );
    assert_eq!(
        cache.get(&"k".to_string()),
        Some(Arc::new("v2".to_string()))
    );

    let stats = cache.stats();
    assert_eq!(stats.load_success_count, 1, "only the refresh invoked the loader");
    assert_eq!(stats.load_failure_count, 0);
}

#[test]
fn at_most_one_outstanding_refresh_per_key() {
    let ticker = Arc::new(ManualTicker::new());
    let pending: Arc<Mutex<Vec<cortado::exec::Task>>> = Arc::new(Mutex::new(Vec::new()));
    let pending2 = Arc::clone(&pending);

    let cache: cortado::Cache<String, String> = CacheBuilder::new(100)
        .refresh_after_write(nanos(10))
        .loader(SequenceLoader {
            calls: AtomicU64::new(0),
        })
        .ticker(Arc::clone(&ticker) as Arc<dyn cortado::time::Ticker>)
        .executor(Executor::custom(move |task| {
            pending2.lock().unwrap().push(task);
        }))
        .build();

    cache.insert("k".to_string(), "v1".to_string());
    ticker.set_nanos(11);

    // Two stale reads: the refresh flag admits a single reload task.
    assert!(cache.get(&"k".to_string()).is_some());
    assert!(cache.get(&"k".to_string()).is_some());
    assert_eq!(pending.lock().unwrap().len(), 1);

    let tasks: Vec<_> = pending.lock().unwrap().drain(..).collect();
    for task in tasks {
        task();
    }
    assert_eq!(
        cache.get(&"k".to_string()),
        Some(Arc::new("v2".to_string()))
    );
}

struct FailingLoader;

impl cortado::CacheLoader<String, String> for FailingLoader {
    fn load(&self, _key: &String) -> Result<Option<String>, cortado::error::BoxError> {
        Err("backend down".into())
    }
}

#[test]
fn failed_refresh_keeps_the_stale_value() {
    let ticker = Arc::new(ManualTicker::new());
    let cache: cortado::Cache<String, String> = CacheBuilder::new(100)
        .refresh_after_write(nanos(10))
        .loader(FailingLoader)
        .ticker(Arc::clone(&ticker) as Arc<dyn cortado::time::Ticker>)
        .record_stats()
        .build();

    cache.insert("k".to_string(), "v1".to_string());
    ticker.set_nanos(11);
    assert_eq!(
        cache.get(&"k".to_string()),
        Some(Arc::new("v1".to_string()))
    );
    // The failure was swallowed; the stale value keeps being served.
    assert_eq!(
        cache.get(&"k".to_string()),
        Some(Arc::new("v1".to_string()))
    );
    assert_eq!(cache.stats().load_failure_count, 1);
}

struct VanishingLoader;

impl cortado::CacheLoader<String, String> for VanishingLoader {
    fn load(&self, _key: &String) -> Result<Option<String>, cortado::error::BoxError> {
        Ok(None)
    }
}

#[test]
fn refresh_returning_none_removes_the_entry() {
    let ticker = Arc::new(ManualTicker::new());
    let log: Arc<Mutex<Vec<RemovalCause>>> = Arc::new(Mutex::new(Vec::new()));
    let log2 = Arc::clone(&log);

    let cache: cortado::Cache<String, String> = CacheBuilder::new(100)
        .refresh_after_write(nanos(10))
        .loader(VanishingLoader)
        .ticker(Arc::clone(&ticker) as Arc<dyn cortado::time::Ticker>)
        .removal_listener(move |_key: &String, _val, cause| {
            log2.lock().unwrap().push(cause);
        })
        .build();

    cache.insert("k".to_string(), "v1".to_string());
    ticker.set_nanos(11);
    // Serves the stale value once; the reload then removes the mapping.
    assert!(cache.get(&"k".to_string()).is_some());
    assert_eq!(cache.get(&"k".to_string()), None);
    assert_eq!(log.lock().unwrap().as_slice(), &[RemovalCause::Explicit]);
}

#[test]
fn fresh_entries_are_not_refreshed() {
    let ticker = Arc::new(ManualTicker::new());
    let cache: cortado::Cache<String, String> = CacheBuilder::new(100)
        .refresh_after_write(nanos(10))
        .loader(SequenceLoader {
            calls: AtomicU64::new(0),
        })
        .ticker(Arc::clone(&ticker) as Arc<dyn cortado::time::Ticker>)
        .record_stats()
        .build();

    cache.insert("k".to_string(), "v1".to_string());
    ticker.set_nanos(9);
    assert_eq!(
        cache.get(&"k".to_string()),
        Some(Arc::new("v1".to_string()))
    );
    assert_eq!(cache.stats().load_count(), 0, "no reload below the threshold");
}
