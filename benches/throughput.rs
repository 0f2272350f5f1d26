//! Throughput benchmarks for the paths cortado actually exercises,
//! measured side by side with Moka (and QuickCache where the feature sets
//! overlap) so criterion can generate comparative HTML reports.
//!
//! Groups:
//! - `read_hit`: point reads with every key resident.
//! - `weighted_eviction`: byte-weighed inserts against a byte budget, so
//!   every batch runs the weighted LRU victim loop.
//! - `ttl_mixed_80r_20w`: mixed traffic with a short write expiry, so the
//!   inline deadline checks and the write-order sweep stay hot.
//! - `single_flight_8t`: eight threads hammering `get_with` over a small
//!   hot set with periodic invalidation forcing recomputation.
//!
//! Run with:
//!     cargo bench --bench throughput

use std::sync::Barrier;
use std::time::{Duration, Instant};

use cortado::CacheBuilder;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use moka::sync::Cache as MokaCache;
use quick_cache::sync::Cache as QuickCache;

/// Number of entries each cache is pre-filled with and its logical capacity.
const CAP: u64 = 10_000;

/// Operations executed per criterion iteration (hot-loop size).
const OPS: u64 = 1_000;

/// Runs `op(thread, op_index)` from `threads` threads after a common
/// barrier and returns the slowest thread's wall time.
fn parallel_elapsed<F>(threads: usize, ops_per_thread: u64, op: F) -> Duration
where
    F: Fn(usize, u64) + Sync,
{
    let barrier = Barrier::new(threads);
    std::thread::scope(|s| {
        let handles: Vec<_> = (0..threads)
            .map(|t| {
                let barrier = &barrier;
                let op = &op;
                s.spawn(move || {
                    barrier.wait();
                    let start = Instant::now();
                    for j in 0..ops_per_thread {
                        op(t, j);
                    }
                    start.elapsed()
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .max()
            .unwrap_or_default()
    })
}

// ---------------------------------------------------------------------------
// Group 1: read_hit
// ---------------------------------------------------------------------------
// All keys are present → measures pure read throughput with no eviction.

fn bench_read_hit(c: &mut Criterion) {
    let mut group = c.benchmark_group("read_hit");
    group.throughput(Throughput::Elements(OPS));

    let cortado: cortado::Cache<u64, u64> = CacheBuilder::new(CAP).build();
    for i in 0..CAP {
        cortado.insert(i, i * 2);
    }
    group.bench_function("cortado", |b| {
        b.iter(|| {
            for i in 0..OPS {
                black_box(cortado.get(black_box(&i)));
            }
        })
    });

    let moka: MokaCache<u64, u64> = MokaCache::new(CAP);
    for i in 0..CAP {
        moka.insert(i, i * 2);
    }
    group.bench_function("moka", |b| {
        b.iter(|| {
            for i in 0..OPS {
                black_box(moka.get(black_box(&i)));
            }
        })
    });

    let qc: QuickCache<u64, u64> = QuickCache::new(CAP as usize);
    for i in 0..CAP {
        qc.insert(i, i * 2);
    }
    group.bench_function("quick_cache", |b| {
        b.iter(|| {
            for i in 0..OPS {
                black_box(qc.get(black_box(&i)));
            }
        })
    });

    group.finish();
}

// ---------------------------------------------------------------------------
// Group 2: weighted_eviction
// ---------------------------------------------------------------------------
// Inserts byte payloads of varying size against a byte budget.  Every
// batch overflows the budget, so the weighted victim-selection loop (not
// just entry-count eviction) is what gets measured.

fn bench_weighted_eviction(c: &mut Criterion) {
    const BYTE_BUDGET: u64 = 256 * 1024;

    fn payload(key: u64) -> Vec<u8> {
        // 64..512 bytes, cycling so adjacent inserts have unequal weights.
        vec![0u8; 64 + ((key % 8) as usize) * 64]
    }

    let mut group = c.benchmark_group("weighted_eviction");
    group.throughput(Throughput::Elements(OPS));

    group.bench_function("cortado", |b| {
        let cache: cortado::Cache<u64, Vec<u8>> = CacheBuilder::new(BYTE_BUDGET)
            .weigher(|_k: &u64, v: &Vec<u8>| v.len() as u64)
            .build();
        let mut key = 0u64;
        b.iter(|| {
            for _ in 0..OPS {
                cache.insert(black_box(key), payload(key));
                key = key.wrapping_add(1);
            }
        })
    });

    group.bench_function("moka", |b| {
        let cache: MokaCache<u64, Vec<u8>> = MokaCache::builder()
            .max_capacity(BYTE_BUDGET)
            .weigher(|_k: &u64, v: &Vec<u8>| v.len() as u32)
            .build();
        let mut key = 0u64;
        b.iter(|| {
            for _ in 0..OPS {
                cache.insert(black_box(key), payload(key));
                key = key.wrapping_add(1);
            }
        })
    });

    group.finish();
}

// ---------------------------------------------------------------------------
// Group 3: ttl_mixed_80r_20w
// ---------------------------------------------------------------------------
// 80 % reads / 20 % writes over a working set of 2× capacity with a short
// write expiry, so reads keep hitting the inline deadline check and drains
// keep running the write-order expiry sweep.

fn bench_ttl_mixed(c: &mut Criterion) {
    const TTL: Duration = Duration::from_millis(5);
    const WORKING_SET: u64 = CAP * 2;

    let mut group = c.benchmark_group("ttl_mixed_80r_20w");
    group.throughput(Throughput::Elements(OPS));

    group.bench_function("cortado", |b| {
        let cache: cortado::Cache<u64, u64> = CacheBuilder::new(CAP)
            .expire_after_write(TTL)
            .build();
        for i in 0..CAP {
            cache.insert(i, i);
        }
        let mut cursor = 0u64;
        b.iter(|| {
            for i in 0..OPS {
                let k = cursor % WORKING_SET;
                if i % 5 == 0 {
                    cache.insert(black_box(k), black_box(k));
                } else {
                    black_box(cache.get(black_box(&k)));
                }
                cursor = cursor.wrapping_add(131);
            }
        })
    });

    group.bench_function("moka", |b| {
        let cache: MokaCache<u64, u64> = MokaCache::builder()
            .max_capacity(CAP)
            .time_to_live(TTL)
            .build();
        for i in 0..CAP {
            cache.insert(i, i);
        }
        let mut cursor = 0u64;
        b.iter(|| {
            for i in 0..OPS {
                let k = cursor % WORKING_SET;
                if i % 5 == 0 {
                    cache.insert(black_box(k), black_box(k));
                } else {
                    black_box(cache.get(black_box(&k)));
                }
                cursor = cursor.wrapping_add(131);
            }
        })
    });

    group.finish();
}

// ---------------------------------------------------------------------------
// Group 4: single_flight_8t
// ---------------------------------------------------------------------------
// Eight threads call `get_with` over a 64-key hot set while one thread
// periodically invalidates, so cohorts keep forming: most calls are hits,
// a steady trickle are leader computations with followers blocked on them.

fn bench_single_flight(c: &mut Criterion) {
    const THREADS: usize = 8;
    const OPS_PER_THREAD: u64 = 2_000;
    const HOT_KEYS: u64 = 64;

    let mut group = c.benchmark_group("single_flight_8t");
    group.throughput(Throughput::Elements(THREADS as u64 * OPS_PER_THREAD));

    group.bench_function("cortado", |b| {
        let cache: cortado::Cache<u64, u64> = CacheBuilder::new(HOT_KEYS * 2).build();
        b.iter_custom(|iters| {
            let mut total = Duration::ZERO;
            for _ in 0..iters {
                total += parallel_elapsed(THREADS, OPS_PER_THREAD, |t, j| {
                    let k = (t as u64).wrapping_add(j) % HOT_KEYS;
                    if t == 0 && j % 64 == 0 {
                        cache.invalidate(&k);
                    }
                    black_box(cache.get_with(&k, || k.wrapping_mul(2)));
                });
            }
            total
        })
    });

    group.bench_function("moka", |b| {
        let cache: MokaCache<u64, u64> = MokaCache::new(HOT_KEYS * 2);
        b.iter_custom(|iters| {
            let mut total = Duration::ZERO;
            for _ in 0..iters {
                total += parallel_elapsed(THREADS, OPS_PER_THREAD, |t, j| {
                    let k = (t as u64).wrapping_add(j) % HOT_KEYS;
                    if t == 0 && j % 64 == 0 {
                        cache.invalidate(&k);
                    }
                    black_box(cache.get_with(k, || k.wrapping_mul(2)));
                });
            }
            total
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_read_hit,
    bench_weighted_eviction,
    bench_ttl_mixed,
    bench_single_flight,
);
criterion_main!(benches);
