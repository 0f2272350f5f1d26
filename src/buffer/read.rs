//! Striped lossy read buffer for recency updates.
//!
//! Cache hits are recorded by offering a pointer to the read record — one
//! lock-free ring push, with **no mutex acquisition**.  The buffer is
//! drained by the maintenance pass into the policy, where each recorded
//! record is promoted to most-recently-used.
//!
//! ## Design
//!
//! The buffer has `NUM_STRIPES` independent bounded rings.  Each calling
//! thread is permanently assigned one stripe via a thread-local index so
//! threads avoid colliding on the same ring's head and tail.
//!
//! When a stripe is full, the offer is **silently dropped** and the caller
//! is told to schedule a maintenance pass.  The recency order is an
//! approximation anyway; a lost read merely delays that record's promotion,
//! and losing the occasional event is better than stalling on a lock.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_queue::ArrayQueue;

use crate::store::entry::EntryRecord;

/// Number of independent stripes.  Must be a power of two.
const NUM_STRIPES: usize = 4;
const STRIPE_MASK: usize = NUM_STRIPES - 1;

/// Capacity of each stripe's ring.
const STRIPE_CAPACITY: usize = 16;

/// Global counter used to assign a stable stripe to each thread.
static STRIPE_COUNTER: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    /// The stripe index for the current thread.  Assigned once on first use.
    static THREAD_STRIPE: usize =
        STRIPE_COUNTER.fetch_add(1, Ordering::Relaxed) & STRIPE_MASK;
}

// ---------------------------------------------------------------------------
// Stripe
// ---------------------------------------------------------------------------

/// One fixed-capacity ring.
///
/// Padded to 64 bytes to avoid false-sharing with other stripes.
#[repr(align(64))]
struct Stripe<K, V> {
    ring: ArrayQueue<Arc<EntryRecord<K, V>>>,
}

impl<K, V> Stripe<K, V> {
    fn new() -> Self {
        Stripe {
            ring: ArrayQueue::new(STRIPE_CAPACITY),
        }
    }
}

// ---------------------------------------------------------------------------
// StripedReadBuffer
// ---------------------------------------------------------------------------

/// A lock-free, lossy, striped read buffer holding pointers to recently
/// read records.
pub(crate) struct StripedReadBuffer<K, V> {
    stripes: Box<[Stripe<K, V>]>,
}

impl<K, V> StripedReadBuffer<K, V> {
    pub(crate) fn new() -> Self {
        let stripes = (0..NUM_STRIPES)
            .map(|_| Stripe::new())
            .collect::<Vec<_>>()
            .into_boxed_slice();
        StripedReadBuffer { stripes }
    }

    /// Offers a read record to the current thread's stripe.
    ///
    /// This is the hot-path call site: one lock-free ring push.  Returns
    /// `false` if the stripe is full — the event is dropped and the caller
    /// should schedule a maintenance pass.
    #[inline]
    pub(crate) fn offer(&self, entry: Arc<EntryRecord<K, V>>) -> bool {
        let stripe = THREAD_STRIPE.with(|s| *s);
        self.stripes[stripe].ring.push(entry).is_ok()
    }

    /// Drains every stripe into `out`, in the order events were observed
    /// within each stripe.
    ///
    /// Called only under the maintenance lock.
    pub(crate) fn drain(&self, out: &mut Vec<Arc<EntryRecord<K, V>>>) {
        for stripe in self.stripes.iter() {
            while let Some(entry) = stripe.ring.pop() {
                out.push(entry);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn record(key: u64) -> Arc<EntryRecord<u64, u64>> {
        Arc::new(EntryRecord::new(key, Arc::new(0), 1, key, 0))
    }

    #[test]
    fn offer_and_drain_round_trip() {
        let buf: StripedReadBuffer<u64, u64> = StripedReadBuffer::new();
        assert!(buf.offer(record(42)));
        assert!(buf.offer(record(99)));

        let mut out = Vec::new();
        buf.drain(&mut out);
        let keys: Vec<u64> = out.iter().map(|e| e.key).collect();
        assert!(keys.contains(&42), "missing 42 after drain");
        assert!(keys.contains(&99), "missing 99 after drain");
    }

    #[test]
    fn drain_clears_buffer() {
        let buf: StripedReadBuffer<u64, u64> = StripedReadBuffer::new();
        buf.offer(record(1));
        let mut out = Vec::new();
        buf.drain(&mut out);
        out.clear();
        buf.drain(&mut out); // second drain should yield nothing
        assert!(out.is_empty(), "buffer should be empty after drain");
    }

    #[test]
    fn full_stripe_rejects_offers() {
        let buf: StripedReadBuffer<u64, u64> = StripedReadBuffer::new();
        // All offers from this thread land in one stripe of STRIPE_CAPACITY.
        let mut accepted = 0usize;
        for i in 0..(STRIPE_CAPACITY as u64 * 2) {
            if buf.offer(record(i)) {
                accepted += 1;
            }
        }
        assert_eq!(accepted, STRIPE_CAPACITY, "only STRIPE_CAPACITY offers accepted");
    }

    #[test]
    fn concurrent_offers_do_not_panic() {
        let buf: Arc<StripedReadBuffer<u64, u64>> = Arc::new(StripedReadBuffer::new());
        let mut handles = Vec::new();
        for t in 0..8u64 {
            let b = Arc::clone(&buf);
            handles.push(std::thread::spawn(move || {
                for j in 0..50u64 {
                    b.offer(record(t * 1000 + j));
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        let mut out = Vec::new();
        buf.drain(&mut out);
        // We can't assert exact counts (lossy), but there should be some values.
        assert!(!out.is_empty(), "expected some values after concurrent offers");
    }
}
