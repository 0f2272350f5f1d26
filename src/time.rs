//! Time sources.
//!
//! Every timestamp in the cache is a `u64` nanosecond count read from a
//! [`Ticker`].  The default ticker is monotonic (`Instant`-based) and
//! anchored at cache construction, so timestamps start near zero and never
//! go backwards.  Tests substitute a [`ManualTicker`] to drive expiry and
//! refresh deterministically.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// A monotonic nanosecond clock.
///
/// Implementations must be cheap to call: the ticker is read on every cache
/// operation.
pub trait Ticker: Send + Sync + 'static {
    /// Returns the current time in nanoseconds since an arbitrary epoch.
    fn now_nanos(&self) -> u64;
}

// ---------------------------------------------------------------------------
// SystemTicker
// ---------------------------------------------------------------------------

/// The default ticker: monotonic system time anchored at creation.
pub struct SystemTicker {
    epoch: Instant,
}

impl SystemTicker {
    pub fn new() -> Self {
        SystemTicker {
            epoch: Instant::now(),
        }
    }
}

impl Default for SystemTicker {
    fn default() -> Self {
        Self::new()
    }
}

impl Ticker for SystemTicker {
    #[inline]
    fn now_nanos(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }
}

// ---------------------------------------------------------------------------
// ManualTicker
// ---------------------------------------------------------------------------

/// A ticker that only moves when told to.
///
/// Intended for tests that need exact control over expiry and refresh
/// deadlines.
///
/// # Example
/// ```
/// use cortado::time::{ManualTicker, Ticker};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let ticker = Arc::new(ManualTicker::new());
/// assert_eq!(ticker.now_nanos(), 0);
/// ticker.advance(Duration::from_nanos(9));
/// assert_eq!(ticker.now_nanos(), 9);
/// ```
pub struct ManualTicker {
    nanos: AtomicU64,
}

impl ManualTicker {
    /// Creates a ticker frozen at time zero.
    pub fn new() -> Self {
        ManualTicker {
            nanos: AtomicU64::new(0),
        }
    }

    /// Moves the clock forward by `d`.
    pub fn advance(&self, d: Duration) {
        self.nanos.fetch_add(d.as_nanos() as u64, Ordering::SeqCst);
    }

    /// Sets the clock to an absolute nanosecond value.
    ///
    /// Callers are expected to only move time forward.
    pub fn set_nanos(&self, nanos: u64) {
        self.nanos.store(nanos, Ordering::SeqCst);
    }
}

impl Default for ManualTicker {
    fn default() -> Self {
        Self::new()
    }
}

impl Ticker for ManualTicker {
    #[inline]
    fn now_nanos(&self) -> u64 {
        self.nanos.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_ticker_is_monotonic() {
        let t = SystemTicker::new();
        let a = t.now_nanos();
        let b = t.now_nanos();
        assert!(b >= a);
    }

    #[test]
    fn manual_ticker_advances_and_sets() {
        let t = ManualTicker::new();
        t.advance(Duration::from_nanos(5));
        t.advance(Duration::from_nanos(7));
        assert_eq!(t.now_nanos(), 12);
        t.set_nanos(100);
        assert_eq!(t.now_nanos(), 100);
    }
}
