//! Local time sources.
//!
//! Clock synchronization is expressed relative to a steady (monotonic) clock; the wall
//! clock is only used to answer peers that have no valid time yet.
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

pub trait Clock: Send + Sync {
    /// Monotonic time in nanoseconds since an arbitrary fixed point.
    fn steady_ns(&self) -> u64;
    /// Wall-clock Unix time in microseconds.
    fn unix_usec(&self) -> u64;
    /// Milliseconds since this clock started.
    fn boot_ms(&self) -> u32;
}

/// [Clock] backed by the operating system.
#[derive(Debug, Clone)]
pub struct SystemClock {
    start: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn steady_ns(&self) -> u64 {
        u64::try_from(self.start.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }

    fn unix_usec(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_micros()).unwrap_or(u64::MAX))
            .unwrap_or_default()
    }

    fn boot_ms(&self) -> u32 {
        u32::try_from(self.start.elapsed().as_millis()).unwrap_or(u32::MAX)
    }
}

/// Manually advanced [Clock] for simulations and tests.
///
/// Steady and wall time advance together.
#[derive(Debug, Default)]
pub struct ManualClock {
    steady_ns: AtomicU64,
    unix_usec: AtomicU64,
}

impl ManualClock {
    #[must_use]
    pub fn new(steady_ns: u64, unix_usec: u64) -> Self {
        Self {
            steady_ns: AtomicU64::new(steady_ns),
            unix_usec: AtomicU64::new(unix_usec),
        }
    }

    pub fn set_steady_ns(&self, ns: u64) {
        self.steady_ns.store(ns, Ordering::SeqCst);
    }

    pub fn advance_ns(&self, ns: u64) {
        self.steady_ns.fetch_add(ns, Ordering::SeqCst);
        self.unix_usec.fetch_add(ns / 1_000, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn steady_ns(&self) -> u64 {
        self.steady_ns.load(Ordering::SeqCst)
    }

    fn unix_usec(&self) -> u64 {
        self.unix_usec.load(Ordering::SeqCst)
    }

    fn boot_ms(&self) -> u32 {
        u32::try_from(self.steady_ns() / 1_000_000).unwrap_or(u32::MAX)
    }
}
