//! Simulation clock: elapsed time since the single start instant,
//! and where that instant falls inside the repeating cycle.

use crate::types::CycleSecs;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Source of monotonic elapsed time since the engine started.
pub trait Clock: Send + Sync {
    fn elapsed(&self) -> Duration;
}

/// Wall-clock time. `Instant` is monotonic and infallible on every
/// platform std supports, so there is no clock error path.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    start: Instant,
}

impl MonotonicClock {
    pub fn start() -> Self {
        Self { start: Instant::now() }
    }
}

impl Clock for MonotonicClock {
    fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

/// Hand-driven clock for tests and replay. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    millis: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, elapsed: Duration) {
        self.millis.store(elapsed.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set_secs(&self, secs: f64) {
        self.set(Duration::from_secs_f64(secs));
    }

    pub fn advance(&self, by: Duration) {
        self.millis.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn elapsed(&self) -> Duration {
        Duration::from_millis(self.millis.load(Ordering::SeqCst))
    }
}

/// Where an elapsed duration lands in the cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CyclePosition {
    /// Zero-based count of completed cycles.
    pub cycle:  u64,
    /// Seconds into the current cycle.
    pub offset: CycleSecs,
}

impl CyclePosition {
    pub fn of(elapsed: Duration, cycle_len_secs: f64) -> Self {
        let total = elapsed.as_secs_f64();
        let cycle = (total / cycle_len_secs).floor();
        let offset = total - cycle * cycle_len_secs;
        Self {
            cycle:  cycle as u64,
            // Guard against float residue landing exactly on the boundary.
            offset: if offset >= cycle_len_secs { 0.0 } else { offset },
        }
    }
}
