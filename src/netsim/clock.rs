//! Time sources for the token bucket

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

pub const NANOS_PER_SECOND: u64 = 1_000_000_000;

/// Monotonic time provider.
///
/// `now` returns nanoseconds on an arbitrary epoch, or `None` when no clock
/// is available.
pub trait Clock: Send + Sync {
    fn now(&self) -> Option<u64>;
}

/// Wall clock measured from its own creation
#[derive(Debug, Clone)]
pub struct SystemClock {
    epoch: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Option<u64> {
        Some(self.epoch.elapsed().as_nanos() as u64)
    }
}

/// Explicitly driven clock for tests and deterministic simulations
#[derive(Debug, Default)]
pub struct ManualClock {
    nanos: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, nanos: u64) {
        self.nanos.store(nanos, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.nanos.fetch_add(by.as_nanos() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Option<u64> {
        Some(self.nanos.load(Ordering::SeqCst))
    }
}

/// A provider that never has the time
#[derive(Debug, Default, Clone, Copy)]
pub struct NoClock;

impl Clock for NoClock {
    fn now(&self) -> Option<u64> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_monotonic() {
        let clock = SystemClock::new();
        let a = clock.now().unwrap();
        std::thread::sleep(Duration::from_millis(2));
        let b = clock.now().unwrap();
        assert!(b > a);
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new();
        assert_eq!(clock.now(), Some(0));

        clock.advance(Duration::from_millis(12));
        assert_eq!(clock.now(), Some(12_000_000));

        clock.set(5);
        assert_eq!(clock.now(), Some(5));
        assert_eq!(NoClock.now(), None);
    }
}
