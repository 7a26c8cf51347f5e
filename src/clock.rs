//! Millisecond clocks.
//!
//! The tracker never reads time directly; it asks a [`Clock`] so tests can
//! step time by hand with [`ManualClock`].

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use once_cell::sync::Lazy;

use crate::error::{Result, TrackerError};

/// Source of "current time" in milliseconds.
///
/// Implementations must be monotonic non-decreasing for a process run.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

/// Wall-clock anchor taken once per process, advanced by a monotonic `Instant`.
static PROCESS_ANCHOR: Lazy<(Instant, i64)> = Lazy::new(|| {
    let wall = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);
    (Instant::now(), wall)
});

/// Production clock: Unix epoch milliseconds that never step backwards.
///
/// The wall time is sampled once and then advanced with `Instant`, so NTP
/// corrections during a workout cannot produce negative durations.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        let (started, wall) = *PROCESS_ANCHOR;
        wall + started.elapsed().as_millis() as i64
    }
}

/// Hand-driven clock for tests and simulations. Starts at 0.
#[derive(Debug, Default)]
pub struct ManualClock {
    current: AtomicI64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a clock already positioned at `millis`.
    pub fn starting_at(millis: i64) -> Result<Self> {
        let clock = Self::new();
        clock.set_millis(millis)?;
        Ok(clock)
    }

    /// Move the clock forward. Negative amounts are rejected.
    pub fn advance_millis(&self, millis: i64) -> Result<()> {
        if millis < 0 {
            return Err(TrackerError::NegativeTime { millis });
        }
        self.current.fetch_add(millis, Ordering::SeqCst);
        Ok(())
    }

    /// Jump to an absolute time. Negative times are rejected.
    pub fn set_millis(&self, millis: i64) -> Result<()> {
        if millis < 0 {
            return Err(TrackerError::NegativeTime { millis });
        }
        self.current.store(millis, Ordering::SeqCst);
        Ok(())
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.current.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_starts_at_zero() {
        let clock = ManualClock::new();
        assert_eq!(clock.now_millis(), 0);
    }

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new();
        clock.advance_millis(1500).unwrap();
        clock.advance_millis(0).unwrap();
        clock.advance_millis(250).unwrap();
        assert_eq!(clock.now_millis(), 1750);

        clock.set_millis(10_000).unwrap();
        assert_eq!(clock.now_millis(), 10_000);
    }

    #[test]
    fn test_manual_clock_rejects_negative() {
        let clock = ManualClock::starting_at(500).unwrap();
        assert_eq!(
            clock.advance_millis(-1),
            Err(TrackerError::NegativeTime { millis: -1 })
        );
        assert!(clock.set_millis(-100).is_err());
        assert!(ManualClock::starting_at(-1).is_err());
        // Failed calls leave the time untouched
        assert_eq!(clock.now_millis(), 500);
    }

    #[test]
    fn test_system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let first = clock.now_millis();
        let second = clock.now_millis();
        assert!(first > 0);
        assert!(second >= first);
    }
}
