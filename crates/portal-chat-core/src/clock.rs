//! Time sources.
//!
//! Tool-call durations are measured on a monotonic millisecond counter so a
//! wall-clock adjustment mid-session can never produce a negative wait.
//! Event and turn timestamps come from the wall clock.

use std::fmt;
use std::time::Instant;

use chrono::{DateTime, Utc};

/// A source of wall-clock and monotonic time.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current wall-clock time.
    fn now(&self) -> DateTime<Utc>;

    /// Milliseconds elapsed on a monotonic counter since an arbitrary origin.
    ///
    /// Successive calls never decrease.
    fn monotonic_ms(&self) -> u64;
}

/// The real system clock.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    /// Create a clock whose monotonic origin is now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn monotonic_ms(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// A hand-driven clock for deterministic tests.
#[cfg(any(test, feature = "test-utils"))]
#[derive(Debug)]
pub struct ManualClock {
    state: parking_lot::Mutex<(DateTime<Utc>, u64)>,
}

#[cfg(any(test, feature = "test-utils"))]
impl ManualClock {
    /// Create a clock frozen at `start` with the monotonic counter at zero.
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            state: parking_lot::Mutex::new((start, 0)),
        }
    }

    /// Move both the wall clock and the monotonic counter forward.
    pub fn advance(&self, by: std::time::Duration) {
        let mut state = self.state.lock();
        let ms = u64::try_from(by.as_millis()).unwrap_or(u64::MAX);
        state.0 += chrono::Duration::milliseconds(i64::try_from(ms).unwrap_or(i64::MAX));
        state.1 = state.1.saturating_add(ms);
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.state.lock().0
    }

    fn monotonic_ms(&self) -> u64 {
        self.state.lock().1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let a = clock.monotonic_ms();
        let b = clock.monotonic_ms();
        assert!(b >= a);
    }

    #[test]
    fn manual_clock_advances_both_counters() {
        let start = DateTime::parse_from_rfc3339("2024-05-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let clock = ManualClock::new(start);
        assert_eq!(clock.monotonic_ms(), 0);

        clock.advance(Duration::from_millis(1250));
        assert_eq!(clock.monotonic_ms(), 1250);
        assert_eq!(
            clock.now(),
            DateTime::parse_from_rfc3339("2024-05-01T10:00:01.250Z")
                .unwrap()
                .with_timezone(&Utc)
        );
    }
}
