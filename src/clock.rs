//! Time sources for the coordinator.
//!
//! Cooldowns are measured on the monotonic clock so that wall-clock adjustments
//! (NTP steps, manual changes) cannot open or hold a gate early. Wall-clock time
//! is only used to stamp persisted records.

use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

pub trait Clock: Send + Sync {
    /// Monotonic instant used for cooldown arithmetic.
    fn monotonic(&self) -> Instant;

    /// Wall-clock milliseconds since the Unix epoch, used for record timestamps.
    fn wall_ms(&self) -> u64;
}

/// Process clock backed by `Instant::now()` and `SystemTime::now()`.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn monotonic(&self) -> Instant {
        Instant::now()
    }

    fn wall_ms(&self) -> u64 {
        now_ms()
    }
}

/// Manually advanced clock for deterministic tests and replays.
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    wall_base_ms: u64,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new(wall_base_ms: u64) -> Self {
        Self {
            base: Instant::now(),
            wall_base_ms,
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut offset = self
            .offset
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *offset += by;
    }

    pub fn elapsed(&self) -> Duration {
        *self
            .offset
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Clock for ManualClock {
    fn monotonic(&self) -> Instant {
        self.base + self.elapsed()
    }

    fn wall_ms(&self) -> u64 {
        self.wall_base_ms + self.elapsed().as_millis() as u64
    }
}

/// Current wall-clock time in milliseconds. Falls back to zero if the system
/// clock reads before the epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances_both_timelines() {
        let clock = ManualClock::new(1_000);
        let start = clock.monotonic();

        clock.advance(Duration::from_millis(1_500));

        assert_eq!(clock.monotonic() - start, Duration::from_millis(1_500));
        assert_eq!(clock.wall_ms(), 2_500);
    }
}
