//! Time sources for the virtual clock.

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// A monotonic time source. Readings are offsets from an arbitrary origin
/// and never go backwards.
pub trait Clock: Send + Sync {
    fn now(&self) -> Duration;
}

/// Wall-clock time from `Instant`, unaffected by system time adjustments.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// A clock that only moves when told to. Used to simulate elapsed time.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Whole frames elapsed in `elapsed` at `rate` Hz, truncated.
pub fn frames_in(elapsed: Duration, rate: u32) -> u64 {
    let frames = elapsed.as_nanos() * u128::from(rate) / 1_000_000_000;
    u64::try_from(frames).unwrap_or(u64::MAX)
}

/// Time `frames` take to play at `rate` Hz.
pub fn duration_of(frames: u64, rate: u32) -> Duration {
    Duration::from_secs_f64(frames as f64 / f64::from(rate.max(1)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_only_moves_when_advanced() {
        let clock = ManualClock::new();
        assert_eq!(clock.now(), Duration::ZERO);
        clock.advance(Duration::from_millis(5));
        clock.advance(Duration::from_millis(5));
        assert_eq!(clock.now(), Duration::from_millis(10));
    }

    #[test]
    fn monotonic_clock_does_not_go_backwards() {
        let clock = MonotonicClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }

    #[test]
    fn frame_math_is_exact_on_whole_milliseconds() {
        assert_eq!(frames_in(Duration::from_millis(10), 48000), 480);
        assert_eq!(frames_in(Duration::from_millis(5), 48000), 240);
        assert_eq!(frames_in(Duration::from_nanos(20_833), 48000), 0);
        assert_eq!(frames_in(Duration::from_nanos(20_834), 48000), 1);
    }

    #[test]
    fn duration_of_period() {
        let d = duration_of(480, 48000);
        assert!((d.as_secs_f64() - 0.01).abs() < 1e-9);
    }
}
