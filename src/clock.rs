//! Time sources for the session loop.
//!
//! Timers and the simulator read time through `Clock` so that tests can drive
//! the loop deterministically with `ManualClock`.

use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

pub trait Clock {
    /// Monotonic time since the clock was created.
    fn now(&self) -> Duration;

    /// Wall-clock seconds since the Unix epoch.
    fn wall_time(&self) -> f64;

    /// Wall-clock milliseconds since the Unix epoch.
    fn epoch_millis(&self) -> u64 {
        (self.wall_time() * 1000.0) as u64
    }
}

/// Real time.
#[derive(Clone, Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
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
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn wall_time(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }
}

/// Hand-advanced time. Clones share the same underlying instant.
#[derive(Clone, Debug)]
pub struct ManualClock {
    now: Rc<Cell<Duration>>,
    wall_origin: f64,
}

impl ManualClock {
    pub fn new(wall_origin: f64) -> Self {
        Self {
            now: Rc::new(Cell::new(Duration::ZERO)),
            wall_origin,
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }

    pub fn set(&self, at: Duration) {
        self.now.set(at);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(1_700_000_000.0)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.now.get()
    }

    fn wall_time(&self) -> f64 {
        self.wall_origin + self.now.get().as_secs_f64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_clones_share_time() {
        let clock = ManualClock::new(100.0);
        let other = clock.clone();
        clock.advance(Duration::from_millis(1500));
        assert_eq!(other.now(), Duration::from_millis(1500));
        assert!((other.wall_time() - 101.5).abs() < 1e-9);
        assert_eq!(other.epoch_millis(), 101_500);
    }

    #[test]
    fn system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
        assert!(clock.wall_time() > 1_600_000_000.0);
    }
}
