//! Time sources for window anchoring.
//!
//! Window x-coordinates are fractional days: `0.0` is midnight and `0.5`
//! is noon. Only the time of day varies; the calendar date is dropped.

use chrono::{Local, NaiveTime, Timelike};
use parking_lot::Mutex;

/// Minutes in one day.
pub const MINUTES_PER_DAY: f64 = 1440.0;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Source of the current time as a fractional day.
pub trait Clock: Send + Sync {
    /// Current time of day in `[0.0, 1.0)`.
    fn now(&self) -> f64;
}

/// Converts a wall-clock time of day to a fractional day.
pub fn fraction_of_day(time: NaiveTime) -> f64 {
    let seconds = f64::from(time.num_seconds_from_midnight());
    let nanos = f64::from(time.nanosecond().min(999_999_999));
    (seconds + nanos / 1e9) / SECONDS_PER_DAY
}

/// Local wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        fraction_of_day(Local::now().time())
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<f64>,
}

impl ManualClock {
    /// Clock frozen at `start`.
    pub fn new(start: f64) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Sets the current time.
    pub fn set(&self, now: f64) {
        *self.now.lock() = now;
    }

    /// Moves the clock forward by `minutes`.
    pub fn advance_minutes(&self, minutes: f64) {
        *self.now.lock() += minutes / MINUTES_PER_DAY;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        *self.now.lock()
    }
}
