//! Time-anchored point windows.
//!
//! A [`Window`] holds at most `capacity` downsampled points. Point `i` sits
//! at `x = anchor + i * step` where
//! `step = duration_minutes / 1440 / capacity` (fractional days).

use std::fmt;

use serde::{Deserialize, Serialize};

use super::clock::MINUTES_PER_DAY;
use crate::error::DaqError;

/// Highest accepted `points_per_minute` (ten points per second). A 60 minute
/// window at this rate holds 36 000 points.
pub const MAX_POINTS_PER_MINUTE: f64 = 600.0;

/// Points reserved up front when a window is created; longer windows grow
/// on demand.
const PREALLOCATED_POINTS: usize = 4096;

/// Supported window lengths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum WindowDuration {
    /// 5 minutes
    #[default]
    Five,
    /// 10 minutes
    Ten,
    /// 30 minutes
    Thirty,
    /// 60 minutes
    Sixty,
}

impl WindowDuration {
    /// Every supported duration, shortest first.
    pub const ALL: [WindowDuration; 4] = [
        WindowDuration::Five,
        WindowDuration::Ten,
        WindowDuration::Thirty,
        WindowDuration::Sixty,
    ];

    /// Length in minutes.
    pub const fn minutes(self) -> u32 {
        match self {
            WindowDuration::Five => 5,
            WindowDuration::Ten => 10,
            WindowDuration::Thirty => 30,
            WindowDuration::Sixty => 60,
        }
    }

    /// Length as a fraction of a day.
    pub fn fraction_of_day(self) -> f64 {
        f64::from(self.minutes()) / MINUTES_PER_DAY
    }

    /// Number of points that fit at `points_per_minute`, never less than one.
    pub fn capacity(self, points_per_minute: f64) -> usize {
        let raw = (f64::from(self.minutes()) * points_per_minute).round();
        if raw.is_finite() && raw >= 1.0 {
            raw as usize
        } else {
            1
        }
    }
}

impl TryFrom<u32> for WindowDuration {
    type Error = DaqError;

    fn try_from(minutes: u32) -> Result<Self, Self::Error> {
        WindowDuration::ALL
            .into_iter()
            .find(|d| d.minutes() == minutes)
            .ok_or_else(|| {
                DaqError::Configuration(format!(
                    "Unsupported window duration {minutes} min. Must be one of: 5, 10, 30, 60"
                ))
            })
    }
}

impl From<WindowDuration> for u32 {
    fn from(duration: WindowDuration) -> Self {
        duration.minutes()
    }
}

impl fmt::Display for WindowDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} min", self.minutes())
    }
}

/// One downsampled point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Time of day as a fractional day
    pub x: f64,
    /// Averaged value
    pub y: f64,
}

/// Bounded run of points anchored at a start time.
#[derive(Debug, Clone, PartialEq)]
pub struct Window {
    anchor: f64,
    duration: WindowDuration,
    capacity: usize,
    points: Vec<Point>,
}

impl Window {
    /// Empty window starting at `anchor`.
    pub fn new(anchor: f64, duration: WindowDuration, points_per_minute: f64) -> Self {
        let capacity = duration.capacity(points_per_minute);
        Self {
            anchor,
            duration,
            capacity,
            points: Vec::with_capacity(capacity.min(PREALLOCATED_POINTS)),
        }
    }

    /// Start time.
    pub fn anchor(&self) -> f64 {
        self.anchor
    }

    /// Window length.
    pub fn duration(&self) -> WindowDuration {
        self.duration
    }

    /// Maximum number of points.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Distance between consecutive points, in fractional days.
    pub fn step(&self) -> f64 {
        self.duration.fraction_of_day() / self.capacity as f64
    }

    /// Points in x order.
    pub fn points(&self) -> &[Point] {
        &self.points
    }

    /// Number of points written.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Returns true if no point has been written.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Returns true once `capacity` points have been written.
    pub fn is_full(&self) -> bool {
        self.points.len() >= self.capacity
    }

    /// Appends `y` at the next x position. Returns `None` if the window is
    /// full.
    pub fn push(&mut self, y: f64) -> Option<Point> {
        if self.is_full() {
            return None;
        }
        let point = Point {
            x: self.anchor + self.points.len() as f64 * self.step(),
            y,
        };
        self.points.push(point);
        Some(point)
    }

    /// Copies this window's points into a fresh window of `duration`.
    ///
    /// The newest `min(len, new_capacity)` points are kept. The new window
    /// is anchored at the x of the oldest kept point and the kept points are
    /// re-spaced at the new step, keeping their order and y values.
    pub fn rescaled(&self, duration: WindowDuration, points_per_minute: f64) -> Window {
        let mut target = Window::new(self.anchor, duration, points_per_minute);
        let keep = self.points.len().min(target.capacity);
        let kept = &self.points[self.points.len() - keep..];
        if let Some(first) = kept.first() {
            target.anchor = first.x;
        }
        for point in kept {
            target.push(point.y);
        }
        target
    }
}
