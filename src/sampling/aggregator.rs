//! Downsampling aggregator.
//!
//! Turns a raw scalar stream (one value per ~100 ms) into a bounded,
//! time-anchored point series for live display. One aggregator per tracked
//! quantity (amplitude, stress, ...).
//!
//! # State Machine
//!
//! ```text
//!   Idle ──push──▶ Accumulating ──(samples_per_point reached)──▶ Flushed
//!                      ▲                                  └──▶ WindowFull
//!                      └──────────────── push ─────────────────────┘
//! ```
//!
//! - Every `samples_per_point` raw values are averaged (unweighted mean) into
//!   one point. If `y_wrap` is set the mean is stored modulo `y_wrap`.
//! - When the active window is full, the next raw sample starts a fresh
//!   window anchored at the clock's current time. Nothing is carried over.
//! - Changing the window duration keeps the newest points (rescaled into the
//!   new window) and never touches the partial-sample accumulator.
//!
//! # Thread Safety
//!
//! All state sits behind one mutex, so [`SamplingAggregator::current_points`]
//! from a display thread sees either the state before or after a push, never
//! a torn window.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::clock::{Clock, SystemClock};
use super::window::{Point, Window, WindowDuration, MAX_POINTS_PER_MINUTE};
use crate::error::{AppResult, DaqError};

/// Aggregator parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AggregatorConfig {
    /// Raw samples averaged into one point
    pub samples_per_point: usize,
    /// Points per minute of window; capacity is `minutes * points_per_minute`
    pub points_per_minute: f64,
    /// Initial window length
    pub duration: WindowDuration,
    /// Axis span; stored values are `mean % y_wrap` when set
    pub y_wrap: Option<f64>,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            samples_per_point: 5,
            points_per_minute: 60.0,
            duration: WindowDuration::Five,
            y_wrap: None,
        }
    }
}

impl AggregatorConfig {
    /// Checks the parameters.
    pub fn validate(&self) -> AppResult<()> {
        if self.samples_per_point == 0 {
            return Err(DaqError::Configuration(
                "samples_per_point must be greater than zero".into(),
            ));
        }
        let ppm = self.points_per_minute;
        if !ppm.is_finite() || ppm <= 0.0 || ppm > MAX_POINTS_PER_MINUTE {
            return Err(DaqError::Configuration(format!(
                "points_per_minute must be in (0, {MAX_POINTS_PER_MINUTE}], got {ppm}"
            )));
        }
        if let Some(wrap) = self.y_wrap {
            if !wrap.is_finite() || wrap <= 0.0 {
                return Err(DaqError::Configuration(format!(
                    "y_wrap must be a positive number, got {wrap}"
                )));
            }
        }
        Ok(())
    }

    /// Window capacity at the configured duration.
    pub fn capacity(&self) -> usize {
        self.duration.capacity(self.points_per_minute)
    }
}

/// Where the aggregator is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregatorState {
    /// No sample since construction or the last reset
    Idle,
    /// A partial point is being accumulated
    Accumulating,
    /// A point was just emitted and the window has room
    Flushed,
    /// A point was just emitted and filled the window
    WindowFull,
}

/// Consistent copy of an aggregator's state.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowSnapshot {
    /// Anchor time of the active window
    pub anchor: f64,
    /// Active window length
    pub duration: WindowDuration,
    /// Active window capacity
    pub capacity: usize,
    /// Points of the active window
    pub points: Vec<Point>,
    /// Raw samples waiting for the next point
    pub pending_samples: usize,
    /// Cycle state
    pub state: AggregatorState,
    /// Number of windows started, counting the first
    pub window_count: u64,
}

struct Inner {
    config: AggregatorConfig,
    window: Window,
    sum: f64,
    count: usize,
    state: AggregatorState,
    window_count: u64,
}

/// Windowed downsampler for one quantity.
pub struct SamplingAggregator {
    name: String,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
}

impl SamplingAggregator {
    /// Creates an aggregator whose first window is anchored at `clock.now()`.
    pub fn new(name: impl Into<String>, config: AggregatorConfig, clock: Arc<dyn Clock>) -> AppResult<Self> {
        config.validate()?;
        let window = Window::new(clock.now(), config.duration, config.points_per_minute);
        Ok(Self {
            name: name.into(),
            clock,
            inner: Mutex::new(Inner {
                config,
                window,
                sum: 0.0,
                count: 0,
                state: AggregatorState::Idle,
                window_count: 1,
            }),
        })
    }

    /// Creates an aggregator on the local wall clock.
    pub fn with_system_clock(name: impl Into<String>, config: AggregatorConfig) -> AppResult<Self> {
        Self::new(name, config, Arc::new(SystemClock))
    }

    /// Quantity name used in logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current parameters (duration reflects `set_window_duration`).
    pub fn config(&self) -> AggregatorConfig {
        self.inner.lock().config
    }

    /// Feeds one raw value. Returns the point emitted by this sample, if any.
    pub fn push_sample(&self, value: f64) -> Option<Point> {
        let mut inner = self.inner.lock();

        if inner.window.is_full() {
            let anchor = self.clock.now();
            let (duration, ppm) = (inner.config.duration, inner.config.points_per_minute);
            inner.window = Window::new(anchor, duration, ppm);
            inner.window_count += 1;
            debug!(quantity = %self.name, anchor, window = inner.window_count, "Started new window");
        }

        inner.sum += value;
        inner.count += 1;
        inner.state = AggregatorState::Accumulating;

        if inner.count < inner.config.samples_per_point {
            return None;
        }

        let mean = inner.sum / inner.config.samples_per_point as f64;
        let y = match inner.config.y_wrap {
            Some(wrap) => mean % wrap,
            None => mean,
        };
        inner.sum = 0.0;
        inner.count = 0;

        let point = inner.window.push(y);
        inner.state = if inner.window.is_full() {
            AggregatorState::WindowFull
        } else {
            AggregatorState::Flushed
        };
        point
    }

    /// Switches the window length.
    ///
    /// Existing points are carried into a fresh window of the new duration
    /// (newest kept, re-spaced at the new step). The partial accumulator is
    /// left alone. Setting the current duration does nothing.
    pub fn set_window_duration(&self, duration: WindowDuration) {
        let mut inner = self.inner.lock();
        if inner.config.duration == duration {
            return;
        }

        let rescaled = inner.window.rescaled(duration, inner.config.points_per_minute);
        let dropped = inner.window.len() - rescaled.len();
        inner.window = rescaled;
        inner.config.duration = duration;
        if matches!(inner.state, AggregatorState::Flushed | AggregatorState::WindowFull) {
            inner.state = if inner.window.is_full() {
                AggregatorState::WindowFull
            } else {
                AggregatorState::Flushed
            };
        }

        debug!(quantity = %self.name, %duration, dropped, "Window duration changed");
    }

    /// Like [`set_window_duration`](Self::set_window_duration), from minutes.
    pub fn set_window_minutes(&self, minutes: u32) -> AppResult<()> {
        self.set_window_duration(WindowDuration::try_from(minutes)?);
        Ok(())
    }

    /// Snapshot of the active window's points.
    pub fn current_points(&self) -> Vec<Point> {
        self.inner.lock().window.points().to_vec()
    }

    /// Consistent snapshot of the whole aggregator.
    pub fn snapshot(&self) -> WindowSnapshot {
        let inner = self.inner.lock();
        WindowSnapshot {
            anchor: inner.window.anchor(),
            duration: inner.window.duration(),
            capacity: inner.window.capacity(),
            points: inner.window.points().to_vec(),
            pending_samples: inner.count,
            state: inner.state,
            window_count: inner.window_count,
        }
    }

    /// Raw samples accumulated toward the next point.
    pub fn pending_samples(&self) -> usize {
        self.inner.lock().count
    }

    /// Cycle state.
    pub fn state(&self) -> AggregatorState {
        self.inner.lock().state
    }

    /// Drops every point and the partial accumulator and anchors a new
    /// window at the current time.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        let (duration, ppm) = (inner.config.duration, inner.config.points_per_minute);
        inner.window = Window::new(self.clock.now(), duration, ppm);
        inner.sum = 0.0;
        inner.count = 0;
        inner.state = AggregatorState::Idle;
        inner.window_count += 1;
    }
}

impl fmt::Debug for SamplingAggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("SamplingAggregator")
            .field("name", &self.name)
            .field("state", &inner.state)
            .field("points", &inner.window.len())
            .field("capacity", &inner.window.capacity())
            .field("pending", &inner.count)
            .finish()
    }
}
