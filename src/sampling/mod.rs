//! Telemetry downsampling and windowing.
//!
//! - [`clock`]: fractional-day time sources
//! - [`window`]: bounded, time-anchored point windows
//! - [`aggregator`]: the per-quantity downsampler fed by the reader thread

pub mod aggregator;
pub mod clock;
pub mod window;

pub use aggregator::{AggregatorConfig, AggregatorState, SamplingAggregator, WindowSnapshot};
pub use clock::{Clock, ManualClock, SystemClock};
pub use window::{Point, Window, WindowDuration, MAX_POINTS_PER_MINUTE};
