//! End-to-end scenarios for the downsampling aggregator
//!
//! Uses a ManualClock so window anchors and point positions are exact.

use std::sync::Arc;
use std::thread;

use ultrasonic_daq::config::SamplingConfig;
use ultrasonic_daq::sampling::{
    AggregatorConfig, AggregatorState, Clock, ManualClock, SamplingAggregator, WindowDuration,
};

const EPS: f64 = 1e-12;

/// Five samples per point and 0.6 points per minute: a 5 minute window
/// holds exactly three points.
fn three_point_config() -> AggregatorConfig {
    AggregatorConfig {
        samples_per_point: 5,
        points_per_minute: 0.6,
        duration: WindowDuration::Five,
        y_wrap: None,
    }
}

fn feed(aggregator: &SamplingAggregator, value: f64, times: usize) {
    for _ in 0..times {
        aggregator.push_sample(value);
    }
}

// =============================================================================
// Window lifecycle
// =============================================================================

#[test]
fn test_fifteen_samples_fill_window_then_rollover() {
    let t0 = 0.5;
    let clock = Arc::new(ManualClock::new(t0));
    let aggregator = SamplingAggregator::new("amplitude", three_point_config(), clock.clone()).unwrap();
    let step = WindowDuration::Five.fraction_of_day() / 3.0;

    feed(&aggregator, 10.0, 5);
    feed(&aggregator, 20.0, 5);
    feed(&aggregator, 30.0, 5);

    let points = aggregator.current_points();
    assert_eq!(points.len(), 3);
    for (i, (point, expected)) in points.iter().zip([10.0, 20.0, 30.0]).enumerate() {
        assert!((point.x - (t0 + i as f64 * step)).abs() < EPS);
        assert!((point.y - expected).abs() < EPS);
    }
    assert_eq!(aggregator.state(), AggregatorState::WindowFull);

    // The window stays full and visible until the next raw sample.
    clock.advance_minutes(7.0);
    assert_eq!(aggregator.current_points().len(), 3);

    assert_eq!(aggregator.push_sample(40.0), None);
    let snapshot = aggregator.snapshot();
    assert!(snapshot.points.is_empty());
    assert!((snapshot.anchor - clock.now()).abs() < EPS);
    assert_eq!(snapshot.pending_samples, 1);
    assert_eq!(snapshot.window_count, 2);
    assert_eq!(snapshot.state, AggregatorState::Accumulating);
}

#[test]
fn test_partial_point_is_never_visible() {
    let aggregator = SamplingAggregator::new(
        "stress",
        three_point_config(),
        Arc::new(ManualClock::new(0.25)),
    )
    .unwrap();

    feed(&aggregator, 1.0, 4);
    assert!(aggregator.current_points().is_empty());
    assert_eq!(aggregator.pending_samples(), 4);

    let point = aggregator.push_sample(6.0).unwrap();
    assert!((point.y - 2.0).abs() < EPS);
    assert!((point.x - 0.25).abs() < EPS);
    assert_eq!(aggregator.pending_samples(), 0);
}

// =============================================================================
// Duration changes
// =============================================================================

#[test]
fn test_longer_window_keeps_points_and_respaces() {
    let t0 = 0.4;
    let aggregator = SamplingAggregator::new(
        "amplitude",
        three_point_config(),
        Arc::new(ManualClock::new(t0)),
    )
    .unwrap();
    feed(&aggregator, 10.0, 5);
    feed(&aggregator, 20.0, 5);
    feed(&aggregator, 30.0, 2);

    aggregator.set_window_duration(WindowDuration::Ten);

    let snapshot = aggregator.snapshot();
    assert_eq!(snapshot.capacity, 6);
    assert_eq!(snapshot.pending_samples, 2);
    let step = WindowDuration::Ten.fraction_of_day() / 6.0;
    let ys: Vec<f64> = snapshot.points.iter().map(|p| p.y).collect();
    assert_eq!(ys, vec![10.0, 20.0]);
    assert!((snapshot.points[1].x - (t0 + step)).abs() < EPS);

    // The carried partial point completes in the new window.
    feed(&aggregator, 30.0, 3);
    assert_eq!(aggregator.current_points().len(), 3);
    assert!((aggregator.current_points()[2].y - 30.0).abs() < EPS);
}

#[test]
fn test_shorter_window_keeps_newest() {
    let config = AggregatorConfig {
        samples_per_point: 1,
        points_per_minute: 0.6,
        duration: WindowDuration::Ten,
        y_wrap: None,
    };
    let aggregator = SamplingAggregator::new("amplitude", config, Arc::new(ManualClock::new(0.0))).unwrap();
    for value in 1..=6 {
        aggregator.push_sample(f64::from(value));
    }
    let fifth_x = aggregator.current_points()[3].x;

    aggregator.set_window_minutes(5).unwrap();

    let points = aggregator.current_points();
    let ys: Vec<f64> = points.iter().map(|p| p.y).collect();
    assert_eq!(ys, vec![4.0, 5.0, 6.0]);
    assert!((points[0].x - fifth_x).abs() < EPS);
    assert_eq!(aggregator.state(), AggregatorState::WindowFull);
}

#[test]
fn test_unsupported_minutes_rejected() {
    let aggregator = SamplingAggregator::new(
        "amplitude",
        three_point_config(),
        Arc::new(ManualClock::new(0.0)),
    )
    .unwrap();
    assert!(aggregator.set_window_minutes(15).is_err());
    assert_eq!(aggregator.config().duration, WindowDuration::Five);
}

// =============================================================================
// Configuration and wrapping
// =============================================================================

#[test]
fn test_y_wrap_from_sampling_config() {
    let mut sampling = SamplingConfig::default();
    sampling.samples_per_point = 2;
    sampling.y_wrap.insert("phase".to_string(), 360.0);

    let config = sampling.aggregator_config("phase").unwrap();
    assert_eq!(config.y_wrap, Some(360.0));
    assert_eq!(sampling.aggregator_config("amplitude").unwrap().y_wrap, None);

    let aggregator = SamplingAggregator::new("phase", config, Arc::new(ManualClock::new(0.0))).unwrap();
    aggregator.push_sample(350.0);
    let point = aggregator.push_sample(410.0).unwrap();
    assert!((point.y - 20.0).abs() < EPS);
}

#[test]
fn test_invalid_config_rejected() {
    let config = AggregatorConfig {
        samples_per_point: 0,
        ..AggregatorConfig::default()
    };
    assert!(SamplingAggregator::new("bad", config, Arc::new(ManualClock::new(0.0))).is_err());
}

// =============================================================================
// Concurrency
// =============================================================================

#[test]
fn test_snapshots_are_never_torn() {
    let config = AggregatorConfig {
        samples_per_point: 1,
        points_per_minute: 60.0,
        duration: WindowDuration::Five,
        y_wrap: None,
    };
    let aggregator = Arc::new(SamplingAggregator::new("amplitude", config, Arc::new(ManualClock::new(0.0))).unwrap());

    let producer = {
        let aggregator = aggregator.clone();
        thread::spawn(move || {
            for i in 0..5_000 {
                aggregator.push_sample(f64::from(i));
            }
        })
    };

    while !producer.is_finished() {
        let snapshot = aggregator.snapshot();
        assert!(snapshot.points.len() <= snapshot.capacity);
        for pair in snapshot.points.windows(2) {
            assert!(pair[0].x < pair[1].x);
            assert!(pair[0].y < pair[1].y);
        }
    }
    producer.join().unwrap();
}
