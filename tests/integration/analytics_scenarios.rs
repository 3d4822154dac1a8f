//! End-to-end checks of the analytics pipeline over synthetic series:
//! forecasting, anomaly detection, correlation, and the preprocessing
//! invariants the dashboard relies on.

use chrono::{Duration, TimeZone, Utc};

use pulse_analytics::forecast::{linear_regression, moving_average, naive};
use pulse_analytics::{
    calculate_correlation, detect_anomalies, extract_trend, lttb, preprocess, PreprocessOptions,
};
use pulse_core::{Interval, TimeSeriesPoint};

fn daily(values: &[f64]) -> Vec<TimeSeriesPoint> {
    let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
    values
        .iter()
        .enumerate()
        .map(|(i, v)| TimeSeriesPoint::new(start + Duration::days(i as i64), *v))
        .collect()
}

#[test]
fn naive_forecast_scenario() {
    let history = daily(&[10.0, 12.0, 11.0, 13.0, 15.0]);
    let f = naive(&history, 3, Interval::Day).unwrap();

    assert_eq!(f.method, "naive");
    assert_eq!(f.forecast.len(), 3);
    for p in &f.forecast {
        assert_eq!(p.value, 15.0);
    }
    for (upper, lower) in f.confidence.upper.iter().zip(&f.confidence.lower) {
        assert!((upper - 18.37).abs() < 0.01);
        assert!((lower - 11.63).abs() < 0.01);
    }
}

#[test]
fn moving_average_forecast_scenario() {
    let history = daily(&[10.0, 12.0, 11.0, 13.0, 15.0, 14.0, 16.0]);
    let f = moving_average(&history, 3, 2, Interval::Day).unwrap();

    assert_eq!(f.method, "moving_average");
    assert_eq!(f.forecast.len(), 2);
    for p in &f.forecast {
        assert!((p.value - 15.0).abs() < 1e-9);
    }
}

#[test]
fn linear_regression_forecast_scenario() {
    let history = daily(&[10.0, 12.0, 14.0, 16.0, 18.0]);
    let f = linear_regression(&history, 3, Interval::Day).unwrap();

    let expected = [20.0, 22.0, 24.0];
    for (p, want) in f.forecast.iter().zip(expected) {
        assert!((p.value - want).abs() < 0.1);
    }
    assert!((f.accuracy - 1.0).abs() < 1e-6);
}

#[test]
fn forecast_interval_invariants() {
    let history = daily(&[4.0, 8.0, 6.0, 10.0, 7.0, 12.0, 9.0]);
    for f in [
        naive(&history, 5, Interval::Day).unwrap(),
        moving_average(&history, 3, 5, Interval::Day).unwrap(),
        linear_regression(&history, 5, Interval::Day).unwrap(),
    ] {
        assert_eq!(f.forecast.len(), 5);
        for (i, p) in f.forecast.iter().enumerate() {
            assert!(f.confidence.upper[i] >= p.value);
            assert!(f.confidence.lower[i] <= p.value);
            assert!(f.confidence.lower[i] >= 0.0);
        }
    }
}

#[test]
fn anomaly_detection_scenario() {
    let series = daily(&[10.0, 12.0, 11.0, 50.0, 13.0]);
    let anomalies = detect_anomalies(&series, 1.95, None);
    assert_eq!(anomalies.len(), 1);
    assert_eq!(anomalies[0].value, 50.0);

    // constant input never flags
    assert!(detect_anomalies(&daily(&[5.0; 8]), 0.1, None).is_empty());
}

#[test]
fn correlation_scenarios() {
    let s1 = daily(&[1.0, 2.0, 3.0, 4.0, 5.0]);
    let s2 = daily(&[2.0, 4.0, 6.0, 8.0, 10.0]);
    let (r, _) = calculate_correlation(&s1, &s2, false).unwrap();
    assert!((r - 1.0).abs() < 1e-12);

    let reversed = daily(&[5.0, 4.0, 3.0, 2.0, 1.0]);
    let (r, _) = calculate_correlation(&reversed, &s2, false).unwrap();
    assert!((r + 1.0).abs() < 1e-12);
}

#[test]
fn preprocess_invariants() {
    let series = daily(&[3.0, f64::NAN, 7.0, 5.0, f64::NAN, 9.0]);
    let result = preprocess(&series, &PreprocessOptions::filled()).unwrap();

    // length preserved when nothing is removed
    assert_eq!(result.data.len(), series.len());
    // timestamps non-decreasing
    assert!(result
        .data
        .windows(2)
        .all(|w| w[0].timestamp <= w[1].timestamp));
    // all gaps filled
    assert!(result.data.iter().all(|p| !p.value.is_nan()));
}

#[test]
fn trend_matches_series_shape() {
    let series = daily(&[2.0, 9.0, 4.0, 11.0, 6.0, 13.0, 8.0, 15.0]);
    let trend = extract_trend(&series, 4);
    assert_eq!(trend.len(), series.len());
    for (t, o) in trend.iter().zip(&series) {
        assert_eq!(t.timestamp, o.timestamp);
    }
}

#[test]
fn downsampling_bounds_chart_payloads() {
    let values: Vec<f64> = (0..1000).map(|i| ((i % 37) as f64) * 1.5).collect();
    let series = daily(&values);
    let reduced = lttb(&series, 100);
    assert_eq!(reduced.len(), 100);
    assert_eq!(reduced[0], series[0]);
    assert_eq!(reduced[99], series[999]);
}
