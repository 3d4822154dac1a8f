//! Z-score anomaly detection, global and windowed.

use pulse_core::{AnomalyPoint, TimeSeriesPoint};

use crate::stats::{mean, std_dev};

/// Flag points whose |z-score| reaches `threshold`.
///
/// Without a lookback the mean and deviation are computed over the
/// whole series; with one, over the preceding `lookback` points. A
/// constant window (zero deviation) never flags, and series with fewer
/// than 3 points return nothing.
pub fn detect_anomalies(
    series: &[TimeSeriesPoint],
    threshold: f64,
    lookback: Option<usize>,
) -> Vec<AnomalyPoint> {
    if series.len() < 3 {
        return Vec::new();
    }

    match lookback {
        None => detect_global(series, threshold),
        Some(window) if window == 0 => detect_global(series, threshold),
        Some(window) => detect_rolling(series, threshold, window),
    }
}

fn detect_global(series: &[TimeSeriesPoint], threshold: f64) -> Vec<AnomalyPoint> {
    let values: Vec<f64> = series.iter().map(|p| p.value).collect();
    let m = mean(&values);
    let sd = std_dev(&values, m);
    if sd == 0.0 {
        return Vec::new();
    }

    series
        .iter()
        .filter_map(|p| {
            let z = (p.value - m) / sd;
            (z.abs() >= threshold).then(|| AnomalyPoint {
                timestamp: p.timestamp,
                value: p.value,
                z_score: z,
            })
        })
        .collect()
}

fn detect_rolling(series: &[TimeSeriesPoint], threshold: f64, window: usize) -> Vec<AnomalyPoint> {
    let values: Vec<f64> = series.iter().map(|p| p.value).collect();
    let mut anomalies = Vec::new();

    for i in window..series.len() {
        let preceding = &values[i - window..i];
        let m = mean(preceding);
        let sd = std_dev(preceding, m);
        if sd == 0.0 {
            continue;
        }
        let z = (values[i] - m) / sd;
        if z.abs() >= threshold {
            anomalies.push(AnomalyPoint {
                timestamp: series[i].timestamp,
                value: series[i].value,
                z_score: z,
            });
        }
    }

    anomalies
}
