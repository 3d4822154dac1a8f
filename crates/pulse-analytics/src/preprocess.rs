//! Series preprocessing: validation, missing-value handling, interval
//! analysis, grid normalization, and outlier removal.

use chrono::Duration;
use serde::Serialize;

use pulse_core::{Error, Result, TimeSeriesPoint};

use crate::stats::{mean, std_dev};

#[derive(Debug, Clone)]
pub struct PreprocessOptions {
    /// Fill NaN values by linear interpolation between the nearest
    /// non-missing neighbors (edges copy the nearest value)
    pub fill_missing_values: bool,
    /// Drop points whose |z-score| exceeds `outlier_threshold`
    pub remove_outliers: bool,
    pub outlier_threshold: f64,
    /// Reindex onto a regular grid of `expected_interval`
    pub normalize_timestamps: bool,
    pub expected_interval: Option<Duration>,
}

impl Default for PreprocessOptions {
    fn default() -> Self {
        Self {
            fill_missing_values: false,
            remove_outliers: false,
            outlier_threshold: 3.0,
            normalize_timestamps: false,
            expected_interval: None,
        }
    }
}

impl PreprocessOptions {
    pub fn filled() -> Self {
        Self {
            fill_missing_values: true,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Gap statistics between consecutive timestamps.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct IntervalStats {
    pub min_ms: i64,
    pub max_ms: i64,
    pub mean_ms: f64,
    pub is_regular: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SeriesMetadata {
    pub original_length: usize,
    pub processed_length: usize,
    pub has_missing_values: bool,
    pub has_outliers: bool,
    pub time_interval: Option<IntervalStats>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PreprocessResult {
    pub data: Vec<TimeSeriesPoint>,
    pub validation: ValidationReport,
    pub metadata: SeriesMetadata,
}

/// Run the preprocessing pipeline. Output length equals input length
/// unless outlier removal or grid normalization is requested, and
/// output timestamps are non-decreasing.
pub fn preprocess(series: &[TimeSeriesPoint], options: &PreprocessOptions) -> Result<PreprocessResult> {
    if series.is_empty() {
        return Err(Error::validation("empty time series"));
    }
    if series.iter().any(|p| p.value.is_infinite()) {
        return Err(Error::validation("time series contains non-finite values"));
    }

    let original_length = series.len();
    let mut warnings = Vec::new();

    // stable sort keeps the relative order of equal timestamps
    let mut data = series.to_vec();
    data.sort_by_key(|p| p.timestamp);

    let missing = data.iter().filter(|p| p.is_missing()).count();
    let has_missing_values = missing > 0;
    if has_missing_values {
        warnings.push(format!("{} missing values detected", missing));
        if options.fill_missing_values {
            fill_missing(&mut data);
        }
    }

    let time_interval = interval_stats(&data);
    if let Some(stats) = &time_interval {
        if !stats.is_regular {
            warnings.push("irregular time intervals detected".to_string());
        }
    }

    if options.normalize_timestamps {
        if let Some(expected) = options.expected_interval {
            data = normalize_grid(&data, expected);
        }
    }

    let mut has_outliers = false;
    if options.remove_outliers {
        let filled: Vec<f64> = data.iter().filter(|p| !p.is_missing()).map(|p| p.value).collect();
        let m = mean(&filled);
        let sd = std_dev(&filled, m);
        if sd > 0.0 {
            let before = data.len();
            data.retain(|p| p.is_missing() || ((p.value - m) / sd).abs() <= options.outlier_threshold);
            has_outliers = data.len() < before;
            if has_outliers {
                warnings.push(format!("{} outliers removed", before - data.len()));
            }
        }
    }

    Ok(PreprocessResult {
        metadata: SeriesMetadata {
            original_length,
            processed_length: data.len(),
            has_missing_values,
            has_outliers,
            time_interval,
        },
        validation: ValidationReport {
            is_valid: true,
            errors: Vec::new(),
            warnings,
        },
        data,
    })
}

/// Linear interpolation between the nearest non-missing neighbors;
/// missing edges copy the nearest observed value.
fn fill_missing(data: &mut [TimeSeriesPoint]) {
    let known: Vec<usize> = data
        .iter()
        .enumerate()
        .filter(|(_, p)| !p.is_missing())
        .map(|(i, _)| i)
        .collect();
    if known.is_empty() {
        return;
    }

    for i in 0..data.len() {
        if !data[i].is_missing() {
            continue;
        }
        let prev = known.iter().rev().find(|&&k| k < i).copied();
        let next = known.iter().find(|&&k| k > i).copied();
        data[i].value = match (prev, next) {
            (Some(a), Some(b)) => {
                let span = (data[b].timestamp - data[a].timestamp).num_milliseconds() as f64;
                if span <= 0.0 {
                    data[a].value
                } else {
                    let offset = (data[i].timestamp - data[a].timestamp).num_milliseconds() as f64;
                    data[a].value + (data[b].value - data[a].value) * (offset / span)
                }
            }
            (Some(a), None) => data[a].value,
            (None, Some(b)) => data[b].value,
            (None, None) => unreachable!("known is non-empty"),
        };
    }
}

fn interval_stats(data: &[TimeSeriesPoint]) -> Option<IntervalStats> {
    if data.len() < 2 {
        return None;
    }
    let gaps: Vec<i64> = data
        .windows(2)
        .map(|w| (w[1].timestamp - w[0].timestamp).num_milliseconds())
        .collect();
    let min_ms = gaps.iter().copied().min().unwrap_or(0);
    let max_ms = gaps.iter().copied().max().unwrap_or(0);
    let mean_ms = gaps.iter().sum::<i64>() as f64 / gaps.len() as f64;
    // spread within 10% of the mean gap counts as regular
    let is_regular = mean_ms > 0.0 && (max_ms - min_ms) as f64 <= mean_ms * 0.1;
    Some(IntervalStats {
        min_ms,
        max_ms,
        mean_ms,
        is_regular,
    })
}

/// Reindex onto a regular grid starting at the first timestamp,
/// interpolating values at grid points and extending edges.
fn normalize_grid(data: &[TimeSeriesPoint], step: Duration) -> Vec<TimeSeriesPoint> {
    if data.len() < 2 || step <= Duration::zero() {
        return data.to_vec();
    }

    let first = data[0].timestamp;
    let last = data[data.len() - 1].timestamp;
    let steps = ((last - first).num_milliseconds() / step.num_milliseconds()).max(0);

    (0..=steps)
        .map(|k| {
            let ts = first + step * k as i32;
            TimeSeriesPoint::new(ts, value_at(data, ts))
        })
        .collect()
}

fn value_at(data: &[TimeSeriesPoint], ts: chrono::DateTime<chrono::Utc>) -> f64 {
    match data.iter().position(|p| p.timestamp >= ts) {
        Some(0) => data[0].value,
        Some(i) => {
            let a = &data[i - 1];
            let b = &data[i];
            if b.timestamp == ts {
                return b.value;
            }
            let span = (b.timestamp - a.timestamp).num_milliseconds() as f64;
            if span <= 0.0 {
                return a.value;
            }
            let offset = (ts - a.timestamp).num_milliseconds() as f64;
            a.value + (b.value - a.value) * (offset / span)
        }
        None => data[data.len() - 1].value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn daily(values: &[f64]) -> Vec<TimeSeriesPoint> {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        values
            .iter()
            .enumerate()
            .map(|(i, v)| TimeSeriesPoint::new(start + Duration::days(i as i64), *v))
            .collect()
    }

    #[test]
    fn rejects_empty_input() {
        assert!(preprocess(&[], &PreprocessOptions::default()).is_err());
    }

    #[test]
    fn rejects_infinite_values() {
        let series = daily(&[1.0, f64::INFINITY, 3.0]);
        assert!(preprocess(&series, &PreprocessOptions::default()).is_err());
    }

    #[test]
    fn sorts_by_timestamp() {
        let mut series = daily(&[1.0, 2.0, 3.0]);
        series.swap(0, 2);
        let result = preprocess(&series, &PreprocessOptions::default()).unwrap();
        let values: Vec<f64> = result.data.iter().map(|p| p.value).collect();
        assert_eq!(values, vec![1.0, 2.0, 3.0]);
        assert!(result
            .data
            .windows(2)
            .all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn length_preserved_without_removal_options() {
        let series = daily(&[1.0, f64::NAN, 3.0, 100.0, 5.0]);
        let result = preprocess(&series, &PreprocessOptions::filled()).unwrap();
        assert_eq!(result.data.len(), series.len());
        assert_eq!(result.metadata.original_length, 5);
        assert_eq!(result.metadata.processed_length, 5);
    }

    #[test]
    fn interior_gaps_interpolate_linearly() {
        let series = daily(&[10.0, f64::NAN, 30.0]);
        let result = preprocess(&series, &PreprocessOptions::filled()).unwrap();
        assert!((result.data[1].value - 20.0).abs() < 1e-9);
        assert!(result.metadata.has_missing_values);
    }

    #[test]
    fn edge_gaps_copy_nearest() {
        let series = daily(&[f64::NAN, 7.0, 9.0, f64::NAN]);
        let result = preprocess(&series, &PreprocessOptions::filled()).unwrap();
        assert_eq!(result.data[0].value, 7.0);
        assert_eq!(result.data[3].value, 9.0);
    }

    #[test]
    fn missing_values_left_when_not_filling() {
        let series = daily(&[1.0, f64::NAN, 3.0]);
        let result = preprocess(&series, &PreprocessOptions::default()).unwrap();
        assert!(result.data[1].is_missing());
        assert!(!result.validation.warnings.is_empty());
    }

    #[test]
    fn interval_analysis_flags_irregularity() {
        let mut series = daily(&[1.0, 2.0, 3.0, 4.0]);
        assert!(
            preprocess(&series, &PreprocessOptions::default())
                .unwrap()
                .metadata
                .time_interval
                .unwrap()
                .is_regular
        );

        series[2].timestamp = series[2].timestamp + Duration::hours(9);
        let stats = preprocess(&series, &PreprocessOptions::default())
            .unwrap()
            .metadata
            .time_interval
            .unwrap();
        assert!(!stats.is_regular);
    }

    #[test]
    fn outliers_removed_above_threshold() {
        let series = daily(&[10.0, 11.0, 9.0, 10.5, 500.0, 10.2, 9.8, 10.1, 10.4, 9.9]);
        let options = PreprocessOptions {
            remove_outliers: true,
            outlier_threshold: 2.0,
            ..Default::default()
        };
        let result = preprocess(&series, &options).unwrap();
        assert_eq!(result.data.len(), series.len() - 1);
        assert!(result.metadata.has_outliers);
        assert!(result.data.iter().all(|p| p.value < 100.0));
    }

    #[test]
    fn constant_series_has_no_outliers() {
        let series = daily(&[5.0; 6]);
        let options = PreprocessOptions {
            remove_outliers: true,
            ..Default::default()
        };
        let result = preprocess(&series, &options).unwrap();
        assert_eq!(result.data.len(), 6);
        assert!(!result.metadata.has_outliers);
    }

    #[test]
    fn grid_normalization_reindexes() {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let series = vec![
            TimeSeriesPoint::new(start, 0.0),
            TimeSeriesPoint::new(start + Duration::hours(36), 36.0),
            TimeSeriesPoint::new(start + Duration::hours(48), 48.0),
        ];
        let options = PreprocessOptions {
            normalize_timestamps: true,
            expected_interval: Some(Duration::days(1)),
            ..Default::default()
        };
        let result = preprocess(&series, &options).unwrap();
        assert_eq!(result.data.len(), 3);
        assert_eq!(result.data[1].timestamp, start + Duration::days(1));
        // value at the 24h grid point interpolates on the 0→36h segment
        assert!((result.data[1].value - 24.0).abs() < 1e-9);
        assert!((result.data[2].value - 48.0).abs() < 1e-9);
    }
}
