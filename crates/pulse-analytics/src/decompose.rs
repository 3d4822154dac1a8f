//! Trend extraction and seasonal decomposition.

use pulse_core::{Decomposition, TimeSeriesPoint};

/// Centered moving average of width `window`.
///
/// The window is clamped to at least 2 and at most the series length;
/// at the edges it truncates to the available half. A series shorter
/// than the requested window is returned unchanged. Output length and
/// timestamps always match the input.
pub fn extract_trend(series: &[TimeSeriesPoint], window: usize) -> Vec<TimeSeriesPoint> {
    let len = series.len();
    if len < 2 || len < window {
        return series.to_vec();
    }

    let w = window.clamp(2, len);
    let half_left = (w - 1) / 2;
    let half_right = w / 2;

    (0..len)
        .map(|i| {
            let lo = i.saturating_sub(half_left);
            let hi = (i + half_right).min(len - 1);
            let slice = &series[lo..=hi];
            let sum: f64 = slice.iter().map(|p| p.value).sum();
            TimeSeriesPoint::new(series[i].timestamp, sum / slice.len() as f64)
        })
        .collect()
}

/// Additive decomposition into trend, seasonal, and residual
/// components.
///
/// The seasonal component is the period-length average of detrended
/// values, centered and tiled across the series; the residual is then
/// whatever the trend and seasonal components leave over, so
/// `trend + seasonal + residual == original` holds exactly. Empty
/// input yields four empty sequences.
pub fn decompose_series(
    series: &[TimeSeriesPoint],
    window: usize,
    period: usize,
) -> Decomposition {
    if series.is_empty() {
        return Decomposition::default();
    }

    let trend = extract_trend(series, window);
    let detrended: Vec<f64> = series
        .iter()
        .zip(&trend)
        .map(|(o, t)| o.value - t.value)
        .collect();

    let period = period.clamp(1, series.len());
    let mut pattern = vec![0.0; period];
    let mut counts = vec![0usize; period];
    for (i, value) in detrended.iter().enumerate() {
        pattern[i % period] += value;
        counts[i % period] += 1;
    }
    for (slot, count) in pattern.iter_mut().zip(&counts) {
        if *count > 0 {
            *slot /= *count as f64;
        }
    }
    // center so the seasonal component sums to ~zero over one period
    let offset = pattern.iter().sum::<f64>() / period as f64;
    for slot in pattern.iter_mut() {
        *slot -= offset;
    }

    let seasonal: Vec<TimeSeriesPoint> = series
        .iter()
        .enumerate()
        .map(|(i, p)| TimeSeriesPoint::new(p.timestamp, pattern[i % period]))
        .collect();

    let residual: Vec<TimeSeriesPoint> = series
        .iter()
        .zip(&trend)
        .zip(&seasonal)
        .map(|((o, t), s)| TimeSeriesPoint::new(o.timestamp, o.value - t.value - s.value))
        .collect();

    Decomposition {
        original: series.to_vec(),
        trend,
        seasonal,
        residual,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn daily(values: &[f64]) -> Vec<TimeSeriesPoint> {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        values
            .iter()
            .enumerate()
            .map(|(i, v)| TimeSeriesPoint::new(start + Duration::days(i as i64), *v))
            .collect()
    }

    #[test]
    fn trend_preserves_length_and_timestamps() {
        let series = daily(&[1.0, 5.0, 2.0, 8.0, 3.0, 9.0, 4.0]);
        let trend = extract_trend(&series, 3);
        assert_eq!(trend.len(), series.len());
        for (t, o) in trend.iter().zip(&series) {
            assert_eq!(t.timestamp, o.timestamp);
        }
    }

    #[test]
    fn short_series_passes_through() {
        let series = daily(&[4.0, 6.0]);
        let trend = extract_trend(&series, 5);
        assert_eq!(trend, series);
    }

    #[test]
    fn trend_smooths_interior_points() {
        let series = daily(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        let trend = extract_trend(&series, 3);
        // interior of a linear series stays on the line
        assert!((trend[1].value - 2.0).abs() < 1e-9);
        assert!((trend[2].value - 3.0).abs() < 1e-9);
        assert!((trend[3].value - 4.0).abs() < 1e-9);
        // truncated edge windows average what exists
        assert!((trend[0].value - 1.5).abs() < 1e-9);
        assert!((trend[4].value - 4.5).abs() < 1e-9);
    }

    #[test]
    fn decomposition_is_additive() {
        let values: Vec<f64> = (0..28)
            .map(|i| 10.0 + i as f64 * 0.5 + [3.0, -1.0, 0.0, -2.0, 1.5, -0.5, -1.0][i % 7])
            .collect();
        let series = daily(&values);
        let d = decompose_series(&series, 7, 7);

        assert_eq!(d.original.len(), series.len());
        assert_eq!(d.trend.len(), series.len());
        assert_eq!(d.seasonal.len(), series.len());
        assert_eq!(d.residual.len(), series.len());

        for i in 0..series.len() {
            let reconstructed = d.trend[i].value + d.seasonal[i].value + d.residual[i].value;
            assert!(
                (reconstructed - d.original[i].value).abs() < 1e-9,
                "additive identity broken at {}",
                i
            );
        }
    }

    #[test]
    fn seasonal_pattern_repeats_with_period() {
        let values: Vec<f64> = (0..21).map(|i| [5.0, 1.0, 3.0][i % 3]).collect();
        let series = daily(&values);
        let d = decompose_series(&series, 3, 3);
        for i in 3..series.len() {
            assert!((d.seasonal[i].value - d.seasonal[i - 3].value).abs() < 1e-9);
        }
    }

    #[test]
    fn empty_input_yields_empty_components() {
        let d = decompose_series(&[], 7, 7);
        assert!(d.original.is_empty());
        assert!(d.trend.is_empty());
        assert!(d.seasonal.is_empty());
        assert!(d.residual.is_empty());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn additive_identity_holds_for_any_series(
                values in proptest::collection::vec(-1e6f64..1e6f64, 1..100),
                window in 2usize..20,
                period in 1usize..30,
            ) {
                let series = daily(&values);
                let d = decompose_series(&series, window, period);
                for i in 0..series.len() {
                    let sum = d.trend[i].value + d.seasonal[i].value + d.residual[i].value;
                    prop_assert!((sum - series[i].value).abs() < 1e-6);
                }
            }

            #[test]
            fn trend_matches_input_shape(
                values in proptest::collection::vec(-1e3f64..1e3f64, 1..80),
                window in 1usize..25,
            ) {
                let series = daily(&values);
                let trend = extract_trend(&series, window);
                prop_assert_eq!(trend.len(), series.len());
                for (t, o) in trend.iter().zip(&series) {
                    prop_assert_eq!(t.timestamp, o.timestamp);
                }
            }
        }
    }
}
