//! Largest-triangle-three-buckets downsampling for chart payloads.

use pulse_core::TimeSeriesPoint;

/// Reduce `series` to at most `threshold` points while preserving its
/// visual shape. The first and last points are always kept. A
/// threshold of zero or one not smaller than the series leaves it
/// untouched.
pub fn lttb(series: &[TimeSeriesPoint], threshold: usize) -> Vec<TimeSeriesPoint> {
    let len = series.len();
    if threshold == 0 || threshold >= len {
        return series.to_vec();
    }
    if threshold < 3 {
        return vec![series[0], series[len - 1]];
    }

    let mut sampled = Vec::with_capacity(threshold);
    sampled.push(series[0]);

    // interior points are distributed over threshold - 2 buckets
    let bucket_size = (len - 2) as f64 / (threshold - 2) as f64;
    let mut a = 0usize;

    for i in 0..(threshold - 2) {
        let range_start = (i as f64 * bucket_size) as usize + 1;
        let range_end = (((i + 1) as f64 * bucket_size) as usize + 1).min(len - 1);

        // average of the next bucket forms the third triangle corner
        let next_start = range_end;
        let next_end = ((((i + 2) as f64) * bucket_size) as usize + 1).min(len);
        let next = &series[next_start.min(len - 1)..next_end.max(next_start + 1).min(len)];
        let (avg_x, avg_y) = if next.is_empty() {
            let last = &series[len - 1];
            (last.timestamp.timestamp_millis() as f64, last.value)
        } else {
            (
                next.iter()
                    .map(|p| p.timestamp.timestamp_millis() as f64)
                    .sum::<f64>()
                    / next.len() as f64,
                next.iter().map(|p| p.value).sum::<f64>() / next.len() as f64,
            )
        };

        let ax = series[a].timestamp.timestamp_millis() as f64;
        let ay = series[a].value;

        let mut best_area = -1.0;
        let mut best_idx = range_start;
        for (idx, p) in series[range_start..range_end].iter().enumerate() {
            let px = p.timestamp.timestamp_millis() as f64;
            let area = ((ax - avg_x) * (p.value - ay) - (ax - px) * (avg_y - ay)).abs();
            if area > best_area {
                best_area = area;
                best_idx = range_start + idx;
            }
        }

        sampled.push(series[best_idx]);
        a = best_idx;
    }

    sampled.push(series[len - 1]);
    sampled
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn hourly(values: &[f64]) -> Vec<TimeSeriesPoint> {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        values
            .iter()
            .enumerate()
            .map(|(i, v)| TimeSeriesPoint::new(start + Duration::hours(i as i64), *v))
            .collect()
    }

    #[test]
    fn small_series_pass_through() {
        let series = hourly(&[1.0, 2.0, 3.0]);
        assert_eq!(lttb(&series, 10), series);
        assert_eq!(lttb(&series, 0), series);
    }

    #[test]
    fn output_respects_threshold_and_endpoints() {
        let values: Vec<f64> = (0..500).map(|i| (i as f64 * 0.1).sin() * 50.0).collect();
        let series = hourly(&values);

        let reduced = lttb(&series, 50);
        assert_eq!(reduced.len(), 50);
        assert_eq!(reduced[0], series[0]);
        assert_eq!(reduced[49], series[499]);
        // output stays time-ordered
        assert!(reduced.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[test]
    fn peaks_are_preserved() {
        let mut values = vec![0.0; 200];
        values[77] = 100.0;
        values[150] = -80.0;
        let series = hourly(&values);

        let reduced = lttb(&series, 20);
        assert!(reduced.iter().any(|p| p.value == 100.0), "positive peak kept");
        assert!(reduced.iter().any(|p| p.value == -80.0), "negative peak kept");
    }
}
