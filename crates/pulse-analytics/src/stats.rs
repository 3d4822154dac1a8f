//! Shared statistics helpers, Pearson correlation, and sample entropy.

use std::collections::HashMap;

use pulse_core::{Error, Result, TimeSeriesPoint};

pub(crate) fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation.
pub(crate) fn std_dev(values: &[f64], mean: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

fn is_constant(values: &[f64]) -> bool {
    values
        .first()
        .map(|first| values.iter().all(|v| (v - first).abs() < f64::EPSILON))
        .unwrap_or(true)
}

/// Pearson correlation between two series.
///
/// With `align` set, the series are first intersected on identical
/// timestamps; without it, mismatched lengths are an error. Two
/// constant series correlate 1.0, a constant against a variable one
/// correlates 0.
pub fn calculate_correlation(
    a: &[TimeSeriesPoint],
    b: &[TimeSeriesPoint],
    align: bool,
) -> Result<(f64, usize)> {
    if a.is_empty() && b.is_empty() {
        return Err(Error::validation("Empty time series provided"));
    }
    if !align && a.len() != b.len() {
        return Err(Error::validation("Time series must have the same length"));
    }

    let (xs, ys): (Vec<f64>, Vec<f64>) = if align {
        let by_ts: HashMap<i64, f64> = b
            .iter()
            .map(|p| (p.timestamp.timestamp_millis(), p.value))
            .collect();
        a.iter()
            .filter_map(|p| {
                by_ts
                    .get(&p.timestamp.timestamp_millis())
                    .map(|v| (p.value, *v))
            })
            .unzip()
    } else {
        (
            a.iter().map(|p| p.value).collect(),
            b.iter().map(|p| p.value).collect(),
        )
    };

    if xs.len() < 2 {
        return Err(Error::validation("Time series must have at least 2 points"));
    }

    let n = xs.len();
    let x_constant = is_constant(&xs);
    let y_constant = is_constant(&ys);
    if x_constant && y_constant {
        return Ok((1.0, n));
    }
    if x_constant || y_constant {
        return Ok((0.0, n));
    }

    let mx = mean(&xs);
    let my = mean(&ys);
    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (x, y) in xs.iter().zip(&ys) {
        cov += (x - mx) * (y - my);
        var_x += (x - mx).powi(2);
        var_y += (y - my).powi(2);
    }

    Ok((cov / (var_x.sqrt() * var_y.sqrt()), n))
}

/// Sample entropy with embedding dimension `m` and tolerance `r`
/// (defaulting to 0.2 σ). Lower values mean a more regular series.
pub fn calculate_sample_entropy(
    series: &[TimeSeriesPoint],
    m: usize,
    r: Option<f64>,
) -> Result<f64> {
    let values: Vec<f64> = series.iter().map(|p| p.value).collect();
    let min_len = 4.max(m + 2);
    if values.len() < min_len {
        return Err(Error::validation(format!(
            "sample entropy requires at least {} points",
            min_len
        )));
    }

    let tolerance = match r {
        Some(r) => r,
        None => 0.2 * std_dev(&values, mean(&values)),
    };

    let count_matches = |window: usize| -> u64 {
        let n = values.len() - window + 1;
        let mut matches = 0u64;
        for i in 0..n {
            for j in (i + 1)..n {
                let within = (0..window)
                    .all(|k| (values[i + k] - values[j + k]).abs() <= tolerance);
                if within {
                    matches += 1;
                }
            }
        }
        matches
    };

    let b = count_matches(m);
    let a = count_matches(m + 1);
    if a == 0 || b == 0 {
        return Err(Error::validation(
            "sample entropy undefined: no template matches within tolerance",
        ));
    }

    Ok(-((a as f64 / b as f64).ln()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    pub(crate) fn series(values: &[f64]) -> Vec<TimeSeriesPoint> {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        values
            .iter()
            .enumerate()
            .map(|(i, v)| TimeSeriesPoint::new(start + Duration::days(i as i64), *v))
            .collect()
    }

    #[test]
    fn perfectly_correlated_series() {
        let a = series(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        let b = series(&[2.0, 4.0, 6.0, 8.0, 10.0]);
        let (r, n) = calculate_correlation(&a, &b, false).unwrap();
        assert!((r - 1.0).abs() < 1e-12);
        assert_eq!(n, 5);
    }

    #[test]
    fn reversed_series_anticorrelate() {
        let a = series(&[5.0, 4.0, 3.0, 2.0, 1.0]);
        let b = series(&[2.0, 4.0, 6.0, 8.0, 10.0]);
        let (r, _) = calculate_correlation(&a, &b, false).unwrap();
        assert!((r + 1.0).abs() < 1e-12);
    }

    #[test]
    fn self_correlation_is_one() {
        let a = series(&[3.0, 1.0, 4.0, 1.0, 5.0]);
        let (r, _) = calculate_correlation(&a, &a, false).unwrap();
        assert!((r - 1.0).abs() < 1e-12);
    }

    #[test]
    fn constant_series_rules() {
        let constant = series(&[7.0, 7.0, 7.0]);
        let variable = series(&[1.0, 2.0, 3.0]);

        let (r, _) = calculate_correlation(&constant, &constant, false).unwrap();
        assert_eq!(r, 1.0);

        let (r, _) = calculate_correlation(&constant, &variable, false).unwrap();
        assert_eq!(r, 0.0);
    }

    #[test]
    fn correlation_error_cases() {
        let a = series(&[1.0, 2.0, 3.0]);
        let b = series(&[1.0, 2.0]);

        let err = calculate_correlation(&a, &b, false).unwrap_err();
        assert!(err.to_string().contains("same length"));

        let err = calculate_correlation(&[], &[], false).unwrap_err();
        assert!(err.to_string().contains("Empty time series provided"));

        let short = series(&[1.0]);
        let err = calculate_correlation(&short, &short, false).unwrap_err();
        assert!(err.to_string().contains("at least 2 points"));
    }

    #[test]
    fn aligned_correlation_intersects_timestamps() {
        let a = series(&[1.0, 2.0, 3.0, 4.0]);
        // shares only the middle two timestamps with `a`, offset values
        let mut b = series(&[10.0, 20.0, 30.0, 40.0]);
        b.remove(0);
        b.pop();
        // differing lengths are fine when aligning
        let (r, n) = calculate_correlation(&a, &b, true).unwrap();
        assert_eq!(n, 2);
        assert!((r - 1.0).abs() < 1e-12);
    }

    #[test]
    fn entropy_of_regular_series_is_low() {
        let periodic = series(&[1.0, 2.0, 1.0, 2.0, 1.0, 2.0, 1.0, 2.0, 1.0, 2.0]);
        let noisy = series(&[3.0, 1.0, 4.0, 1.0, 5.0, 9.0, 2.0, 6.0, 5.0, 3.0]);

        let e_periodic = calculate_sample_entropy(&periodic, 2, None).unwrap();
        let e_noisy = calculate_sample_entropy(&noisy, 2, Some(1.0)).unwrap();
        assert!(e_periodic < e_noisy);
    }

    #[test]
    fn entropy_requires_minimum_length() {
        let short = series(&[1.0, 2.0, 3.0]);
        assert!(calculate_sample_entropy(&short, 2, None).is_err());
    }

    #[test]
    fn constant_series_entropy_is_zero_ish() {
        let constant = series(&[5.0; 12]);
        let e = calculate_sample_entropy(&constant, 2, None).unwrap();
        assert!(e >= 0.0 && e < 0.25);
    }
}
