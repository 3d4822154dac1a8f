//! Baseline forecasters with 95 % prediction intervals.

use std::str::FromStr;

use serde::Serialize;

use pulse_core::{Error, Interval, Result, TimeSeriesPoint};

use crate::stats::{mean, std_dev};

const ERR_INSUFFICIENT: &str = "Not enough data for forecasting";

/// z for a 95 % interval
const Z_95: f64 = 1.96;
/// small-sample t approximation used by the regression interval
const T_95: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ForecastMethod {
    Naive,
    MovingAverage,
    LinearRegression,
}

impl ForecastMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ForecastMethod::Naive => "naive",
            ForecastMethod::MovingAverage => "moving_average",
            ForecastMethod::LinearRegression => "linear_regression",
        }
    }
}

impl FromStr for ForecastMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "naive" => Ok(ForecastMethod::Naive),
            "moving_average" | "movingaverage" | "ma" => Ok(ForecastMethod::MovingAverage),
            "linear_regression" | "linearregression" | "regression" => {
                Ok(ForecastMethod::LinearRegression)
            }
            other => Err(Error::validation(format!(
                "unknown forecast method: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfidenceInterval {
    pub upper: Vec<f64>,
    pub lower: Vec<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Forecast {
    pub forecast: Vec<TimeSeriesPoint>,
    pub confidence: ConfidenceInterval,
    pub accuracy: f64,
    pub method: &'static str,
}

/// Dispatch to the requested forecaster.
pub fn forecast(
    series: &[TimeSeriesPoint],
    method: ForecastMethod,
    horizon: usize,
    interval: Interval,
    window: usize,
) -> Result<Forecast> {
    match method {
        ForecastMethod::Naive => naive(series, horizon, interval),
        ForecastMethod::MovingAverage => moving_average(series, window, horizon, interval),
        ForecastMethod::LinearRegression => linear_regression(series, horizon, interval),
    }
}

/// Forecast the last observed value forward, with an interval of
/// ±1.96 σ of the history. Lower bounds clamp at zero.
pub fn naive(series: &[TimeSeriesPoint], horizon: usize, interval: Interval) -> Result<Forecast> {
    let last = series.last().ok_or_else(|| Error::validation(ERR_INSUFFICIENT))?;

    let values: Vec<f64> = series.iter().map(|p| p.value).collect();
    let sd = std_dev(&values, mean(&values));
    let margin = Z_95 * sd;

    let points = future_points(last.timestamp, horizon, interval, |_| last.value);
    Ok(Forecast {
        confidence: flat_interval(&points, margin),
        forecast: points,
        accuracy: holdout_accuracy(&values),
        method: ForecastMethod::Naive.as_str(),
    })
}

/// Forecast the mean of the last `window` points forward, with an
/// interval of ±1.96 σ around that mean.
pub fn moving_average(
    series: &[TimeSeriesPoint],
    window: usize,
    horizon: usize,
    interval: Interval,
) -> Result<Forecast> {
    if window == 0 || series.len() < window {
        return Err(Error::validation(ERR_INSUFFICIENT));
    }
    let last = &series[series.len() - 1];

    let tail: Vec<f64> = series[series.len() - window..]
        .iter()
        .map(|p| p.value)
        .collect();
    let level = mean(&tail);
    let margin = Z_95 * std_dev(&tail, level);

    let values: Vec<f64> = series.iter().map(|p| p.value).collect();
    let points = future_points(last.timestamp, horizon, interval, |_| level);
    Ok(Forecast {
        confidence: flat_interval(&points, margin),
        forecast: points,
        accuracy: holdout_accuracy(&values),
        method: ForecastMethod::MovingAverage.as_str(),
    })
}

/// Ordinary least squares of value on days-since-first-point, with the
/// standard prediction interval `se·√(1 + 1/n + (x−x̄)²/Σ(x−x̄)²)` at
/// t≈2. Accuracy is R².
pub fn linear_regression(
    series: &[TimeSeriesPoint],
    horizon: usize,
    interval: Interval,
) -> Result<Forecast> {
    if series.len() < 2 {
        return Err(Error::validation(ERR_INSUFFICIENT));
    }

    let t0 = series[0].timestamp;
    let xs: Vec<f64> = series
        .iter()
        .map(|p| (p.timestamp - t0).num_seconds() as f64 / 86_400.0)
        .collect();
    let ys: Vec<f64> = series.iter().map(|p| p.value).collect();
    let n = xs.len() as f64;

    let x_bar = mean(&xs);
    let y_bar = mean(&ys);
    let sxx: f64 = xs.iter().map(|x| (x - x_bar).powi(2)).sum();
    if sxx == 0.0 {
        return Err(Error::validation(ERR_INSUFFICIENT));
    }
    let sxy: f64 = xs.iter().zip(&ys).map(|(x, y)| (x - x_bar) * (y - y_bar)).sum();

    let slope = sxy / sxx;
    let intercept = y_bar - slope * x_bar;

    let ss_res: f64 = xs
        .iter()
        .zip(&ys)
        .map(|(x, y)| (y - (intercept + slope * x)).powi(2))
        .sum();
    let ss_tot: f64 = ys.iter().map(|y| (y - y_bar).powi(2)).sum();
    let r_squared = if ss_tot == 0.0 {
        if ss_res.abs() < 1e-12 {
            1.0
        } else {
            0.0
        }
    } else {
        1.0 - ss_res / ss_tot
    };

    let se = if n > 2.0 { (ss_res / (n - 2.0)).sqrt() } else { 0.0 };

    let last = &series[series.len() - 1];
    let points = future_points(last.timestamp, horizon, interval, |ts| {
        let x = (ts - t0).num_seconds() as f64 / 86_400.0;
        intercept + slope * x
    });

    let mut upper = Vec::with_capacity(points.len());
    let mut lower = Vec::with_capacity(points.len());
    for p in &points {
        let x = (p.timestamp - t0).num_seconds() as f64 / 86_400.0;
        let margin = T_95 * se * (1.0 + 1.0 / n + (x - x_bar).powi(2) / sxx).sqrt();
        upper.push(p.value + margin);
        lower.push((p.value - margin).max(0.0));
    }

    Ok(Forecast {
        forecast: points,
        confidence: ConfidenceInterval { upper, lower },
        accuracy: r_squared,
        method: ForecastMethod::LinearRegression.as_str(),
    })
}

fn future_points<F>(
    last: chrono::DateTime<chrono::Utc>,
    horizon: usize,
    interval: Interval,
    value_at: F,
) -> Vec<TimeSeriesPoint>
where
    F: Fn(chrono::DateTime<chrono::Utc>) -> f64,
{
    (1..=horizon)
        .map(|k| {
            let ts = last + interval.step() * k as i32;
            TimeSeriesPoint::new(ts, value_at(ts))
        })
        .collect()
}

fn flat_interval(points: &[TimeSeriesPoint], margin: f64) -> ConfidenceInterval {
    ConfidenceInterval {
        upper: points.iter().map(|p| p.value + margin).collect(),
        lower: points.iter().map(|p| (p.value - margin).max(0.0)).collect(),
    }
}

/// Hold-out check for the level forecasters: the last 3 points against
/// the mean of the rest, scored as `max(0, 1 − MAPE)`. Series shorter
/// than 4 points score 0.5.
fn holdout_accuracy(values: &[f64]) -> f64 {
    if values.len() < 4 {
        return 0.5;
    }
    let (history, holdout) = values.split_at(values.len() - 3);
    let level = mean(history);

    let mut terms = Vec::new();
    for actual in holdout {
        if actual.abs() > f64::EPSILON {
            terms.push(((actual - level) / actual).abs());
        }
    }
    if terms.is_empty() {
        return 0.5;
    }
    (1.0 - mean(&terms)).max(0.0)
}
