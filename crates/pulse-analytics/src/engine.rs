//! The analytics engine: feeds the pure algorithms from the store.
//!
//! Retrieval is aggregate-first: if stored bucket summaries fully cover
//! the requested range at the requested interval they are served
//! directly, otherwise an on-the-fly bucket aggregation runs against
//! the events hypertable.

use std::sync::Arc;

use tracing::debug;

use pulse_core::traits::{AggregateStore, EventStore};
use pulse_core::{
    AnomalyPoint, DateRange, Decomposition, Error, Interval, Result, TimeSeriesPoint,
};

use crate::anomaly::detect_anomalies;
use crate::decompose::decompose_series;
use crate::forecast::{forecast, Forecast, ForecastMethod};
use crate::preprocess::{preprocess, PreprocessOptions};
use crate::stats::calculate_correlation;

const DEFAULT_TREND_WINDOW: usize = 7;
const DEFAULT_MA_WINDOW: usize = 3;

pub struct AnalyticsEngine {
    events: Arc<dyn EventStore>,
    aggregates: Arc<dyn AggregateStore>,
}

impl AnalyticsEngine {
    pub fn new(events: Arc<dyn EventStore>, aggregates: Arc<dyn AggregateStore>) -> Self {
        Self { events, aggregates }
    }

    /// Bucketed series for a metric over a range.
    pub async fn get_time_series(
        &self,
        metric_id: &str,
        range: DateRange,
        interval: Interval,
    ) -> Result<Vec<TimeSeriesPoint>> {
        if metric_id.trim().is_empty() {
            return Err(Error::validation("Invalid metric ID"));
        }
        if range.start >= range.end {
            return Err(Error::validation("Invalid date range"));
        }

        match self
            .aggregates
            .stored_aggregated_metrics(metric_id, interval, range.start, range.end)
            .await
        {
            Ok(rows) if !rows.is_empty() && covers(rows.len(), range, interval) => {
                debug!(metric_id = metric_id, buckets = rows.len(), "serving stored aggregates");
                return Ok(rows
                    .into_iter()
                    .map(|r| TimeSeriesPoint::new(r.bucket_start, r.sum_value))
                    .collect());
            }
            Ok(_) => {}
            Err(e) => debug!(error = %e, "stored aggregate lookup failed, falling back"),
        }

        self.events
            .aggregate_buckets(metric_id, range.start, range.end, interval)
            .await
            .map_err(|e| match e {
                Error::Validation { .. } => e,
                _ => Error::Database("Failed to fetch time series data".to_string()),
            })
    }

    /// Trend/seasonal/residual decomposition over a metric.
    pub async fn decompose(
        &self,
        metric_id: &str,
        range: DateRange,
        interval: Interval,
        window: usize,
        period: Option<usize>,
    ) -> Result<Decomposition> {
        let series = self.get_time_series(metric_id, range, interval).await?;
        if series.is_empty() {
            return Ok(Decomposition::default());
        }

        let prepared = preprocess(&series, &grid_options(interval))?;

        let period = match period {
            Some(p) if p > 0 => p,
            _ => {
                // the grid normalization above makes the series regular;
                // if it somehow is not, there is no defensible period
                if !is_evenly_stepped(&prepared.data) {
                    return Err(Error::validation(
                        "cannot infer seasonal period for irregular series",
                    ));
                }
                interval.default_period()
            }
        };

        Ok(decompose_series(&prepared.data, window.max(2), period))
    }

    /// Z-score anomaly detection over a metric.
    pub async fn anomalies(
        &self,
        metric_id: &str,
        range: DateRange,
        interval: Interval,
        threshold: f64,
        lookback: Option<usize>,
    ) -> Result<Vec<AnomalyPoint>> {
        let series = self.get_time_series(metric_id, range, interval).await?;
        if series.is_empty() {
            return Ok(Vec::new());
        }
        let prepared = preprocess(&series, &PreprocessOptions::filled())?;
        Ok(detect_anomalies(&prepared.data, threshold, lookback))
    }

    /// Pearson correlation between two metrics over the same range.
    pub async fn correlation(
        &self,
        metric_a: &str,
        metric_b: &str,
        range: DateRange,
        interval: Interval,
        align: bool,
    ) -> Result<(f64, usize)> {
        let a = self.get_time_series(metric_a, range, interval).await?;
        let b = self.get_time_series(metric_b, range, interval).await?;
        calculate_correlation(&a, &b, align)
    }

    /// Forecast a metric forward.
    pub async fn forecast(
        &self,
        metric_id: &str,
        range: DateRange,
        interval: Interval,
        method: ForecastMethod,
        horizon: usize,
        window: Option<usize>,
    ) -> Result<Forecast> {
        let series = self.get_time_series(metric_id, range, interval).await?;
        if series.is_empty() {
            return Err(Error::validation("Not enough data for forecasting"));
        }
        let prepared = preprocess(&series, &grid_options(interval))?;
        forecast(
            &prepared.data,
            method,
            horizon,
            interval,
            window.unwrap_or(DEFAULT_MA_WINDOW),
        )
    }

    pub fn default_trend_window() -> usize {
        DEFAULT_TREND_WINDOW
    }
}

fn grid_options(interval: Interval) -> PreprocessOptions {
    PreprocessOptions {
        fill_missing_values: true,
        normalize_timestamps: true,
        expected_interval: Some(chrono::Duration::seconds(interval.seconds())),
        ..Default::default()
    }
}

fn covers(buckets: usize, range: DateRange, interval: Interval) -> bool {
    let expected = (range.end - range.start).num_seconds() / interval.seconds();
    buckets as i64 >= expected.max(1)
}

fn is_evenly_stepped(series: &[TimeSeriesPoint]) -> bool {
    if series.len() < 3 {
        return true;
    }
    let first_gap = series[1].timestamp - series[0].timestamp;
    series
        .windows(2)
        .all(|w| w[1].timestamp - w[0].timestamp == first_gap)
}
