//! Analytics endpoints: time series, decomposition, anomalies,
//! forecasting, correlation.

use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use pulse_analytics::{lttb, AnalyticsEngine, ForecastMethod};
use pulse_core::{Error, Interval, Result};
use pulse_storage::cache_key;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

fn parse_interval(raw: &Option<String>) -> Result<Interval> {
    match raw {
        None => Ok(Interval::default()),
        Some(s) => s.parse(),
    }
}

async fn cached(
    state: &AppState,
    key: String,
    compute: impl std::future::Future<Output = Result<Value>>,
) -> ApiResult<Json<Value>> {
    let ttl = Duration::from_secs(state.config.cache.analytics_ttl_secs);
    let body = state.cache.get_or_compute(&key, ttl, compute).await?;
    Ok(Json(body.as_ref().clone()))
}

#[derive(Debug, Default, Deserialize)]
pub struct TimeseriesQuery {
    #[serde(default, rename = "dateRange")]
    pub date_range: Option<String>,
    #[serde(default)]
    pub interval: Option<String>,
    #[serde(default, rename = "maxPoints")]
    pub max_points: Option<usize>,
    #[serde(default, rename = "downsampleMethod")]
    pub downsample_method: Option<String>,
}

/// `GET /analytics/timeseries/{metricId}`
pub async fn timeseries(
    State(state): State<AppState>,
    Path(metric_id): Path<String>,
    Query(query): Query<TimeseriesQuery>,
) -> ApiResult<Json<Value>> {
    let interval = parse_interval(&query.interval)?;
    let range = pulse_core::DateRange::parse(query.date_range.as_deref().unwrap_or(""));

    if let Some(method) = &query.downsample_method {
        if method != "lttb" {
            return Err(ApiError(Error::validation(format!(
                "unknown downsample method: {}",
                method
            ))));
        }
    }

    let max_points_raw = query.max_points.map(|p| p.to_string()).unwrap_or_default();
    let key = cache_key(
        &format!("/analytics/timeseries/{}", metric_id),
        &[
            ("dateRange", query.date_range.as_deref().unwrap_or("")),
            ("interval", interval.as_str()),
            ("maxPoints", max_points_raw.as_str()),
        ],
    );

    let engine = state.engine.clone();
    let max_points = query.max_points;
    cached(&state, key, async move {
        let mut series = engine.get_time_series(&metric_id, range, interval).await?;
        if let Some(threshold) = max_points {
            series = lttb(&series, threshold);
        }
        Ok(serde_json::to_value(&series)?)
    })
    .await
}

#[derive(Debug, Default, Deserialize)]
pub struct DecompositionQuery {
    #[serde(default, rename = "dateRange")]
    pub date_range: Option<String>,
    #[serde(default)]
    pub interval: Option<String>,
    #[serde(default, rename = "windowSize")]
    pub window_size: Option<usize>,
    #[serde(default)]
    pub period: Option<usize>,
}

/// `GET /analytics/decomposition/{metricId}`
pub async fn decomposition(
    State(state): State<AppState>,
    Path(metric_id): Path<String>,
    Query(query): Query<DecompositionQuery>,
) -> ApiResult<Json<Value>> {
    let interval = parse_interval(&query.interval)?;
    let range = pulse_core::DateRange::parse(query.date_range.as_deref().unwrap_or(""));
    let window = query
        .window_size
        .unwrap_or_else(AnalyticsEngine::default_trend_window);

    let window_raw = window.to_string();
    let key = cache_key(
        &format!("/analytics/decomposition/{}", metric_id),
        &[
            ("dateRange", query.date_range.as_deref().unwrap_or("")),
            ("interval", interval.as_str()),
            ("windowSize", window_raw.as_str()),
        ],
    );

    let engine = state.engine.clone();
    let period = query.period;
    cached(&state, key, async move {
        let d = engine
            .decompose(&metric_id, range, interval, window, period)
            .await?;
        Ok(serde_json::to_value(&d)?)
    })
    .await
}

#[derive(Debug, Default, Deserialize)]
pub struct AnomalyQuery {
    #[serde(default, rename = "dateRange")]
    pub date_range: Option<String>,
    #[serde(default)]
    pub interval: Option<String>,
    #[serde(default)]
    pub threshold: Option<f64>,
    #[serde(default, rename = "lookbackWindow")]
    pub lookback_window: Option<usize>,
}

/// `GET /analytics/anomalies/{metricId}`
pub async fn anomalies(
    State(state): State<AppState>,
    Path(metric_id): Path<String>,
    Query(query): Query<AnomalyQuery>,
) -> ApiResult<Json<Value>> {
    let interval = parse_interval(&query.interval)?;
    let range = pulse_core::DateRange::parse(query.date_range.as_deref().unwrap_or(""));
    let threshold = query.threshold.unwrap_or(3.0);
    if threshold <= 0.0 {
        return Err(ApiError(Error::validation("threshold must be positive")));
    }

    let threshold_raw = threshold.to_string();
    let lookback_raw = query
        .lookback_window
        .map(|w| w.to_string())
        .unwrap_or_default();
    let key = cache_key(
        &format!("/analytics/anomalies/{}", metric_id),
        &[
            ("dateRange", query.date_range.as_deref().unwrap_or("")),
            ("interval", interval.as_str()),
            ("threshold", threshold_raw.as_str()),
            ("lookbackWindow", lookback_raw.as_str()),
        ],
    );

    let engine = state.engine.clone();
    let lookback = query.lookback_window;
    cached(&state, key, async move {
        let found = engine
            .anomalies(&metric_id, range, interval, threshold, lookback)
            .await?;
        Ok(serde_json::to_value(&found)?)
    })
    .await
}

#[derive(Debug, Default, Deserialize)]
pub struct ForecastQuery {
    #[serde(default, rename = "dateRange")]
    pub date_range: Option<String>,
    #[serde(default)]
    pub horizon: Option<usize>,
    #[serde(default)]
    pub interval: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default, rename = "windowSize")]
    pub window_size: Option<usize>,
}

/// `GET /analytics/forecast/{metricId}`
pub async fn forecast(
    State(state): State<AppState>,
    Path(metric_id): Path<String>,
    Query(query): Query<ForecastQuery>,
) -> ApiResult<Json<Value>> {
    let interval = parse_interval(&query.interval)?;
    let range = pulse_core::DateRange::parse(query.date_range.as_deref().unwrap_or(""));
    let method: ForecastMethod = query.method.as_deref().unwrap_or("naive").parse()?;
    let horizon = query.horizon.unwrap_or(7);
    if horizon == 0 || horizon > 365 {
        return Err(ApiError(Error::validation("horizon must be between 1 and 365")));
    }

    let horizon_raw = horizon.to_string();
    let key = cache_key(
        &format!("/analytics/forecast/{}", metric_id),
        &[
            ("dateRange", query.date_range.as_deref().unwrap_or("")),
            ("interval", interval.as_str()),
            ("method", method.as_str()),
            ("horizon", horizon_raw.as_str()),
        ],
    );

    let engine = state.engine.clone();
    let window = query.window_size;
    cached(&state, key, async move {
        let f = engine
            .forecast(&metric_id, range, interval, method, horizon, window)
            .await?;
        Ok(serde_json::to_value(&f)?)
    })
    .await
}

#[derive(Debug, Default, Deserialize)]
pub struct CorrelationQuery {
    pub metric1: String,
    pub metric2: String,
    #[serde(default, rename = "dateRange")]
    pub date_range: Option<String>,
    #[serde(default)]
    pub interval: Option<String>,
    #[serde(default, rename = "alignTimestamps")]
    pub align_timestamps: Option<bool>,
}

/// `GET /analytics/correlation`
pub async fn correlation(
    State(state): State<AppState>,
    Query(query): Query<CorrelationQuery>,
) -> ApiResult<Json<Value>> {
    let interval = parse_interval(&query.interval)?;
    let range = pulse_core::DateRange::parse(query.date_range.as_deref().unwrap_or(""));
    let align = query.align_timestamps.unwrap_or(false);

    let align_raw = align.to_string();
    let key = cache_key(
        "/analytics/correlation",
        &[
            ("metric1", query.metric1.as_str()),
            ("metric2", query.metric2.as_str()),
            ("dateRange", query.date_range.as_deref().unwrap_or("")),
            ("interval", interval.as_str()),
            ("align", align_raw.as_str()),
        ],
    );

    let engine = state.engine.clone();
    let (metric1, metric2) = (query.metric1.clone(), query.metric2.clone());
    cached(&state, key, async move {
        let (correlation, n) = engine
            .correlation(&metric1, &metric2, range, interval, align)
            .await?;
        Ok(json!({"correlation": correlation, "n": n}))
    })
    .await
}
