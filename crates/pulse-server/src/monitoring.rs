//! Request metrics, correlation IDs, and the recent-error ring.

use std::collections::VecDeque;
use std::time::Instant;

use axum::extract::{Request, State};
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge_vec, HistogramVec,
    IntCounterVec, IntGaugeVec,
};
use std::sync::Arc;
use uuid::Uuid;

const ERROR_RING_CAPACITY: usize = 200;

static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "pulse_http_requests_total",
        "HTTP requests by method, path, and status",
        &["method", "path", "status"]
    )
    .expect("metric registration")
});

static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "pulse_http_request_duration_seconds",
        "HTTP request duration in seconds",
        &["method", "path"],
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    )
    .expect("metric registration")
});

static DB_POOL_CONNECTIONS: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "pulse_db_pool_connections",
        "Database pool connections by state",
        &["state"]
    )
    .expect("metric registration")
});

#[derive(Debug, Clone, serde::Serialize)]
pub struct ErrorEntry {
    pub at: DateTime<Utc>,
    pub method: String,
    pub path: String,
    pub status: u16,
    pub correlation_id: String,
}

/// Process-wide monitoring facet: request counters, latency
/// histograms, pool gauges, and a bounded ring of recent errors.
pub struct Monitor {
    started_at: Instant,
    started_at_utc: DateTime<Utc>,
    errors: Mutex<VecDeque<ErrorEntry>>,
}

impl Monitor {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            started_at_utc: Utc::now(),
            errors: Mutex::new(VecDeque::with_capacity(ERROR_RING_CAPACITY)),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at_utc
    }

    pub fn record_request(&self, method: &str, path: &str, status: u16, elapsed_secs: f64) {
        HTTP_REQUESTS_TOTAL
            .with_label_values(&[method, path, &status.to_string()])
            .inc();
        HTTP_REQUEST_DURATION
            .with_label_values(&[method, path])
            .observe(elapsed_secs);
    }

    pub fn record_error(&self, entry: ErrorEntry) {
        let mut ring = self.errors.lock();
        if ring.len() == ERROR_RING_CAPACITY {
            ring.pop_front();
        }
        ring.push_back(entry);
    }

    pub fn recent_errors(&self) -> Vec<ErrorEntry> {
        self.errors.lock().iter().rev().cloned().collect()
    }

    pub fn update_pool_gauges(&self, metrics: &pulse_storage::PoolMetrics) {
        DB_POOL_CONNECTIONS
            .with_label_values(&["active"])
            .set(metrics.active as i64);
        DB_POOL_CONNECTIONS
            .with_label_values(&["idle"])
            .set(metrics.idle as i64);
    }
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Track every request: latency histogram, status counter, a
/// correlation ID echoed (or minted) on the response, and an error
/// ring entry for failures.
pub async fn track_requests(
    State(monitor): State<Arc<Monitor>>,
    request: Request,
    next: Next,
) -> Response {
    let started = Instant::now();
    let method = request.method().to_string();
    let path = request.uri().path().to_string();

    let correlation_id = request
        .headers()
        .get("x-correlation-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let mut response = next.run(request).await;

    let status = response.status().as_u16();
    monitor.record_request(&method, &path, status, started.elapsed().as_secs_f64());

    if let Ok(value) = HeaderValue::from_str(&correlation_id) {
        response.headers_mut().insert("x-correlation-id", value);
    }

    if status >= 400 {
        monitor.record_error(ErrorEntry {
            at: Utc::now(),
            method,
            path,
            status,
            correlation_id,
        });
    }

    response
}
