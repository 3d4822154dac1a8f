//! Health and diagnostics endpoints.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use prometheus::{Encoder, TextEncoder};
use serde_json::{json, Value};

use crate::error::ApiResult;
use crate::state::AppState;

/// `GET /health` — liveness only.
pub async fn health() -> Json<Value> {
    Json(json!({"status": "ok", "timestamp": Utc::now()}))
}

/// `GET /monitoring/health` — component health.
pub async fn component_health(State(state): State<AppState>) -> Json<Value> {
    let database = match state.db.ping().await {
        Ok(()) => json!({"status": "up"}),
        Err(e) => json!({"status": "down", "message": e.to_string()}),
    };

    let upstream = if state.config.upstream.api_key.is_empty() {
        json!({"status": "unconfigured"})
    } else {
        json!({"status": "configured", "baseUrl": state.config.upstream.base_url})
    };

    let cache = json!({"status": "up", "entries": state.cache.stats().entries});

    let healthy = database["status"] == "up";
    Json(json!({
        "status": if healthy { "healthy" } else { "degraded" },
        "components": {
            "database": database,
            "upstream": upstream,
            "cache": cache,
        }
    }))
}

/// `GET /monitoring/metrics` — pool, cache, and rate-limiter gauges.
pub async fn runtime_metrics(State(state): State<AppState>) -> Json<Value> {
    let pool = state.db.metrics();
    state.monitor.update_pool_gauges(&pool);

    Json(json!({
        "pool": pool,
        "cache": state.cache.stats(),
        "rateLimiter": {
            "availablePermits": state.client.rate_limiter().available_permits(),
        },
        "uptimeSecs": state.monitor.uptime_secs(),
    }))
}

/// `GET /monitoring/errors` — recent request failures, newest first.
pub async fn recent_errors(State(state): State<AppState>) -> Json<Value> {
    Json(json!({"errors": state.monitor.recent_errors()}))
}

/// `GET /monitoring/status` — process and sync state.
pub async fn status(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let sync = state.sync_status.all().await.map_err(crate::error::ApiError)?;
    Ok(Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "startedAt": state.monitor.started_at(),
        "uptimeSecs": state.monitor.uptime_secs(),
        "sync": sync,
    })))
}

/// `GET /metrics` — Prometheus exposition.
pub async fn prometheus_metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&families, &mut buffer) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("metrics encoding failed: {}", e),
        )
            .into_response();
    }
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        buffer,
    )
        .into_response()
}
