//! Pulse backend server.
//!
//! Startup order: configuration → database (pool + schema bootstrap) →
//! upstream client → repositories → orchestrator/scheduler → analytics
//! engine → HTTP API. Exit codes: 0 on graceful shutdown, 1 on startup
//! validation failure, 2 on an unrecoverable runtime error.

mod config;
mod error;
mod handlers;
mod monitoring;
mod shutdown;
mod state;
mod tasks;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use pulse_analytics::AnalyticsEngine;
use pulse_core::traits::{LeaseStore, UpstreamApi};
use pulse_storage::{
    schema, AdvisoryLeaseStore, AggregatedMetricRepository, Database, EventRepository,
    MarketingEntityRepository, MetricRepository, ProfileRepository, RawResponseRepository,
    ResponseCache, ResponseCacheConfig, SyncStatusRepository,
};
use pulse_sync::{SyncConfig, SyncOrchestrator, SyncScheduler};
use pulse_upstream::{RateLimitConfig, UpstreamClient, UpstreamConfig};

use crate::config::{AppConfig, LogSettings};
use crate::monitoring::Monitor;
use crate::shutdown::ShutdownCoordinator;
use crate::state::AppState;
use crate::tasks::BackgroundTasks;

#[tokio::main]
async fn main() {
    std::process::exit(run().await);
}

async fn run() -> i32 {
    let app_config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {}", e);
            return 1;
        }
    };

    init_tracing(&app_config.log);

    if let Err(errors) = app_config.validate() {
        for error in &errors {
            error!(error = %error, "configuration invalid");
        }
        return 1;
    }
    app_config.print_summary();

    let db = match Database::connect(app_config.database.clone()).await {
        Ok(db) => Arc::new(db),
        Err(e) => {
            error!(error = %e, "database connection failed");
            return 1;
        }
    };
    if let Err(e) = schema::bootstrap(&db).await {
        error!(error = %e, "schema bootstrap failed");
        return 1;
    }

    let client = match build_client(&app_config) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!(error = %e, "upstream client configuration failed");
            return 1;
        }
    };

    let marketing = Arc::new(MarketingEntityRepository::new(db.clone()));
    let metrics = Arc::new(MetricRepository::new(db.clone()));
    let profiles = Arc::new(ProfileRepository::new(db.clone()));
    let events = Arc::new(EventRepository::new(db.clone()));
    let aggregates = Arc::new(AggregatedMetricRepository::new(db.clone()));
    let sync_status = Arc::new(SyncStatusRepository::new(db.clone()));
    let raw = Arc::new(RawResponseRepository::new(
        db.clone(),
        app_config.upstream.api_revision.clone(),
    ));

    let lease_store: Option<Arc<dyn LeaseStore>> = if app_config.sync.use_advisory_locks {
        Some(Arc::new(AdvisoryLeaseStore::new(&db)))
    } else {
        None
    };

    let upstream_api: Arc<dyn UpstreamApi> = client.clone();
    let orchestrator = Arc::new(SyncOrchestrator::new(
        upstream_api,
        marketing.clone(),
        metrics.clone(),
        profiles.clone(),
        events.clone(),
        sync_status.clone(),
        lease_store,
        Some(raw.clone()),
        SyncConfig {
            page_size: app_config.sync.page_size,
            job_deadline: Duration::from_secs(app_config.sync.job_deadline_secs),
            max_parallel_types: app_config.sync.max_parallel_types,
            ..SyncConfig::default()
        },
    ));

    let engine = Arc::new(AnalyticsEngine::new(events.clone(), aggregates.clone()));
    let cache = ResponseCache::new(ResponseCacheConfig {
        max_capacity: app_config.cache.max_capacity,
        max_ttl: Duration::from_secs(
            app_config
                .cache
                .entities_ttl_secs
                .max(app_config.cache.overview_ttl_secs),
        ),
    });
    let monitor = Arc::new(Monitor::new());

    let state = AppState {
        config: Arc::new(app_config.clone()),
        db: db.clone(),
        marketing,
        metrics,
        profiles,
        events,
        aggregates,
        sync_status,
        raw,
        client,
        orchestrator: orchestrator.clone(),
        engine,
        cache,
        monitor: monitor.clone(),
    };

    let scheduler = SyncScheduler::new(orchestrator);
    if let Err(e) = scheduler.start(&app_config.sync.schedules) {
        error!(error = %e, "scheduler startup failed");
        return 1;
    }
    let background = BackgroundTasks::spawn(&state);

    let coordinator = ShutdownCoordinator::new(app_config.server.shutdown_timeout_secs);
    let shutdown_handle = coordinator.handle();
    tokio::spawn(async move {
        shutdown::signal_received().await;
        coordinator.trigger();
    });

    let app = router(state, monitor);

    let addr: SocketAddr = match format!("{}:{}", app_config.server.host, app_config.server.port)
        .parse()
    {
        Ok(addr) => addr,
        Err(e) => {
            error!(error = %e, "invalid listen address");
            return 1;
        }
    };

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, addr = %addr, "failed to bind listener");
            return 2;
        }
    };
    info!(addr = %addr, "pulse server listening");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown_handle.wait().await })
        .await;

    scheduler.shutdown();
    background.shutdown();
    db.close().await;

    match served {
        Ok(()) => {
            info!("graceful shutdown complete");
            0
        }
        Err(e) => {
            error!(error = %e, "server terminated abnormally");
            2
        }
    }
}

fn build_client(config: &AppConfig) -> pulse_core::Result<UpstreamClient> {
    let upstream = &config.upstream;
    let mut client_config = UpstreamConfig::new(&upstream.base_url, &upstream.api_key);
    client_config.api_revision = upstream.api_revision.clone();
    client_config.auth_scheme = upstream.auth_scheme;
    client_config.request_timeout = Duration::from_secs(upstream.request_timeout_secs);
    client_config.total_deadline = Duration::from_secs(upstream.total_deadline_secs);
    client_config.rate_limit = RateLimitConfig {
        max_concurrent: upstream.max_concurrent_requests,
        min_interval: Duration::from_millis(upstream.min_request_interval_ms),
        ..RateLimitConfig::default()
    };
    UpstreamClient::new(client_config)
}

fn router(state: AppState, monitor: Arc<Monitor>) -> Router {
    Router::new()
        .route("/health", get(handlers::monitoring::health))
        .route("/overview", get(handlers::overview::overview))
        .route("/campaigns", get(handlers::entities::campaigns))
        .route("/flows", get(handlers::entities::flows))
        .route("/forms", get(handlers::entities::forms))
        .route("/segments", get(handlers::entities::segments))
        .route("/:entity/sync", post(handlers::sync::sync_entity))
        .route("/sync/all", post(handlers::sync::sync_all))
        .route("/sync/status", get(handlers::sync::sync_status))
        .route(
            "/analytics/timeseries/:metric_id",
            get(handlers::analytics::timeseries),
        )
        .route(
            "/analytics/decomposition/:metric_id",
            get(handlers::analytics::decomposition),
        )
        .route(
            "/analytics/anomalies/:metric_id",
            get(handlers::analytics::anomalies),
        )
        .route(
            "/analytics/forecast/:metric_id",
            get(handlers::analytics::forecast),
        )
        .route("/analytics/correlation", get(handlers::analytics::correlation))
        .route("/monitoring/health", get(handlers::monitoring::component_health))
        .route("/monitoring/metrics", get(handlers::monitoring::runtime_metrics))
        .route("/monitoring/errors", get(handlers::monitoring::recent_errors))
        .route("/monitoring/status", get(handlers::monitoring::status))
        .route("/metrics", get(handlers::monitoring::prometheus_metrics))
        .layer(middleware::from_fn_with_state(monitor, monitoring::track_requests))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn init_tracing(log: &LogSettings) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("{},sqlx=warn,hyper=warn,tower_http=info", log.level))
    });

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if log.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}
