//! Background maintenance: aggregate refresh, retention pruning, and
//! cache invalidation on sync completion.

use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use pulse_core::Interval;

use crate::state::AppState;

pub struct BackgroundTasks {
    shutdown_tx: watch::Sender<bool>,
}

impl BackgroundTasks {
    /// Spawn the maintenance loops.
    pub fn spawn(state: &AppState) -> Self {
        let (shutdown_tx, _) = watch::channel(false);

        spawn_aggregation(state.clone(), shutdown_tx.subscribe());
        spawn_retention(state.clone(), shutdown_tx.subscribe());
        spawn_invalidation(state.clone(), shutdown_tx.subscribe());

        Self { shutdown_tx }
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

/// Recompute bucket summaries for the recent window at every interval
/// the dashboard serves.
fn spawn_aggregation(state: AppState, mut shutdown: watch::Receiver<bool>) {
    let period = Duration::from_secs(state.config.retention.aggregation_refresh_secs);
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(period) => {
                    let end = Utc::now();
                    let start = end - chrono::Duration::days(7);
                    for interval in [Interval::Hour, Interval::Day, Interval::Week] {
                        match state.aggregates.refresh_from_events(interval, start, end).await {
                            Ok(rows) => debug!(interval = %interval, rows = rows, "aggregates refreshed"),
                            Err(e) => warn!(interval = %interval, error = %e, "aggregate refresh failed"),
                        }
                    }
                }
                _ = shutdown.changed() => {
                    debug!("aggregation task shutting down");
                    break;
                }
            }
        }
    });
}

/// Daily retention enforcement for events and raw payloads.
fn spawn_retention(state: AppState, mut shutdown: watch::Receiver<bool>) {
    const DAY: Duration = Duration::from_secs(24 * 3600);
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(DAY) => {
                    let now = Utc::now();

                    let cutoff = now - chrono::Duration::days(state.config.retention.events_days);
                    match state.events.prune_older_than(cutoff).await {
                        Ok(dropped) if dropped > 0 => info!(dropped = dropped, "event retention applied"),
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "event retention failed"),
                    }

                    let cutoff = now - chrono::Duration::days(state.config.retention.raw_days);
                    match state.raw.prune_older_than(cutoff).await {
                        Ok(dropped) if dropped > 0 => info!(dropped = dropped, "raw payload retention applied"),
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "raw payload retention failed"),
                    }
                }
                _ = shutdown.changed() => {
                    debug!("retention task shutting down");
                    break;
                }
            }
        }
    });
}

/// Invalidate response-cache prefixes when a sync job completes; runs
/// strictly after the job's final commit because the orchestrator only
/// fires the event then.
fn spawn_invalidation(state: AppState, mut shutdown: watch::Receiver<bool>) {
    let mut completions = state.orchestrator.subscribe_completions();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                received = completions.recv() => {
                    match received {
                        Ok(entity) => {
                            state.cache.invalidate_prefix(&format!("/{}", entity.table()));
                            state.cache.invalidate_prefix("/overview");
                            state.cache.invalidate_prefix("/analytics");
                            debug!(entity = %entity, "response cache invalidated after sync");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped = skipped, "invalidation listener lagged; flushing all prefixes");
                            state.cache.invalidate_prefix("/");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
                _ = shutdown.changed() => {
                    debug!("invalidation task shutting down");
                    break;
                }
            }
        }
    });
}
