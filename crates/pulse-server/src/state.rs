//! Shared application state handed to every handler.

use std::sync::Arc;

use pulse_analytics::AnalyticsEngine;
use pulse_core::traits::{
    AggregateStore, EventStore, MarketingEntityStore, MetricStore, ProfileStore, SyncStatusStore,
};
use pulse_storage::{Database, RawResponseRepository, ResponseCache};
use pulse_sync::SyncOrchestrator;
use pulse_upstream::UpstreamClient;

use crate::config::AppConfig;
use crate::monitoring::Monitor;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: Arc<Database>,
    pub marketing: Arc<dyn MarketingEntityStore>,
    pub metrics: Arc<dyn MetricStore>,
    pub profiles: Arc<dyn ProfileStore>,
    pub events: Arc<dyn EventStore>,
    pub aggregates: Arc<dyn AggregateStore>,
    pub sync_status: Arc<dyn SyncStatusStore>,
    pub raw: Arc<RawResponseRepository>,
    pub client: Arc<UpstreamClient>,
    pub orchestrator: Arc<SyncOrchestrator>,
    pub engine: Arc<AnalyticsEngine>,
    pub cache: ResponseCache,
    pub monitor: Arc<Monitor>,
}
