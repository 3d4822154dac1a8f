//! Storage and upstream seams.
//!
//! The sync orchestrator and the analytics engine are written against
//! these traits so they can be exercised with in-memory fakes; the
//! Postgres-backed implementations live in `pulse-storage` and the
//! HTTP client in `pulse-upstream`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::jsonapi::{ApiDocument, ApiParams};
use crate::timeseries::{Interval, TimeSeriesPoint};
use crate::types::{
    AggregatedMetric, CounterPatch, EntityType, Event, MarketingEntity, Metric, Profile,
    SyncStatus,
};

/// Read access to the upstream marketing platform. A page at a time;
/// callers walk `links.next` cursors themselves so page handling stays
/// serial and cancellable.
#[async_trait]
pub trait UpstreamApi: Send + Sync {
    async fn get(&self, path: &str, params: &ApiParams) -> Result<ApiDocument>;
}

/// Store for the four marketing entities (campaigns, flows, forms,
/// segments). They share a row shape; `entity` selects the table.
#[async_trait]
pub trait MarketingEntityStore: Send + Sync {
    async fn find_by_id(&self, entity: EntityType, id: &str) -> Result<Option<MarketingEntity>>;
    async fn find_by_status(&self, entity: EntityType, status: &str)
        -> Result<Vec<MarketingEntity>>;
    /// Prefix match on name.
    async fn find_by_name(&self, entity: EntityType, prefix: &str) -> Result<Vec<MarketingEntity>>;
    async fn find_by_date_range(
        &self,
        entity: EntityType,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<MarketingEntity>>;
    async fn find_all(&self, entity: EntityType, limit: i64, offset: i64)
        -> Result<Vec<MarketingEntity>>;
    async fn create(&self, row: &MarketingEntity) -> Result<()>;
    /// Idempotent upsert on `id`: mutable columns replaced, `created_at`
    /// preserved from the existing row.
    async fn create_or_update(&self, row: &MarketingEntity) -> Result<()>;
    async fn delete(&self, entity: EntityType, id: &str) -> Result<bool>;
    /// Transactional batch upsert: all rows or none.
    async fn create_batch(&self, entity: EntityType, rows: &[MarketingEntity]) -> Result<u64>;
    /// Partial counter update; `None` fields are left untouched.
    async fn update_metrics(
        &self,
        entity: EntityType,
        id: &str,
        patch: &CounterPatch,
    ) -> Result<()>;
    async fn find_updated_since(
        &self,
        entity: EntityType,
        ts: DateTime<Utc>,
    ) -> Result<Vec<MarketingEntity>>;
    async fn latest_update_timestamp(&self, entity: EntityType)
        -> Result<Option<DateTime<Utc>>>;
}

#[async_trait]
pub trait MetricStore: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<Metric>>;
    async fn find_by_name(&self, prefix: &str) -> Result<Vec<Metric>>;
    async fn find_by_date_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Metric>>;
    async fn find_all(&self, limit: i64, offset: i64) -> Result<Vec<Metric>>;
    async fn create(&self, metric: &Metric) -> Result<()>;
    async fn create_or_update(&self, metric: &Metric) -> Result<()>;
    async fn delete(&self, id: &str) -> Result<bool>;
    async fn create_batch(&self, metrics: &[Metric]) -> Result<u64>;
    async fn find_updated_since(&self, ts: DateTime<Utc>) -> Result<Vec<Metric>>;
    async fn latest_update_timestamp(&self) -> Result<Option<DateTime<Utc>>>;
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<Profile>>;
    async fn find_by_date_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Profile>>;
    async fn find_all(&self, limit: i64, offset: i64) -> Result<Vec<Profile>>;
    async fn create(&self, profile: &Profile) -> Result<()>;
    async fn create_or_update(&self, profile: &Profile) -> Result<()>;
    async fn delete(&self, id: &str) -> Result<bool>;
    async fn create_batch(&self, profiles: &[Profile]) -> Result<u64>;
    /// Advance `last_event_at` if `ts` is newer; never moves backwards.
    async fn advance_last_event(&self, id: &str, ts: DateTime<Utc>) -> Result<()>;
    async fn find_updated_since(&self, ts: DateTime<Utc>) -> Result<Vec<Profile>>;
    async fn latest_update_timestamp(&self) -> Result<Option<DateTime<Utc>>>;
}

#[async_trait]
pub trait EventStore: Send + Sync {
    async fn create_batch(&self, events: &[Event]) -> Result<u64>;
    async fn find_by_metric_id(&self, metric_id: &str, limit: i64) -> Result<Vec<Event>>;
    async fn find_by_profile_id(&self, profile_id: &str, limit: i64) -> Result<Vec<Event>>;
    async fn find_by_time_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        metric_id: Option<&str>,
    ) -> Result<Vec<Event>>;
    async fn count_by_metric_id(&self, metric_id: &str) -> Result<i64>;
    async fn sum_by_metric_id(&self, metric_id: &str) -> Result<f64>;
    /// On-the-fly bucket aggregation: sums `value` per bucket with null
    /// values counted as 1.
    async fn aggregate_buckets(
        &self,
        metric_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        interval: Interval,
    ) -> Result<Vec<TimeSeriesPoint>>;
    /// Retention enforcement; returns the number of rows dropped.
    async fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

#[async_trait]
pub trait AggregateStore: Send + Sync {
    async fn store_aggregated_metrics(&self, rows: &[AggregatedMetric]) -> Result<u64>;
    async fn stored_aggregated_metrics(
        &self,
        metric_id: &str,
        interval: Interval,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<AggregatedMetric>>;
    /// Recompute bucket summaries from events for the given window.
    async fn refresh_from_events(
        &self,
        interval: Interval,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<u64>;
}

#[async_trait]
pub trait SyncStatusStore: Send + Sync {
    async fn get(&self, entity: EntityType) -> Result<SyncStatus>;
    async fn all(&self) -> Result<Vec<SyncStatus>>;
    async fn mark_running(&self, entity: EntityType, started_at: DateTime<Utc>) -> Result<()>;
    /// Advance the watermark after a committed batch without touching
    /// the run status. Never moves backwards.
    async fn advance_watermark(&self, entity: EntityType, watermark: DateTime<Utc>) -> Result<()>;
    /// Record success. The stored watermark never decreases even if a
    /// smaller value is passed.
    async fn mark_succeeded(
        &self,
        entity: EntityType,
        watermark: Option<DateTime<Utc>>,
        record_count: i64,
    ) -> Result<()>;
    async fn mark_failed(&self, entity: EntityType, message: &str) -> Result<()>;
}

/// Bounded-retention audit log of raw upstream payloads. Recording is
/// best-effort; a failed write never fails the sync that produced it.
#[async_trait]
pub trait RawResponseStore: Send + Sync {
    async fn record(&self, endpoint: &str, payload: &serde_json::Value) -> Result<()>;
}

/// Cross-instance lease for sync jobs. The in-memory lease in the
/// orchestrator is authoritative for a single process; deployments with
/// several replicas add a database advisory lock behind this trait.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    async fn try_acquire(&self, entity: EntityType) -> Result<bool>;
    async fn release(&self, entity: EntityType) -> Result<()>;
}
