//! Entity-typed sync jobs with leases, watermarks, and bounded
//! fan-out.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{info, warn};

use pulse_core::traits::{
    EventStore, LeaseStore, MarketingEntityStore, MetricStore, ProfileStore, RawResponseStore,
    SyncStatusStore, UpstreamApi,
};
use pulse_core::{ApiDocument, ApiParams, EntityType, Error, Filter, Result, Sort};

use crate::transform;

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub page_size: u32,
    /// Wall-clock budget for one entity job
    pub job_deadline: Duration,
    /// Entity types synced concurrently by `sync_all`
    pub max_parallel_types: usize,
    /// Upper filter bound is now minus this margin
    pub clock_skew_margin: chrono::Duration,
    /// Events re-fetch this much history past the watermark
    pub event_overlap: chrono::Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: 50,
            job_deadline: Duration::from_secs(600),
            max_parallel_types: 4,
            clock_skew_margin: chrono::Duration::minutes(1),
            event_overlap: chrono::Duration::hours(1),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    pub force: bool,
    pub since: Option<DateTime<Utc>>,
    pub entity_types: Option<Vec<EntityType>>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct EntitySyncOutcome {
    pub ok: bool,
    pub count: u64,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SyncReport {
    pub success: bool,
    pub per_entity: BTreeMap<EntityType, EntitySyncOutcome>,
}

/// Runs sync jobs. One job per entity type at a time; pages are
/// processed serially within a job so the watermark only ever reflects
/// fully committed batches.
pub struct SyncOrchestrator {
    client: Arc<dyn UpstreamApi>,
    marketing: Arc<dyn MarketingEntityStore>,
    metrics: Arc<dyn MetricStore>,
    profiles: Arc<dyn ProfileStore>,
    events: Arc<dyn EventStore>,
    status: Arc<dyn SyncStatusStore>,
    /// Optional cross-instance lease (database advisory lock)
    lease_store: Option<Arc<dyn LeaseStore>>,
    /// Optional raw-payload audit log
    raw: Option<Arc<dyn RawResponseStore>>,
    /// In-process lease per entity type
    leases: Mutex<HashSet<EntityType>>,
    completions: broadcast::Sender<EntityType>,
    config: SyncConfig,
}

impl SyncOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: Arc<dyn UpstreamApi>,
        marketing: Arc<dyn MarketingEntityStore>,
        metrics: Arc<dyn MetricStore>,
        profiles: Arc<dyn ProfileStore>,
        events: Arc<dyn EventStore>,
        status: Arc<dyn SyncStatusStore>,
        lease_store: Option<Arc<dyn LeaseStore>>,
        raw: Option<Arc<dyn RawResponseStore>>,
        config: SyncConfig,
    ) -> Self {
        let (completions, _) = broadcast::channel(64);
        Self {
            client,
            marketing,
            metrics,
            profiles,
            events,
            status,
            lease_store,
            raw,
            leases: Mutex::new(HashSet::new()),
            completions,
            config,
        }
    }

    /// Completion events, fired after the final batch of a successful
    /// job commits. The HTTP layer uses them for cache invalidation.
    pub fn subscribe_completions(&self) -> broadcast::Receiver<EntityType> {
        self.completions.subscribe()
    }

    /// Run one entity job to completion (or failure). A job already
    /// holding the lease drops this trigger.
    pub async fn sync_entity(
        &self,
        entity: EntityType,
        force: bool,
        since: Option<DateTime<Utc>>,
    ) -> EntitySyncOutcome {
        let started = Instant::now();

        if !self.leases.lock().insert(entity) {
            warn!(entity = %entity, "sync already in progress; trigger dropped");
            return EntitySyncOutcome {
                ok: false,
                count: 0,
                duration_ms: started.elapsed().as_millis() as u64,
                error: Some("sync already in progress".to_string()),
            };
        }

        if let Some(lease_store) = &self.lease_store {
            match lease_store.try_acquire(entity).await {
                Ok(true) => {}
                Ok(false) => {
                    self.leases.lock().remove(&entity);
                    warn!(entity = %entity, "sync lease held elsewhere; trigger dropped");
                    return EntitySyncOutcome {
                        ok: false,
                        count: 0,
                        duration_ms: started.elapsed().as_millis() as u64,
                        error: Some("sync lease held by another instance".to_string()),
                    };
                }
                Err(e) => {
                    self.leases.lock().remove(&entity);
                    return EntitySyncOutcome {
                        ok: false,
                        count: 0,
                        duration_ms: started.elapsed().as_millis() as u64,
                        error: Some(format!("lease acquisition failed: {}", e)),
                    };
                }
            }
        }

        let outcome = match tokio::time::timeout(
            self.config.job_deadline,
            self.run_job(entity, force, since),
        )
        .await
        {
            Ok(Ok(count)) => {
                info!(entity = %entity, count = count, "sync succeeded");
                EntitySyncOutcome {
                    ok: true,
                    count,
                    duration_ms: started.elapsed().as_millis() as u64,
                    error: None,
                }
            }
            Ok(Err(e)) => {
                warn!(entity = %entity, error = %e, "sync failed");
                let _ = self.status.mark_failed(entity, &e.to_string()).await;
                EntitySyncOutcome {
                    ok: false,
                    count: 0,
                    duration_ms: started.elapsed().as_millis() as u64,
                    error: Some(e.to_string()),
                }
            }
            Err(_) => {
                // in-flight page is dropped; the watermark stays at the
                // last committed batch
                let e = Error::Cancelled(format!(
                    "sync exceeded deadline of {:?}",
                    self.config.job_deadline
                ));
                warn!(entity = %entity, error = %e, "sync cancelled");
                let _ = self.status.mark_failed(entity, &e.to_string()).await;
                EntitySyncOutcome {
                    ok: false,
                    count: 0,
                    duration_ms: started.elapsed().as_millis() as u64,
                    error: Some(e.to_string()),
                }
            }
        };

        if let Some(lease_store) = &self.lease_store {
            if let Err(e) = lease_store.release(entity).await {
                warn!(entity = %entity, error = %e, "lease release failed");
            }
        }
        self.leases.lock().remove(&entity);

        if outcome.ok {
            let _ = self.completions.send(entity);
        }
        outcome
    }

    /// Sync the selected entity types: parallel across types with
    /// bounded fan-out, serial within a type.
    pub async fn sync_all(&self, options: SyncOptions) -> SyncReport {
        let entities = options
            .entity_types
            .unwrap_or_else(|| EntityType::ALL.to_vec());

        let limit = self.config.max_parallel_types.max(1);
        let mut pending = entities.into_iter();
        let mut running = FuturesUnordered::new();
        let mut per_entity = BTreeMap::new();

        loop {
            while running.len() < limit {
                match pending.next() {
                    Some(entity) => running.push(async move {
                        (entity, self.sync_entity(entity, options.force, options.since).await)
                    }),
                    None => break,
                }
            }
            match running.next().await {
                Some((entity, outcome)) => {
                    per_entity.insert(entity, outcome);
                }
                None => break,
            }
        }

        SyncReport {
            success: per_entity.values().all(|o| o.ok),
            per_entity,
        }
    }

    async fn run_job(
        &self,
        entity: EntityType,
        force: bool,
        since: Option<DateTime<Utc>>,
    ) -> Result<u64> {
        let now = Utc::now();
        self.status.mark_running(entity, now).await?;

        let watermark = if force {
            None
        } else if since.is_some() {
            since
        } else {
            self.status.get(entity).await?.last_watermark
        };

        // events re-fetch an overlap window; duplicate rows are
        // swallowed by the append-only conflict rule
        let effective = match (entity, watermark) {
            (EntityType::Event, Some(w)) => Some(w - self.config.event_overlap),
            (_, w) => w,
        };
        let upper = now - self.config.clock_skew_margin;

        let mut params = ApiParams::new()
            .page_size(self.config.page_size)
            .sort(Sort::asc("updated"))
            .filter(Filter::updated_before(upper));
        if let Some(w) = effective {
            params = params.filter(Filter::updated_since(w));
        }

        let mut cursor: Option<String> = None;
        let mut total = 0u64;
        let mut max_updated: Option<DateTime<Utc>> = None;

        loop {
            let page_params = params.clone().with_cursor(cursor.clone());
            let doc = self.client.get(entity.api_path(), &page_params).await?;
            if doc.is_empty() {
                break;
            }

            if let Some(raw) = &self.raw {
                match serde_json::to_value(&doc) {
                    Ok(payload) => {
                        if let Err(e) = raw.record(entity.api_path(), &payload).await {
                            warn!(entity = %entity, error = %e, "raw payload audit write failed");
                        }
                    }
                    Err(e) => warn!(entity = %entity, error = %e, "raw payload serialization failed"),
                }
            }

            let (count, page_max) = self.ingest_page(entity, &doc).await?;
            total += count;

            if let Some(ts) = page_max {
                max_updated = Some(max_updated.map_or(ts, |m| m.max(ts)));
                // persist progress so a later cancellation resumes here
                self.status.advance_watermark(entity, ts).await?;
            }

            cursor = doc.next_cursor();
            if cursor.is_none() {
                break;
            }
        }

        self.status
            .mark_succeeded(entity, max_updated, total as i64)
            .await?;
        Ok(total)
    }

    /// Transform one page and commit it as a single batch. Returns the
    /// committed row count and the page's max `updated` timestamp.
    async fn ingest_page(
        &self,
        entity: EntityType,
        doc: &ApiDocument,
    ) -> Result<(u64, Option<DateTime<Utc>>)> {
        let now = Utc::now();
        let resources = doc.resources();
        let page_max = resources.iter().filter_map(transform::updated_timestamp).max();

        let count = match entity {
            EntityType::Campaign | EntityType::Flow | EntityType::Form | EntityType::Segment => {
                let rows = resources
                    .iter()
                    .map(|r| transform::marketing_entity_from_resource(entity, r, now))
                    .collect::<Result<Vec<_>>>()?;
                self.marketing.create_batch(entity, &rows).await?
            }
            EntityType::Metric => {
                let rows = resources
                    .iter()
                    .map(|r| transform::metric_from_resource(r, now))
                    .collect::<Result<Vec<_>>>()?;
                self.metrics.create_batch(&rows).await?
            }
            EntityType::Profile => {
                let rows = resources
                    .iter()
                    .map(|r| transform::profile_from_resource(r, now))
                    .collect::<Result<Vec<_>>>()?;
                self.profiles.create_batch(&rows).await?
            }
            EntityType::Event => self.ingest_events(doc, now).await?,
        };

        Ok((count, page_max))
    }

    /// Events resolve to existing metric and profile rows; missing
    /// referents are ingested first, from the page's `included`
    /// resources when present, as stubs otherwise.
    async fn ingest_events(&self, doc: &ApiDocument, now: DateTime<Utc>) -> Result<u64> {
        let events = doc
            .resources()
            .iter()
            .map(transform::event_from_resource)
            .collect::<Result<Vec<_>>>()?;

        let metric_ids: HashSet<&str> = events.iter().map(|e| e.metric_id.as_str()).collect();
        for metric_id in metric_ids {
            if self.metrics.find_by_id(metric_id).await?.is_none() {
                self.metrics
                    .create_or_update(&transform::included_metric(doc, metric_id, now))
                    .await?;
            }
        }

        let profile_ids: HashSet<&str> = events.iter().map(|e| e.profile_id.as_str()).collect();
        for profile_id in profile_ids {
            if self.profiles.find_by_id(profile_id).await?.is_none() {
                self.profiles
                    .create_or_update(&transform::included_profile(doc, profile_id, now))
                    .await?;
            }
        }

        let count = self.events.create_batch(&events).await?;

        // lastEventAt advances monotonically per profile
        let mut latest: BTreeMap<&str, DateTime<Utc>> = BTreeMap::new();
        for event in &events {
            latest
                .entry(event.profile_id.as_str())
                .and_modify(|ts| *ts = (*ts).max(event.timestamp))
                .or_insert(event.timestamp);
        }
        for (profile_id, ts) in latest {
            self.profiles.advance_last_event(profile_id, ts).await?;
        }

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pulse_core::{
        AggregatedMetric, CounterPatch, Event, Interval, MarketingEntity, Metric, Profile,
        Resource, SyncState, SyncStatus, TimeSeriesPoint,
    };
    use std::collections::HashMap;

    // ---- in-memory fakes -------------------------------------------------

    #[derive(Default)]
    struct FakeUpstream {
        /// canonical key prefix -> pages served in order of cursor
        pages: Mutex<HashMap<String, Vec<ApiDocument>>>,
        calls: Mutex<Vec<String>>,
        delay: Option<Duration>,
    }

    impl FakeUpstream {
        fn with_pages(path: &str, pages: Vec<ApiDocument>) -> Self {
            let mut map = HashMap::new();
            map.insert(path.to_string(), pages);
            Self {
                pages: Mutex::new(map),
                calls: Mutex::new(Vec::new()),
                delay: None,
            }
        }
    }

    #[async_trait]
    impl UpstreamApi for FakeUpstream {
        async fn get(&self, path: &str, params: &ApiParams) -> Result<ApiDocument> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.calls.lock().push(params.canonical_key(path));
            let pages = self.pages.lock();
            let list = pages
                .get(path)
                .ok_or_else(|| Error::NotFound(format!("no fixture for {}", path)))?;
            let idx = match &params.page_cursor {
                None => 0,
                Some(cursor) => cursor
                    .strip_prefix("page-")
                    .and_then(|n| n.parse::<usize>().ok())
                    .unwrap_or(0),
            };
            Ok(list.get(idx).cloned().unwrap_or_default())
        }
    }

    #[derive(Default)]
    struct MemStores {
        marketing: Mutex<HashMap<(EntityType, String), MarketingEntity>>,
        metrics: Mutex<HashMap<String, Metric>>,
        profiles: Mutex<HashMap<String, Profile>>,
        events: Mutex<HashMap<String, Event>>,
        statuses: Mutex<HashMap<EntityType, SyncStatus>>,
        fail_batches: Mutex<bool>,
    }

    #[async_trait]
    impl MarketingEntityStore for MemStores {
        async fn find_by_id(&self, entity: EntityType, id: &str) -> Result<Option<MarketingEntity>> {
            Ok(self.marketing.lock().get(&(entity, id.to_string())).cloned())
        }
        async fn find_by_status(&self, entity: EntityType, status: &str) -> Result<Vec<MarketingEntity>> {
            Ok(self
                .marketing
                .lock()
                .values()
                .filter(|m| m.entity_type == entity && m.status == status)
                .cloned()
                .collect())
        }
        async fn find_by_name(&self, entity: EntityType, prefix: &str) -> Result<Vec<MarketingEntity>> {
            Ok(self
                .marketing
                .lock()
                .values()
                .filter(|m| m.entity_type == entity && m.name.starts_with(prefix))
                .cloned()
                .collect())
        }
        async fn find_by_date_range(
            &self,
            entity: EntityType,
            start: DateTime<Utc>,
            end: DateTime<Utc>,
        ) -> Result<Vec<MarketingEntity>> {
            Ok(self
                .marketing
                .lock()
                .values()
                .filter(|m| m.entity_type == entity && m.created_at >= start && m.created_at <= end)
                .cloned()
                .collect())
        }
        async fn find_all(&self, entity: EntityType, limit: i64, offset: i64) -> Result<Vec<MarketingEntity>> {
            let mut rows: Vec<_> = self
                .marketing
                .lock()
                .values()
                .filter(|m| m.entity_type == entity)
                .cloned()
                .collect();
            rows.sort_by(|a, b| a.id.cmp(&b.id));
            Ok(rows
                .into_iter()
                .skip(offset as usize)
                .take(limit as usize)
                .collect())
        }
        async fn create(&self, row: &MarketingEntity) -> Result<()> {
            MarketingEntityStore::create_or_update(self, row).await
        }
        async fn create_or_update(&self, row: &MarketingEntity) -> Result<()> {
            let mut map = self.marketing.lock();
            let key = (row.entity_type, row.id.clone());
            let mut stored = row.clone();
            if let Some(existing) = map.get(&key) {
                stored.created_at = existing.created_at;
            }
            map.insert(key, stored);
            Ok(())
        }
        async fn delete(&self, entity: EntityType, id: &str) -> Result<bool> {
            Ok(self.marketing.lock().remove(&(entity, id.to_string())).is_some())
        }
        async fn create_batch(&self, entity: EntityType, rows: &[MarketingEntity]) -> Result<u64> {
            if *self.fail_batches.lock() {
                return Err(Error::Database(format!(
                    "batch of {} rows rolled back: injected failure",
                    rows.len()
                )));
            }
            for row in rows {
                assert_eq!(row.entity_type, entity);
                MarketingEntityStore::create_or_update(self, row).await?;
            }
            Ok(rows.len() as u64)
        }
        async fn update_metrics(&self, entity: EntityType, id: &str, patch: &CounterPatch) -> Result<()> {
            let mut map = self.marketing.lock();
            let row = map
                .get_mut(&(entity, id.to_string()))
                .ok_or_else(|| Error::NotFound(id.to_string()))?;
            if let Some(v) = patch.sent_count {
                row.sent_count = v;
            }
            if let Some(v) = patch.open_count {
                row.open_count = v;
            }
            if let Some(v) = patch.click_count {
                row.click_count = v;
            }
            if let Some(v) = patch.conversion_count {
                row.conversion_count = v;
            }
            if let Some(v) = patch.revenue {
                row.revenue = v;
            }
            Ok(())
        }
        async fn find_updated_since(&self, entity: EntityType, ts: DateTime<Utc>) -> Result<Vec<MarketingEntity>> {
            Ok(self
                .marketing
                .lock()
                .values()
                .filter(|m| m.entity_type == entity && m.updated_at > ts)
                .cloned()
                .collect())
        }
        async fn latest_update_timestamp(&self, entity: EntityType) -> Result<Option<DateTime<Utc>>> {
            Ok(self
                .marketing
                .lock()
                .values()
                .filter(|m| m.entity_type == entity)
                .map(|m| m.updated_at)
                .max())
        }
    }

    #[async_trait]
    impl MetricStore for MemStores {
        async fn find_by_id(&self, id: &str) -> Result<Option<Metric>> {
            Ok(self.metrics.lock().get(id).cloned())
        }
        async fn find_by_name(&self, prefix: &str) -> Result<Vec<Metric>> {
            Ok(self
                .metrics
                .lock()
                .values()
                .filter(|m| m.name.starts_with(prefix))
                .cloned()
                .collect())
        }
        async fn find_by_date_range(
            &self,
            start: DateTime<Utc>,
            end: DateTime<Utc>,
        ) -> Result<Vec<Metric>> {
            Ok(self
                .metrics
                .lock()
                .values()
                .filter(|m| m.created_at >= start && m.created_at <= end)
                .cloned()
                .collect())
        }
        async fn find_all(&self, _limit: i64, _offset: i64) -> Result<Vec<Metric>> {
            Ok(self.metrics.lock().values().cloned().collect())
        }
        async fn create(&self, metric: &Metric) -> Result<()> {
            MetricStore::create_or_update(self, metric).await
        }
        async fn create_or_update(&self, metric: &Metric) -> Result<()> {
            self.metrics.lock().insert(metric.id.clone(), metric.clone());
            Ok(())
        }
        async fn delete(&self, id: &str) -> Result<bool> {
            Ok(self.metrics.lock().remove(id).is_some())
        }
        async fn create_batch(&self, metrics: &[Metric]) -> Result<u64> {
            for m in metrics {
                self.metrics.lock().insert(m.id.clone(), m.clone());
            }
            Ok(metrics.len() as u64)
        }
        async fn find_updated_since(&self, ts: DateTime<Utc>) -> Result<Vec<Metric>> {
            Ok(self
                .metrics
                .lock()
                .values()
                .filter(|m| m.updated_at > ts)
                .cloned()
                .collect())
        }
        async fn latest_update_timestamp(&self) -> Result<Option<DateTime<Utc>>> {
            Ok(self.metrics.lock().values().map(|m| m.updated_at).max())
        }
    }

    #[async_trait]
    impl ProfileStore for MemStores {
        async fn find_by_id(&self, id: &str) -> Result<Option<Profile>> {
            Ok(self.profiles.lock().get(id).cloned())
        }
        async fn find_by_date_range(
            &self,
            start: DateTime<Utc>,
            end: DateTime<Utc>,
        ) -> Result<Vec<Profile>> {
            Ok(self
                .profiles
                .lock()
                .values()
                .filter(|p| p.created_at >= start && p.created_at <= end)
                .cloned()
                .collect())
        }
        async fn find_all(&self, _limit: i64, _offset: i64) -> Result<Vec<Profile>> {
            Ok(self.profiles.lock().values().cloned().collect())
        }
        async fn create(&self, profile: &Profile) -> Result<()> {
            ProfileStore::create_or_update(self, profile).await
        }
        async fn create_or_update(&self, profile: &Profile) -> Result<()> {
            self.profiles.lock().insert(profile.id.clone(), profile.clone());
            Ok(())
        }
        async fn delete(&self, id: &str) -> Result<bool> {
            Ok(self.profiles.lock().remove(id).is_some())
        }
        async fn create_batch(&self, profiles: &[Profile]) -> Result<u64> {
            for p in profiles {
                self.profiles.lock().insert(p.id.clone(), p.clone());
            }
            Ok(profiles.len() as u64)
        }
        async fn advance_last_event(&self, id: &str, ts: DateTime<Utc>) -> Result<()> {
            if let Some(p) = self.profiles.lock().get_mut(id) {
                p.last_event_at = Some(p.last_event_at.map_or(ts, |prev| prev.max(ts)));
            }
            Ok(())
        }
        async fn find_updated_since(&self, ts: DateTime<Utc>) -> Result<Vec<Profile>> {
            Ok(self
                .profiles
                .lock()
                .values()
                .filter(|p| p.updated_at > ts)
                .cloned()
                .collect())
        }
        async fn latest_update_timestamp(&self) -> Result<Option<DateTime<Utc>>> {
            Ok(self.profiles.lock().values().map(|p| p.updated_at).max())
        }
    }

    #[async_trait]
    impl EventStore for MemStores {
        async fn create_batch(&self, events: &[Event]) -> Result<u64> {
            let mut map = self.events.lock();
            let mut inserted = 0;
            for e in events {
                if map.insert(e.id.clone(), e.clone()).is_none() {
                    inserted += 1;
                }
            }
            Ok(inserted)
        }
        async fn find_by_metric_id(&self, metric_id: &str, _limit: i64) -> Result<Vec<Event>> {
            Ok(self
                .events
                .lock()
                .values()
                .filter(|e| e.metric_id == metric_id)
                .cloned()
                .collect())
        }
        async fn find_by_profile_id(&self, profile_id: &str, _limit: i64) -> Result<Vec<Event>> {
            Ok(self
                .events
                .lock()
                .values()
                .filter(|e| e.profile_id == profile_id)
                .cloned()
                .collect())
        }
        async fn find_by_time_range(
            &self,
            start: DateTime<Utc>,
            end: DateTime<Utc>,
            metric_id: Option<&str>,
        ) -> Result<Vec<Event>> {
            Ok(self
                .events
                .lock()
                .values()
                .filter(|e| {
                    e.timestamp >= start
                        && e.timestamp <= end
                        && metric_id.map_or(true, |m| e.metric_id == m)
                })
                .cloned()
                .collect())
        }
        async fn count_by_metric_id(&self, metric_id: &str) -> Result<i64> {
            Ok(self
                .events
                .lock()
                .values()
                .filter(|e| e.metric_id == metric_id)
                .count() as i64)
        }
        async fn sum_by_metric_id(&self, _metric_id: &str) -> Result<f64> {
            Ok(0.0)
        }
        async fn aggregate_buckets(
            &self,
            _metric_id: &str,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
            _interval: Interval,
        ) -> Result<Vec<TimeSeriesPoint>> {
            Ok(Vec::new())
        }
        async fn prune_older_than(&self, _cutoff: DateTime<Utc>) -> Result<u64> {
            Ok(0)
        }
    }

    #[async_trait]
    impl SyncStatusStore for MemStores {
        async fn get(&self, entity: EntityType) -> Result<SyncStatus> {
            Ok(self
                .statuses
                .lock()
                .get(&entity)
                .cloned()
                .unwrap_or_else(|| SyncStatus::idle(entity)))
        }
        async fn all(&self) -> Result<Vec<SyncStatus>> {
            Ok(self.statuses.lock().values().cloned().collect())
        }
        async fn mark_running(&self, entity: EntityType, started_at: DateTime<Utc>) -> Result<()> {
            let mut map = self.statuses.lock();
            let status = map.entry(entity).or_insert_with(|| SyncStatus::idle(entity));
            status.last_sync_started_at = Some(started_at);
            status.state = SyncState::Running;
            status.error_message = None;
            Ok(())
        }
        async fn advance_watermark(&self, entity: EntityType, watermark: DateTime<Utc>) -> Result<()> {
            let mut map = self.statuses.lock();
            let status = map.entry(entity).or_insert_with(|| SyncStatus::idle(entity));
            status.last_watermark = Some(
                status
                    .last_watermark
                    .map_or(watermark, |prev| prev.max(watermark)),
            );
            Ok(())
        }
        async fn mark_succeeded(
            &self,
            entity: EntityType,
            watermark: Option<DateTime<Utc>>,
            record_count: i64,
        ) -> Result<()> {
            let mut map = self.statuses.lock();
            let status = map.entry(entity).or_insert_with(|| SyncStatus::idle(entity));
            if let Some(w) = watermark {
                status.last_watermark = Some(status.last_watermark.map_or(w, |prev| prev.max(w)));
            }
            status.last_sync_completed_at = Some(Utc::now());
            status.state = SyncState::Succeeded;
            status.record_count = record_count;
            status.error_message = None;
            Ok(())
        }
        async fn mark_failed(&self, entity: EntityType, message: &str) -> Result<()> {
            let mut map = self.statuses.lock();
            let status = map.entry(entity).or_insert_with(|| SyncStatus::idle(entity));
            status.last_sync_completed_at = Some(Utc::now());
            status.state = SyncState::Failed;
            status.error_message = Some(message.to_string());
            Ok(())
        }
    }

    // ---- fixtures --------------------------------------------------------

    fn campaign_resource(id: &str, updated: &str) -> Resource {
        serde_json::from_value(serde_json::json!({
            "type": "campaign",
            "id": id,
            "attributes": {
                "name": format!("Campaign {}", id),
                "status": "sent",
                "created": "2025-04-01T00:00:00Z",
                "updated": updated,
                "statistics": {"sent": 10, "opens": 4, "clicks": 1, "conversions": 0, "revenue": "5.00"}
            }
        }))
        .unwrap()
    }

    fn page(resources: Vec<Resource>, next: Option<&str>) -> ApiDocument {
        let doc = ApiDocument::from_resources(resources);
        match next {
            Some(cursor) => doc.with_next_cursor(cursor),
            None => doc,
        }
    }

    fn orchestrator(
        upstream: Arc<FakeUpstream>,
        stores: Arc<MemStores>,
        config: SyncConfig,
    ) -> SyncOrchestrator {
        SyncOrchestrator::new(
            upstream,
            stores.clone(),
            stores.clone(),
            stores.clone(),
            stores.clone(),
            stores,
            None,
            None,
            config,
        )
    }

    // ---- tests -----------------------------------------------------------

    #[tokio::test]
    async fn two_pages_advance_watermark_to_max_updated() {
        let first: Vec<Resource> = (0..50)
            .map(|i| campaign_resource(&format!("a{}", i), "2025-05-01T00:00:00Z"))
            .collect();
        let second: Vec<Resource> = (0..50)
            .map(|i| campaign_resource(&format!("b{}", i), "2025-05-03T00:00:00Z"))
            .collect();

        let upstream = Arc::new(FakeUpstream::with_pages(
            "/api/campaigns",
            vec![page(first, Some("page-1")), page(second, None)],
        ));
        let stores = Arc::new(MemStores::default());
        let orch = orchestrator(upstream, stores.clone(), SyncConfig::default());

        let outcome = orch.sync_entity(EntityType::Campaign, false, None).await;
        assert!(outcome.ok, "{:?}", outcome.error);
        assert_eq!(outcome.count, 100);

        let status = SyncStatusStore::get(stores.as_ref(), EntityType::Campaign)
            .await
            .unwrap();
        assert_eq!(status.state, SyncState::Succeeded);
        assert_eq!(status.record_count, 100);
        assert_eq!(
            status.last_watermark,
            Some("2025-05-03T00:00:00Z".parse().unwrap())
        );

        // a second run with no upstream changes past the watermark
        // still succeeds; the watermark never regresses
        let upstream2 = Arc::new(FakeUpstream::with_pages("/api/campaigns", vec![page(vec![], None)]));
        let orch2 = orchestrator(upstream2.clone(), stores.clone(), SyncConfig::default());
        let outcome = orch2.sync_entity(EntityType::Campaign, false, None).await;
        assert!(outcome.ok);
        assert_eq!(outcome.count, 0);

        let status = SyncStatusStore::get(stores.as_ref(), EntityType::Campaign)
            .await
            .unwrap();
        assert_eq!(
            status.last_watermark,
            Some("2025-05-03T00:00:00Z".parse().unwrap())
        );
        assert_eq!(status.record_count, 0);

        // the incremental run filtered on the stored watermark
        let calls = upstream2.calls.lock();
        assert!(calls[0].contains("greater-or-equal(updated,2025-05-03T00:00:00Z)"));
    }

    #[tokio::test]
    async fn force_ignores_watermark() {
        let upstream = Arc::new(FakeUpstream::with_pages(
            "/api/campaigns",
            vec![page(vec![campaign_resource("c1", "2025-05-01T00:00:00Z")], None)],
        ));
        let stores = Arc::new(MemStores::default());
        stores
            .advance_watermark(EntityType::Campaign, "2025-05-02T00:00:00Z".parse().unwrap())
            .await
            .unwrap();

        let orch = orchestrator(upstream.clone(), stores, SyncConfig::default());
        let outcome = orch.sync_entity(EntityType::Campaign, true, None).await;
        assert!(outcome.ok);

        let calls = upstream.calls.lock();
        assert!(
            !calls[0].contains("greater-or-equal(updated"),
            "force run must not filter on the watermark: {}",
            calls[0]
        );
    }

    #[tokio::test]
    async fn failed_batch_marks_failed_and_keeps_watermark() {
        let upstream = Arc::new(FakeUpstream::with_pages(
            "/api/campaigns",
            vec![page(vec![campaign_resource("c1", "2025-05-04T00:00:00Z")], None)],
        ));
        let stores = Arc::new(MemStores::default());
        let prior: DateTime<Utc> = "2025-05-01T00:00:00Z".parse().unwrap();
        stores.advance_watermark(EntityType::Campaign, prior).await.unwrap();
        *stores.fail_batches.lock() = true;

        let orch = orchestrator(upstream, stores.clone(), SyncConfig::default());
        let outcome = orch.sync_entity(EntityType::Campaign, false, None).await;
        assert!(!outcome.ok);

        let status = SyncStatusStore::get(stores.as_ref(), EntityType::Campaign)
            .await
            .unwrap();
        assert_eq!(status.state, SyncState::Failed);
        assert!(status.error_message.is_some());
        assert_eq!(status.last_watermark, Some(prior), "failed batch must not advance");
    }

    #[tokio::test]
    async fn concurrent_triggers_drop_second() {
        let mut upstream = FakeUpstream::with_pages(
            "/api/campaigns",
            vec![page(vec![campaign_resource("c1", "2025-05-01T00:00:00Z")], None)],
        );
        upstream.delay = Some(Duration::from_millis(150));
        let upstream = Arc::new(upstream);
        let stores = Arc::new(MemStores::default());
        let orch = Arc::new(orchestrator(upstream, stores, SyncConfig::default()));

        let first = {
            let orch = orch.clone();
            tokio::spawn(async move { orch.sync_entity(EntityType::Campaign, false, None).await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        let second = orch.sync_entity(EntityType::Campaign, false, None).await;

        assert!(!second.ok);
        assert!(second.error.unwrap().contains("already in progress"));
        assert!(first.await.unwrap().ok);
    }

    #[tokio::test]
    async fn deadline_cancels_job_and_keeps_committed_watermark() {
        let mut upstream = FakeUpstream::with_pages(
            "/api/campaigns",
            vec![
                page(vec![campaign_resource("c1", "2025-05-01T00:00:00Z")], Some("page-1")),
                page(vec![campaign_resource("c2", "2025-05-02T00:00:00Z")], None),
            ],
        );
        upstream.delay = Some(Duration::from_millis(80));
        let upstream = Arc::new(upstream);
        let stores = Arc::new(MemStores::default());
        let config = SyncConfig {
            job_deadline: Duration::from_millis(120),
            ..SyncConfig::default()
        };

        let orch = orchestrator(upstream, stores.clone(), config);
        let outcome = orch.sync_entity(EntityType::Campaign, false, None).await;
        assert!(!outcome.ok);
        assert!(outcome.error.unwrap().contains("deadline"));

        let status = SyncStatusStore::get(stores.as_ref(), EntityType::Campaign)
            .await
            .unwrap();
        assert_eq!(status.state, SyncState::Failed);
        // page one committed before the deadline; its watermark stands
        assert_eq!(
            status.last_watermark,
            Some("2025-05-01T00:00:00Z".parse().unwrap())
        );
    }

    #[tokio::test]
    async fn events_create_missing_referents_first() {
        let event: Resource = serde_json::from_value(serde_json::json!({
            "type": "event",
            "id": "e1",
            "attributes": {"timestamp": "2025-05-01T10:00:00Z", "value": 25.0, "updated": "2025-05-01T10:00:00Z"},
            "relationships": {
                "metric": {"data": {"type": "metric", "id": "m1"}},
                "profile": {"data": {"type": "profile", "id": "p1"}}
            }
        }))
        .unwrap();
        let mut doc = page(vec![event], None);
        doc.included = vec![serde_json::from_value(serde_json::json!({
            "type": "metric", "id": "m1", "attributes": {"name": "Placed Order"}
        }))
        .unwrap()];

        let upstream = Arc::new(FakeUpstream::with_pages("/api/events", vec![doc]));
        let stores = Arc::new(MemStores::default());
        let orch = orchestrator(upstream, stores.clone(), SyncConfig::default());

        let outcome = orch.sync_entity(EntityType::Event, false, None).await;
        assert!(outcome.ok, "{:?}", outcome.error);
        assert_eq!(outcome.count, 1);

        // referents were created before the event
        let metric = MetricStore::find_by_id(stores.as_ref(), "m1").await.unwrap();
        assert_eq!(metric.unwrap().name, "Placed Order");
        let profile = ProfileStore::find_by_id(stores.as_ref(), "p1").await.unwrap().unwrap();
        assert_eq!(
            profile.last_event_at,
            Some("2025-05-01T10:00:00Z".parse().unwrap())
        );
    }

    #[tokio::test]
    async fn sync_all_reports_per_entity() {
        let mut pages = HashMap::new();
        for entity in EntityType::ALL {
            pages.insert(entity.api_path().to_string(), vec![page(vec![], None)]);
        }
        let upstream = Arc::new(FakeUpstream {
            pages: Mutex::new(pages),
            calls: Mutex::new(Vec::new()),
            delay: None,
        });
        let stores = Arc::new(MemStores::default());
        let orch = orchestrator(upstream, stores, SyncConfig::default());

        let report = orch
            .sync_all(SyncOptions {
                entity_types: Some(vec![EntityType::Campaign, EntityType::Flow, EntityType::Metric]),
                ..Default::default()
            })
            .await;

        assert!(report.success);
        assert_eq!(report.per_entity.len(), 3);
        assert!(report.per_entity.values().all(|o| o.ok));
    }

    #[tokio::test]
    async fn completion_events_fire_on_success() {
        let upstream = Arc::new(FakeUpstream::with_pages("/api/campaigns", vec![page(vec![], None)]));
        let stores = Arc::new(MemStores::default());
        let orch = orchestrator(upstream, stores, SyncConfig::default());

        let mut rx = orch.subscribe_completions();
        let outcome = orch.sync_entity(EntityType::Campaign, false, None).await;
        assert!(outcome.ok);
        assert_eq!(rx.recv().await.unwrap(), EntityType::Campaign);
    }
}
