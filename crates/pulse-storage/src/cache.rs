//! In-memory response cache for the HTTP layer.
//!
//! Keyed on `(endpoint, normalized query params)`. Each entry carries
//! its own TTL so endpoint classes can age differently; concurrent
//! misses for the same key share a single computation; sync completion
//! invalidates by key prefix.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use moka::future::Cache;
use serde_json::Value;
use tracing::debug;

use pulse_core::{Error, Result};

#[derive(Debug, Clone)]
pub struct ResponseCacheConfig {
    pub max_capacity: u64,
    /// Upper bound; per-call TTLs may be shorter
    pub max_ttl: Duration,
}

impl Default for ResponseCacheConfig {
    fn default() -> Self {
        Self {
            max_capacity: 10_000,
            max_ttl: Duration::from_secs(600),
        }
    }
}

#[derive(Clone)]
struct CachedEntry {
    body: Arc<Value>,
    inserted_at: Instant,
    ttl: Duration,
}

impl CachedEntry {
    fn is_fresh(&self) -> bool {
        self.inserted_at.elapsed() < self.ttl
    }
}

/// Counters surfaced by the monitoring endpoints.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub invalidations: u64,
    pub entries: u64,
}

#[derive(Clone)]
pub struct ResponseCache {
    inner: Cache<String, CachedEntry>,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
    invalidations: Arc<AtomicU64>,
}

impl ResponseCache {
    pub fn new(config: ResponseCacheConfig) -> Self {
        let inner = Cache::builder()
            .max_capacity(config.max_capacity)
            .time_to_live(config.max_ttl)
            .support_invalidation_closures()
            .build();
        Self {
            inner,
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
            invalidations: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Return the cached body for `key`, or run `compute` and cache its
    /// result with the given TTL. Concurrent callers for the same key
    /// share one computation.
    pub async fn get_or_compute<F>(&self, key: &str, ttl: Duration, compute: F) -> Result<Arc<Value>>
    where
        F: Future<Output = Result<Value>>,
    {
        if let Some(entry) = self.inner.get(key).await {
            if entry.is_fresh() {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key = key, "response cache hit");
                return Ok(entry.body);
            }
            // stale under its per-route TTL; treat as a miss
            self.inner.invalidate(key).await;
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let entry = self
            .inner
            .try_get_with(key.to_string(), async move {
                let body = compute.await?;
                Ok::<_, Error>(CachedEntry {
                    body: Arc::new(body),
                    inserted_at: Instant::now(),
                    ttl,
                })
            })
            .await
            .map_err(|e: Arc<Error>| (*e).clone())?;

        Ok(entry.body)
    }

    /// Drop every key starting with `prefix`. Called when a sync job
    /// for the matching entity type completes.
    pub fn invalidate_prefix(&self, prefix: &str) {
        let prefix = prefix.to_string();
        self.invalidations.fetch_add(1, Ordering::Relaxed);
        debug!(prefix = %prefix, "invalidating response cache prefix");
        if let Err(e) = self
            .inner
            .invalidate_entries_if(move |key, _| key.starts_with(&prefix))
        {
            tracing::warn!(error = %e, "cache invalidation predicate rejected");
        }
    }

    pub async fn invalidate(&self, key: &str) {
        self.inner.invalidate(key).await;
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            entries: self.inner.entry_count(),
        }
    }
}

/// Build a cache key from an endpoint and its normalized query
/// parameters. Parameters are sorted so equivalent requests map to the
/// same key.
pub fn cache_key(endpoint: &str, params: &[(&str, &str)]) -> String {
    if params.is_empty() {
        return endpoint.to_string();
    }
    let mut sorted: Vec<_> = params.to_vec();
    sorted.sort_unstable();
    let query = sorted
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");
    format!("{}?{}", endpoint, query)
}
