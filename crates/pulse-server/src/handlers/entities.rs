//! Entity list endpoints with the database-first read path.
//!
//! Try the store; if the rows are missing or stale past the route TTL,
//! fall back to the upstream synchronously, answer from the fetched
//! rows, and write them back in the background.

use std::time::Duration;

use axum::Json;
use chrono::Utc;
use futures::TryStreamExt;
use serde_json::Value;
use tracing::warn;

use pulse_core::{ApiParams, DateRange, EntityType, MarketingEntity, Result};
use pulse_storage::cache_key;
use pulse_sync::transform;

use crate::error::ApiResult;
use crate::state::AppState;

use super::RangeQuery;

/// `GET /campaigns`
pub async fn campaigns(
    axum::extract::State(state): axum::extract::State<AppState>,
    axum::extract::Query(query): axum::extract::Query<RangeQuery>,
) -> ApiResult<Json<Value>> {
    list(state, EntityType::Campaign, query).await
}

/// `GET /flows`
pub async fn flows(
    axum::extract::State(state): axum::extract::State<AppState>,
    axum::extract::Query(query): axum::extract::Query<RangeQuery>,
) -> ApiResult<Json<Value>> {
    list(state, EntityType::Flow, query).await
}

/// `GET /forms`
pub async fn forms(
    axum::extract::State(state): axum::extract::State<AppState>,
    axum::extract::Query(query): axum::extract::Query<RangeQuery>,
) -> ApiResult<Json<Value>> {
    list(state, EntityType::Form, query).await
}

/// `GET /segments`
pub async fn segments(
    axum::extract::State(state): axum::extract::State<AppState>,
    axum::extract::Query(query): axum::extract::Query<RangeQuery>,
) -> ApiResult<Json<Value>> {
    list(state, EntityType::Segment, query).await
}

async fn list(
    state: AppState,
    entity: EntityType,
    query: RangeQuery,
) -> ApiResult<Json<Value>> {
    let range = query.range();
    let key = cache_key(&format!("/{}", entity.table()), &[("dateRange", query.raw())]);
    let ttl = Duration::from_secs(state.config.cache.entities_ttl_secs);

    let computed = state.clone();
    let body = state
        .cache
        .get_or_compute(&key, ttl, async move {
            read_through(&computed, entity, range, ttl).await
        })
        .await?;
    Ok(Json(body.as_ref().clone()))
}

async fn read_through(
    state: &AppState,
    entity: EntityType,
    range: DateRange,
    ttl: Duration,
) -> Result<Value> {
    let rows = state
        .marketing
        .find_by_date_range(entity, range.start, range.end)
        .await?;

    let fresh = match state.marketing.latest_update_timestamp(entity).await? {
        Some(last_write) => {
            let age = Utc::now() - last_write;
            age <= chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::zero())
        }
        None => false,
    };

    if !rows.is_empty() && fresh {
        return Ok(serde_json::to_value(&rows)?);
    }

    match fetch_from_upstream(state, entity, range).await {
        Ok(fetched) if !fetched.is_empty() => {
            // answer now, persist in the background
            let marketing = state.marketing.clone();
            let write_back = fetched.clone();
            tokio::spawn(async move {
                if let Err(e) = marketing.create_batch(entity, &write_back).await {
                    warn!(entity = %entity, error = %e, "write-back failed");
                }
            });
            Ok(serde_json::to_value(&fetched)?)
        }
        Ok(_) => Ok(serde_json::to_value(&rows)?),
        Err(e) if !rows.is_empty() => {
            // stale rows beat an error page
            warn!(entity = %entity, error = %e, "upstream refresh failed, serving stale rows");
            Ok(serde_json::to_value(&rows)?)
        }
        Err(e) => Err(e),
    }
}

async fn fetch_from_upstream(
    state: &AppState,
    entity: EntityType,
    range: DateRange,
) -> Result<Vec<MarketingEntity>> {
    let params = ApiParams::new().page_size(state.config.sync.page_size);
    let pages = state.client.get_paginated(entity.api_path(), &params);
    futures::pin_mut!(pages);

    let now = Utc::now();
    let mut out = Vec::new();
    while let Some(doc) = pages.try_next().await? {
        for resource in doc.resources() {
            out.push(transform::marketing_entity_from_resource(entity, resource, now)?);
        }
    }
    out.retain(|e| e.created_at >= range.start && e.created_at <= range.end);
    Ok(out)
}
