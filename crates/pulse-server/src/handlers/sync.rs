//! Sync trigger and status endpoints.

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use pulse_core::{EntityType, Error, SyncState};
use pulse_sync::SyncOptions;

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct SyncQuery {
    #[serde(default)]
    pub force: Option<bool>,
    #[serde(default)]
    pub since: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SyncAllQuery {
    #[serde(default)]
    pub force: Option<bool>,
    #[serde(default)]
    pub since: Option<String>,
    /// Comma-separated entity types; all when absent
    #[serde(default)]
    pub entities: Option<String>,
}

fn parse_since(since: &Option<String>) -> Result<Option<DateTime<Utc>>, Error> {
    match since {
        None => Ok(None),
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|e| Error::validation(format!("invalid since timestamp {:?}: {}", raw, e))),
    }
}

/// `POST /{entity}/sync`
pub async fn sync_entity(
    State(state): State<AppState>,
    Path(entity): Path<String>,
    Query(query): Query<SyncQuery>,
) -> ApiResult<Json<Value>> {
    let entity: EntityType = entity.parse().map_err(crate::error::ApiError)?;
    let since = parse_since(&query.since).map_err(crate::error::ApiError)?;

    let outcome = state
        .orchestrator
        .sync_entity(entity, query.force.unwrap_or(false), since)
        .await;

    Ok(Json(json!({
        "entityType": entity,
        "success": outcome.ok,
        "count": outcome.count,
        "durationMs": outcome.duration_ms,
        "error": outcome.error,
    })))
}

/// `POST /sync/all`
pub async fn sync_all(
    State(state): State<AppState>,
    Query(query): Query<SyncAllQuery>,
) -> ApiResult<Json<Value>> {
    let since = parse_since(&query.since).map_err(crate::error::ApiError)?;

    let entity_types = match &query.entities {
        None => None,
        Some(csv) => {
            let parsed = csv
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .map(|s| s.parse::<EntityType>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(crate::error::ApiError)?;
            Some(parsed)
        }
    };

    let report = state
        .orchestrator
        .sync_all(SyncOptions {
            force: query.force.unwrap_or(false),
            since,
            entity_types,
        })
        .await;

    Ok(Json(serde_json::to_value(&report).map_err(|e| crate::error::ApiError(e.into()))?))
}

/// `GET /sync/status`
pub async fn sync_status(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let statuses = state.sync_status.all().await.map_err(crate::error::ApiError)?;

    let rows: Vec<Value> = statuses
        .iter()
        .map(|s| {
            json!({
                "entityType": s.entity_type,
                "lastSyncTime": s.last_sync_completed_at,
                "status": s.state,
                "recordCount": s.record_count,
                "success": s.state == SyncState::Succeeded,
                "errorMessage": s.error_message,
            })
        })
        .collect();

    Ok(Json(Value::Array(rows)))
}
