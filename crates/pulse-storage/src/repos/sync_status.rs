//! Sync bookkeeping per entity type.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::FromRow;

use pulse_core::traits::SyncStatusStore;
use pulse_core::{EntityType, Result, SyncState, SyncStatus};

use crate::db::Database;

#[derive(Debug, FromRow)]
struct StatusRow {
    entity_type: String,
    last_sync_started_at: Option<DateTime<Utc>>,
    last_sync_completed_at: Option<DateTime<Utc>>,
    last_watermark: Option<DateTime<Utc>>,
    status: String,
    record_count: i64,
    error_message: Option<String>,
}

impl StatusRow {
    fn into_status(self) -> Option<SyncStatus> {
        let entity_type = EntityType::from_str(&self.entity_type).ok()?;
        let state = SyncState::from_str(&self.status).unwrap_or(SyncState::Idle);
        Some(SyncStatus {
            entity_type,
            last_sync_started_at: self.last_sync_started_at,
            last_sync_completed_at: self.last_sync_completed_at,
            last_watermark: self.last_watermark,
            state,
            record_count: self.record_count,
            error_message: self.error_message,
        })
    }
}

pub struct SyncStatusRepository {
    db: Arc<Database>,
}

impl SyncStatusRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SyncStatusStore for SyncStatusRepository {
    async fn get(&self, entity: EntityType) -> Result<SyncStatus> {
        let row = self
            .db
            .run("sync_status.get", || {
                sqlx::query_as::<_, StatusRow>(
                    "SELECT entity_type, last_sync_started_at, last_sync_completed_at, \
                            last_watermark, status, record_count, error_message \
                     FROM sync_status WHERE entity_type = $1",
                )
                .bind(entity.as_str())
                .fetch_optional(self.db.pool())
            })
            .await?;
        Ok(row
            .and_then(StatusRow::into_status)
            .unwrap_or_else(|| SyncStatus::idle(entity)))
    }

    async fn all(&self) -> Result<Vec<SyncStatus>> {
        let rows = self
            .db
            .run("sync_status.all", || {
                sqlx::query_as::<_, StatusRow>(
                    "SELECT entity_type, last_sync_started_at, last_sync_completed_at, \
                            last_watermark, status, record_count, error_message \
                     FROM sync_status ORDER BY entity_type ASC",
                )
                .fetch_all(self.db.pool())
            })
            .await?;
        Ok(rows.into_iter().filter_map(StatusRow::into_status).collect())
    }

    async fn mark_running(&self, entity: EntityType, started_at: DateTime<Utc>) -> Result<()> {
        self.db
            .run("sync_status.mark_running", || {
                sqlx::query(
                    r#"
                    INSERT INTO sync_status (entity_type, last_sync_started_at, status)
                    VALUES ($1, $2, 'running')
                    ON CONFLICT (entity_type) DO UPDATE SET
                        last_sync_started_at = EXCLUDED.last_sync_started_at,
                        status = 'running',
                        error_message = NULL
                    "#,
                )
                .bind(entity.as_str())
                .bind(started_at)
                .execute(self.db.pool())
            })
            .await?;
        Ok(())
    }

    async fn advance_watermark(&self, entity: EntityType, watermark: DateTime<Utc>) -> Result<()> {
        self.db
            .run("sync_status.advance_watermark", || {
                sqlx::query(
                    r#"
                    INSERT INTO sync_status (entity_type, last_watermark, status)
                    VALUES ($1, $2, 'running')
                    ON CONFLICT (entity_type) DO UPDATE SET
                        last_watermark = GREATEST(
                            COALESCE(sync_status.last_watermark, EXCLUDED.last_watermark),
                            EXCLUDED.last_watermark
                        )
                    "#,
                )
                .bind(entity.as_str())
                .bind(watermark)
                .execute(self.db.pool())
            })
            .await?;
        Ok(())
    }

    async fn mark_succeeded(
        &self,
        entity: EntityType,
        watermark: Option<DateTime<Utc>>,
        record_count: i64,
    ) -> Result<()> {
        // the stored watermark never goes backwards
        self.db
            .run("sync_status.mark_succeeded", || {
                sqlx::query(
                    r#"
                    INSERT INTO sync_status
                        (entity_type, last_sync_completed_at, last_watermark, status, record_count)
                    VALUES ($1, now(), $2, 'succeeded', $3)
                    ON CONFLICT (entity_type) DO UPDATE SET
                        last_sync_completed_at = now(),
                        last_watermark = CASE
                            WHEN EXCLUDED.last_watermark IS NULL THEN sync_status.last_watermark
                            WHEN sync_status.last_watermark IS NULL THEN EXCLUDED.last_watermark
                            ELSE GREATEST(sync_status.last_watermark, EXCLUDED.last_watermark)
                        END,
                        status = 'succeeded',
                        record_count = EXCLUDED.record_count,
                        error_message = NULL
                    "#,
                )
                .bind(entity.as_str())
                .bind(watermark)
                .bind(record_count)
                .execute(self.db.pool())
            })
            .await?;
        Ok(())
    }

    async fn mark_failed(&self, entity: EntityType, message: &str) -> Result<()> {
        self.db
            .run("sync_status.mark_failed", || {
                sqlx::query(
                    r#"
                    INSERT INTO sync_status (entity_type, last_sync_completed_at, status, error_message)
                    VALUES ($1, now(), 'failed', $2)
                    ON CONFLICT (entity_type) DO UPDATE SET
                        last_sync_completed_at = now(),
                        status = 'failed',
                        error_message = EXCLUDED.error_message
                    "#,
                )
                .bind(entity.as_str())
                .bind(message)
                .execute(self.db.pool())
            })
            .await?;
        Ok(())
    }
}
