//! Repository for the four marketing entities (campaigns, flows,
//! forms, segments). They share a column set; the entity type selects
//! the table.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::FromRow;

use pulse_core::traits::MarketingEntityStore;
use pulse_core::{CounterPatch, EntityType, Error, MarketingEntity, Result};

use crate::db::Database;
use crate::repos::batch_error;

const COLUMNS: &str = "id, name, status, created_at, updated_at, archived_at, \
                       sent_count, open_count, click_count, conversion_count, revenue, metadata";

#[derive(Debug, FromRow)]
struct MarketingRow {
    id: String,
    name: String,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    archived_at: Option<DateTime<Utc>>,
    sent_count: i64,
    open_count: i64,
    click_count: i64,
    conversion_count: i64,
    revenue: Decimal,
    metadata: serde_json::Value,
}

impl MarketingRow {
    fn into_entity(self, entity: EntityType) -> MarketingEntity {
        MarketingEntity {
            id: self.id,
            entity_type: entity,
            name: self.name,
            status: self.status,
            created_at: self.created_at,
            updated_at: self.updated_at,
            archived_at: self.archived_at,
            sent_count: self.sent_count,
            open_count: self.open_count,
            click_count: self.click_count,
            conversion_count: self.conversion_count,
            revenue: self.revenue,
            metadata: self.metadata,
        }
    }
}

pub struct MarketingEntityRepository {
    db: Arc<Database>,
}

impl MarketingEntityRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    fn table(entity: EntityType) -> Result<&'static str> {
        if entity.is_marketing() {
            Ok(entity.table())
        } else {
            Err(Error::Internal(format!(
                "{} is not a marketing entity",
                entity
            )))
        }
    }

    fn upsert_sql(table: &str) -> String {
        // created_at is preserved on conflict; updated_at always moves
        format!(
            r#"
            INSERT INTO {table} ({COLUMNS})
            VALUES ($1, $2, $3, $4, now(), $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                status = EXCLUDED.status,
                updated_at = now(),
                archived_at = EXCLUDED.archived_at,
                sent_count = EXCLUDED.sent_count,
                open_count = EXCLUDED.open_count,
                click_count = EXCLUDED.click_count,
                conversion_count = EXCLUDED.conversion_count,
                revenue = EXCLUDED.revenue,
                metadata = EXCLUDED.metadata
            "#
        )
    }

    fn bind_upsert<'q>(
        query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
        row: &'q MarketingEntity,
    ) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
        query
            .bind(&row.id)
            .bind(&row.name)
            .bind(&row.status)
            .bind(row.created_at)
            .bind(row.archived_at)
            .bind(row.sent_count)
            .bind(row.open_count)
            .bind(row.click_count)
            .bind(row.conversion_count)
            .bind(row.revenue)
            .bind(&row.metadata)
    }
}

#[async_trait]
impl MarketingEntityStore for MarketingEntityRepository {
    async fn find_by_id(&self, entity: EntityType, id: &str) -> Result<Option<MarketingEntity>> {
        let sql = format!("SELECT {COLUMNS} FROM {} WHERE id = $1", Self::table(entity)?);
        let row = self
            .db
            .run("marketing.find_by_id", || {
                sqlx::query_as::<_, MarketingRow>(&sql)
                    .bind(id)
                    .fetch_optional(self.db.pool())
            })
            .await?;
        Ok(row.map(|r| r.into_entity(entity)))
    }

    async fn find_by_status(
        &self,
        entity: EntityType,
        status: &str,
    ) -> Result<Vec<MarketingEntity>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM {} WHERE status = $1 ORDER BY updated_at DESC",
            Self::table(entity)?
        );
        let rows = self
            .db
            .run("marketing.find_by_status", || {
                sqlx::query_as::<_, MarketingRow>(&sql)
                    .bind(status)
                    .fetch_all(self.db.pool())
            })
            .await?;
        Ok(rows.into_iter().map(|r| r.into_entity(entity)).collect())
    }

    async fn find_by_name(&self, entity: EntityType, prefix: &str) -> Result<Vec<MarketingEntity>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM {} WHERE name LIKE $1 ORDER BY name ASC",
            Self::table(entity)?
        );
        let pattern = format!("{}%", prefix.replace('%', "\\%").replace('_', "\\_"));
        let rows = self
            .db
            .run("marketing.find_by_name", || {
                sqlx::query_as::<_, MarketingRow>(&sql)
                    .bind(&pattern)
                    .fetch_all(self.db.pool())
            })
            .await?;
        Ok(rows.into_iter().map(|r| r.into_entity(entity)).collect())
    }

    async fn find_by_date_range(
        &self,
        entity: EntityType,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<MarketingEntity>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM {} WHERE created_at >= $1 AND created_at <= $2 \
             ORDER BY created_at DESC",
            Self::table(entity)?
        );
        let rows = self
            .db
            .run("marketing.find_by_date_range", || {
                sqlx::query_as::<_, MarketingRow>(&sql)
                    .bind(start)
                    .bind(end)
                    .fetch_all(self.db.pool())
            })
            .await?;
        Ok(rows.into_iter().map(|r| r.into_entity(entity)).collect())
    }

    async fn find_all(
        &self,
        entity: EntityType,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<MarketingEntity>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM {} ORDER BY updated_at DESC LIMIT $1 OFFSET $2",
            Self::table(entity)?
        );
        let rows = self
            .db
            .run("marketing.find_all", || {
                sqlx::query_as::<_, MarketingRow>(&sql)
                    .bind(limit)
                    .bind(offset)
                    .fetch_all(self.db.pool())
            })
            .await?;
        Ok(rows.into_iter().map(|r| r.into_entity(entity)).collect())
    }

    async fn create(&self, row: &MarketingEntity) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} ({COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
            Self::table(row.entity_type)?
        );
        self.db
            .run("marketing.create", || {
                sqlx::query(&sql)
                    .bind(&row.id)
                    .bind(&row.name)
                    .bind(&row.status)
                    .bind(row.created_at)
                    .bind(row.updated_at)
                    .bind(row.archived_at)
                    .bind(row.sent_count)
                    .bind(row.open_count)
                    .bind(row.click_count)
                    .bind(row.conversion_count)
                    .bind(row.revenue)
                    .bind(&row.metadata)
                    .execute(self.db.pool())
            })
            .await?;
        Ok(())
    }

    async fn create_or_update(&self, row: &MarketingEntity) -> Result<()> {
        let sql = Self::upsert_sql(Self::table(row.entity_type)?);
        self.db
            .run("marketing.create_or_update", || {
                Self::bind_upsert(sqlx::query(&sql), row).execute(self.db.pool())
            })
            .await?;
        Ok(())
    }

    async fn delete(&self, entity: EntityType, id: &str) -> Result<bool> {
        let sql = format!("DELETE FROM {} WHERE id = $1", Self::table(entity)?);
        let result = self
            .db
            .run("marketing.delete", || {
                sqlx::query(&sql).bind(id).execute(self.db.pool())
            })
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn create_batch(&self, entity: EntityType, rows: &[MarketingEntity]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let sql = Self::upsert_sql(Self::table(entity)?);
        self.db
            .run("marketing.create_batch", || async {
                let mut tx = self.db.pool().begin().await?;
                for row in rows {
                    Self::bind_upsert(sqlx::query(&sql), row)
                        .execute(&mut *tx)
                        .await?;
                }
                tx.commit().await?;
                Ok(rows.len() as u64)
            })
            .await
            .map_err(|e| batch_error(rows.len(), e))
    }

    async fn update_metrics(
        &self,
        entity: EntityType,
        id: &str,
        patch: &CounterPatch,
    ) -> Result<()> {
        if patch.is_empty() {
            return Ok(());
        }
        let sql = format!(
            r#"
            UPDATE {} SET
                sent_count = COALESCE($2, sent_count),
                open_count = COALESCE($3, open_count),
                click_count = COALESCE($4, click_count),
                conversion_count = COALESCE($5, conversion_count),
                revenue = COALESCE($6, revenue),
                updated_at = now()
            WHERE id = $1
            "#,
            Self::table(entity)?
        );
        let result = self
            .db
            .run("marketing.update_metrics", || {
                sqlx::query(&sql)
                    .bind(id)
                    .bind(patch.sent_count)
                    .bind(patch.open_count)
                    .bind(patch.click_count)
                    .bind(patch.conversion_count)
                    .bind(patch.revenue)
                    .execute(self.db.pool())
            })
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("{} {} not found", entity, id)));
        }
        Ok(())
    }

    async fn find_updated_since(
        &self,
        entity: EntityType,
        ts: DateTime<Utc>,
    ) -> Result<Vec<MarketingEntity>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM {} WHERE updated_at > $1 ORDER BY updated_at ASC",
            Self::table(entity)?
        );
        let rows = self
            .db
            .run("marketing.find_updated_since", || {
                sqlx::query_as::<_, MarketingRow>(&sql)
                    .bind(ts)
                    .fetch_all(self.db.pool())
            })
            .await?;
        Ok(rows.into_iter().map(|r| r.into_entity(entity)).collect())
    }

    async fn latest_update_timestamp(
        &self,
        entity: EntityType,
    ) -> Result<Option<DateTime<Utc>>> {
        let sql = format!("SELECT MAX(updated_at) FROM {}", Self::table(entity)?);
        self.db
            .run("marketing.latest_update_timestamp", || {
                sqlx::query_scalar::<_, Option<DateTime<Utc>>>(&sql).fetch_one(self.db.pool())
            })
            .await
    }
}
