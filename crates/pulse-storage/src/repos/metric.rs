//! Metric repository.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::FromRow;

use pulse_core::traits::MetricStore;
use pulse_core::{Metric, Result};

use crate::db::Database;
use crate::repos::batch_error;

const COLUMNS: &str = "id, name, kind, description, created_at, updated_at, \
                       integration_id, integration_name, integration_category, metadata";

const UPSERT: &str = r#"
    INSERT INTO metrics (id, name, kind, description, created_at, updated_at,
                         integration_id, integration_name, integration_category, metadata)
    VALUES ($1, $2, $3, $4, $5, now(), $6, $7, $8, $9)
    ON CONFLICT (id) DO UPDATE SET
        name = EXCLUDED.name,
        kind = EXCLUDED.kind,
        description = EXCLUDED.description,
        updated_at = now(),
        integration_id = EXCLUDED.integration_id,
        integration_name = EXCLUDED.integration_name,
        integration_category = EXCLUDED.integration_category,
        metadata = EXCLUDED.metadata
"#;

#[derive(Debug, FromRow)]
struct MetricRow {
    id: String,
    name: String,
    kind: Option<String>,
    description: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    integration_id: Option<String>,
    integration_name: Option<String>,
    integration_category: Option<String>,
    metadata: serde_json::Value,
}

impl From<MetricRow> for Metric {
    fn from(r: MetricRow) -> Self {
        Metric {
            id: r.id,
            name: r.name,
            kind: r.kind,
            description: r.description,
            created_at: r.created_at,
            updated_at: r.updated_at,
            integration_id: r.integration_id,
            integration_name: r.integration_name,
            integration_category: r.integration_category,
            metadata: r.metadata,
        }
    }
}

pub struct MetricRepository {
    db: Arc<Database>,
}

impl MetricRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    fn bind_upsert<'q>(
        query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
        m: &'q Metric,
    ) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
        query
            .bind(&m.id)
            .bind(&m.name)
            .bind(&m.kind)
            .bind(&m.description)
            .bind(m.created_at)
            .bind(&m.integration_id)
            .bind(&m.integration_name)
            .bind(&m.integration_category)
            .bind(&m.metadata)
    }
}

#[async_trait]
impl MetricStore for MetricRepository {
    async fn find_by_id(&self, id: &str) -> Result<Option<Metric>> {
        let sql = format!("SELECT {COLUMNS} FROM metrics WHERE id = $1");
        let row = self
            .db
            .run("metrics.find_by_id", || {
                sqlx::query_as::<_, MetricRow>(&sql)
                    .bind(id)
                    .fetch_optional(self.db.pool())
            })
            .await?;
        Ok(row.map(Metric::from))
    }

    async fn find_by_name(&self, prefix: &str) -> Result<Vec<Metric>> {
        let sql = format!("SELECT {COLUMNS} FROM metrics WHERE name LIKE $1 ORDER BY name ASC");
        let pattern = format!("{}%", prefix.replace('%', "\\%").replace('_', "\\_"));
        let rows = self
            .db
            .run("metrics.find_by_name", || {
                sqlx::query_as::<_, MetricRow>(&sql)
                    .bind(&pattern)
                    .fetch_all(self.db.pool())
            })
            .await?;
        Ok(rows.into_iter().map(Metric::from).collect())
    }

    async fn find_by_date_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Metric>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM metrics WHERE created_at >= $1 AND created_at <= $2 \
             ORDER BY created_at DESC"
        );
        let rows = self
            .db
            .run("metrics.find_by_date_range", || {
                sqlx::query_as::<_, MetricRow>(&sql)
                    .bind(start)
                    .bind(end)
                    .fetch_all(self.db.pool())
            })
            .await?;
        Ok(rows.into_iter().map(Metric::from).collect())
    }

    async fn find_all(&self, limit: i64, offset: i64) -> Result<Vec<Metric>> {
        let sql =
            format!("SELECT {COLUMNS} FROM metrics ORDER BY name ASC LIMIT $1 OFFSET $2");
        let rows = self
            .db
            .run("metrics.find_all", || {
                sqlx::query_as::<_, MetricRow>(&sql)
                    .bind(limit)
                    .bind(offset)
                    .fetch_all(self.db.pool())
            })
            .await?;
        Ok(rows.into_iter().map(Metric::from).collect())
    }

    async fn create(&self, metric: &Metric) -> Result<()> {
        const INSERT: &str = r#"
            INSERT INTO metrics (id, name, kind, description, created_at, updated_at,
                                 integration_id, integration_name, integration_category, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#;
        self.db
            .run("metrics.create", || {
                sqlx::query(INSERT)
                    .bind(&metric.id)
                    .bind(&metric.name)
                    .bind(&metric.kind)
                    .bind(&metric.description)
                    .bind(metric.created_at)
                    .bind(metric.updated_at)
                    .bind(&metric.integration_id)
                    .bind(&metric.integration_name)
                    .bind(&metric.integration_category)
                    .bind(&metric.metadata)
                    .execute(self.db.pool())
            })
            .await?;
        Ok(())
    }

    async fn create_or_update(&self, metric: &Metric) -> Result<()> {
        self.db
            .run("metrics.create_or_update", || {
                Self::bind_upsert(sqlx::query(UPSERT), metric).execute(self.db.pool())
            })
            .await?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let result = self
            .db
            .run("metrics.delete", || {
                sqlx::query("DELETE FROM metrics WHERE id = $1")
                    .bind(id)
                    .execute(self.db.pool())
            })
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn create_batch(&self, metrics: &[Metric]) -> Result<u64> {
        if metrics.is_empty() {
            return Ok(0);
        }
        self.db
            .run("metrics.create_batch", || async {
                let mut tx = self.db.pool().begin().await?;
                for metric in metrics {
                    Self::bind_upsert(sqlx::query(UPSERT), metric)
                        .execute(&mut *tx)
                        .await?;
                }
                tx.commit().await?;
                Ok(metrics.len() as u64)
            })
            .await
            .map_err(|e| batch_error(metrics.len(), e))
    }

    async fn find_updated_since(&self, ts: DateTime<Utc>) -> Result<Vec<Metric>> {
        let sql =
            format!("SELECT {COLUMNS} FROM metrics WHERE updated_at > $1 ORDER BY updated_at ASC");
        let rows = self
            .db
            .run("metrics.find_updated_since", || {
                sqlx::query_as::<_, MetricRow>(&sql)
                    .bind(ts)
                    .fetch_all(self.db.pool())
            })
            .await?;
        Ok(rows.into_iter().map(Metric::from).collect())
    }

    async fn latest_update_timestamp(&self) -> Result<Option<DateTime<Utc>>> {
        self.db
            .run("metrics.latest_update_timestamp", || {
                sqlx::query_scalar::<_, Option<DateTime<Utc>>>("SELECT MAX(updated_at) FROM metrics")
                    .fetch_one(self.db.pool())
            })
            .await
    }
}
