//! Pre-computed bucket summaries.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::FromRow;

use pulse_core::traits::AggregateStore;
use pulse_core::{AggregatedMetric, Interval, Result};

use crate::db::Database;
use crate::repos::batch_error;

const UPSERT: &str = r#"
    INSERT INTO aggregated_metrics
        (metric_id, bucket_start, bucket_seconds, count, sum_value, min_value, max_value, avg_value)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
    ON CONFLICT (bucket_start, metric_id, bucket_seconds) DO UPDATE SET
        count = EXCLUDED.count,
        sum_value = EXCLUDED.sum_value,
        min_value = EXCLUDED.min_value,
        max_value = EXCLUDED.max_value,
        avg_value = EXCLUDED.avg_value
"#;

// Recompute summaries straight from the hypertable. Aggregation is
// commutative over count/sum/min/max/avg, so ingestion order within a
// bucket does not matter.
const REFRESH: &str = r#"
    INSERT INTO aggregated_metrics
        (metric_id, bucket_start, bucket_seconds, count, sum_value, min_value, max_value, avg_value)
    SELECT metric_id,
           time_bucket($1::interval, timestamp) AS bucket,
           $2::bigint,
           COUNT(*),
           SUM(COALESCE(value, 1))::double precision,
           MIN(COALESCE(value, 1))::double precision,
           MAX(COALESCE(value, 1))::double precision,
           AVG(COALESCE(value, 1))::double precision
    FROM events
    WHERE timestamp >= $3 AND timestamp <= $4
    GROUP BY metric_id, bucket
    ON CONFLICT (bucket_start, metric_id, bucket_seconds) DO UPDATE SET
        count = EXCLUDED.count,
        sum_value = EXCLUDED.sum_value,
        min_value = EXCLUDED.min_value,
        max_value = EXCLUDED.max_value,
        avg_value = EXCLUDED.avg_value
"#;

#[derive(Debug, FromRow)]
struct AggregateRow {
    metric_id: String,
    bucket_start: DateTime<Utc>,
    bucket_seconds: i64,
    count: i64,
    sum_value: f64,
    min_value: f64,
    max_value: f64,
    avg_value: f64,
}

impl From<AggregateRow> for AggregatedMetric {
    fn from(r: AggregateRow) -> Self {
        AggregatedMetric {
            metric_id: r.metric_id,
            bucket_start: r.bucket_start,
            bucket_seconds: r.bucket_seconds,
            count: r.count,
            sum_value: r.sum_value,
            min_value: r.min_value,
            max_value: r.max_value,
            avg_value: r.avg_value,
        }
    }
}

pub struct AggregatedMetricRepository {
    db: Arc<Database>,
}

impl AggregatedMetricRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AggregateStore for AggregatedMetricRepository {
    async fn store_aggregated_metrics(&self, rows: &[AggregatedMetric]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        self.db
            .run("aggregates.store", || async {
                let mut tx = self.db.pool().begin().await?;
                for row in rows {
                    sqlx::query(UPSERT)
                        .bind(&row.metric_id)
                        .bind(row.bucket_start)
                        .bind(row.bucket_seconds)
                        .bind(row.count)
                        .bind(row.sum_value)
                        .bind(row.min_value)
                        .bind(row.max_value)
                        .bind(row.avg_value)
                        .execute(&mut *tx)
                        .await?;
                }
                tx.commit().await?;
                Ok(rows.len() as u64)
            })
            .await
            .map_err(|e| batch_error(rows.len(), e))
    }

    async fn stored_aggregated_metrics(
        &self,
        metric_id: &str,
        interval: Interval,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<AggregatedMetric>> {
        let rows = self
            .db
            .run("aggregates.fetch", || {
                sqlx::query_as::<_, AggregateRow>(
                    r#"
                    SELECT metric_id, bucket_start, bucket_seconds,
                           count, sum_value, min_value, max_value, avg_value
                    FROM aggregated_metrics
                    WHERE metric_id = $1 AND bucket_seconds = $2
                      AND bucket_start >= $3 AND bucket_start <= $4
                    ORDER BY bucket_start ASC
                    "#,
                )
                .bind(metric_id)
                .bind(interval.seconds())
                .bind(start)
                .bind(end)
                .fetch_all(self.db.pool())
            })
            .await?;
        Ok(rows.into_iter().map(AggregatedMetric::from).collect())
    }

    async fn refresh_from_events(
        &self,
        interval: Interval,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<u64> {
        let result = self
            .db
            .run("aggregates.refresh", || {
                sqlx::query(REFRESH)
                    .bind(interval.as_pg_interval())
                    .bind(interval.seconds())
                    .bind(start)
                    .bind(end)
                    .execute(self.db.pool())
            })
            .await?;
        Ok(result.rows_affected())
    }
}
