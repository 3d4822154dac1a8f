//! Event repository over the events hypertable.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::FromRow;

use pulse_core::traits::EventStore;
use pulse_core::{Event, Interval, Result, TimeSeriesPoint};

use crate::db::Database;
use crate::repos::batch_error;

const COLUMNS: &str = "id, metric_id, profile_id, timestamp, value, properties, raw";

// Events are append-only; re-fetching an overlap window produces
// duplicates which the conflict clause swallows.
const INSERT: &str = r#"
    INSERT INTO events (id, metric_id, profile_id, timestamp, value, properties, raw)
    VALUES ($1, $2, $3, $4, $5, $6, $7)
    ON CONFLICT (id, timestamp) DO NOTHING
"#;

#[derive(Debug, FromRow)]
struct EventRow {
    id: String,
    metric_id: String,
    profile_id: String,
    timestamp: DateTime<Utc>,
    value: Option<Decimal>,
    properties: serde_json::Value,
    raw: serde_json::Value,
}

impl From<EventRow> for Event {
    fn from(r: EventRow) -> Self {
        Event {
            id: r.id,
            metric_id: r.metric_id,
            profile_id: r.profile_id,
            timestamp: r.timestamp,
            value: r.value,
            properties: r.properties,
            raw: r.raw,
        }
    }
}

pub struct EventRepository {
    db: Arc<Database>,
}

impl EventRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl EventStore for EventRepository {
    async fn create_batch(&self, events: &[Event]) -> Result<u64> {
        if events.is_empty() {
            return Ok(0);
        }
        self.db
            .run("events.create_batch", || async {
                let mut tx = self.db.pool().begin().await?;
                let mut inserted = 0u64;
                for event in events {
                    let result = sqlx::query(INSERT)
                        .bind(&event.id)
                        .bind(&event.metric_id)
                        .bind(&event.profile_id)
                        .bind(event.timestamp)
                        .bind(event.value)
                        .bind(&event.properties)
                        .bind(&event.raw)
                        .execute(&mut *tx)
                        .await?;
                    inserted += result.rows_affected();
                }
                tx.commit().await?;
                Ok(inserted)
            })
            .await
            .map_err(|e| batch_error(events.len(), e))
    }

    async fn find_by_metric_id(&self, metric_id: &str, limit: i64) -> Result<Vec<Event>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM events WHERE metric_id = $1 ORDER BY timestamp DESC LIMIT $2"
        );
        let rows = self
            .db
            .run("events.find_by_metric_id", || {
                sqlx::query_as::<_, EventRow>(&sql)
                    .bind(metric_id)
                    .bind(limit)
                    .fetch_all(self.db.pool())
            })
            .await?;
        Ok(rows.into_iter().map(Event::from).collect())
    }

    async fn find_by_profile_id(&self, profile_id: &str, limit: i64) -> Result<Vec<Event>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM events WHERE profile_id = $1 ORDER BY timestamp DESC LIMIT $2"
        );
        let rows = self
            .db
            .run("events.find_by_profile_id", || {
                sqlx::query_as::<_, EventRow>(&sql)
                    .bind(profile_id)
                    .bind(limit)
                    .fetch_all(self.db.pool())
            })
            .await?;
        Ok(rows.into_iter().map(Event::from).collect())
    }

    async fn find_by_time_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        metric_id: Option<&str>,
    ) -> Result<Vec<Event>> {
        let rows = match metric_id {
            Some(metric_id) => {
                let sql = format!(
                    "SELECT {COLUMNS} FROM events \
                     WHERE timestamp >= $1 AND timestamp <= $2 AND metric_id = $3 \
                     ORDER BY timestamp ASC"
                );
                self.db
                    .run("events.find_by_time_range", || {
                        sqlx::query_as::<_, EventRow>(&sql)
                            .bind(start)
                            .bind(end)
                            .bind(metric_id)
                            .fetch_all(self.db.pool())
                    })
                    .await?
            }
            None => {
                let sql = format!(
                    "SELECT {COLUMNS} FROM events \
                     WHERE timestamp >= $1 AND timestamp <= $2 ORDER BY timestamp ASC"
                );
                self.db
                    .run("events.find_by_time_range", || {
                        sqlx::query_as::<_, EventRow>(&sql)
                            .bind(start)
                            .bind(end)
                            .fetch_all(self.db.pool())
                    })
                    .await?
            }
        };
        Ok(rows.into_iter().map(Event::from).collect())
    }

    async fn count_by_metric_id(&self, metric_id: &str) -> Result<i64> {
        self.db
            .run("events.count_by_metric_id", || {
                sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM events WHERE metric_id = $1")
                    .bind(metric_id)
                    .fetch_one(self.db.pool())
            })
            .await
    }

    async fn sum_by_metric_id(&self, metric_id: &str) -> Result<f64> {
        let sum = self
            .db
            .run("events.sum_by_metric_id", || {
                sqlx::query_scalar::<_, Option<f64>>(
                    "SELECT SUM(COALESCE(value, 1))::double precision \
                     FROM events WHERE metric_id = $1",
                )
                .bind(metric_id)
                .fetch_one(self.db.pool())
            })
            .await?;
        Ok(sum.unwrap_or(0.0))
    }

    async fn aggregate_buckets(
        &self,
        metric_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        interval: Interval,
    ) -> Result<Vec<TimeSeriesPoint>> {
        let rows = self
            .db
            .run("events.aggregate_buckets", || {
                sqlx::query_as::<_, (DateTime<Utc>, f64)>(
                    r#"
                    SELECT time_bucket($1::interval, timestamp) AS bucket,
                           SUM(COALESCE(value, 1))::double precision AS total
                    FROM events
                    WHERE metric_id = $2 AND timestamp >= $3 AND timestamp <= $4
                    GROUP BY bucket
                    ORDER BY bucket ASC
                    "#,
                )
                .bind(interval.as_pg_interval())
                .bind(metric_id)
                .bind(start)
                .bind(end)
                .fetch_all(self.db.pool())
            })
            .await?;
        Ok(rows
            .into_iter()
            .map(|(timestamp, value)| TimeSeriesPoint::new(timestamp, value))
            .collect())
    }

    async fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = self
            .db
            .run("events.prune_older_than", || {
                sqlx::query("DELETE FROM events WHERE timestamp < $1")
                    .bind(cutoff)
                    .execute(self.db.pool())
            })
            .await?;
        Ok(result.rows_affected())
    }
}
