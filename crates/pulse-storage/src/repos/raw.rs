//! Raw upstream payload audit log, retained for a bounded window.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use pulse_core::traits::RawResponseStore;
use pulse_core::Result;

use crate::db::Database;

pub struct RawResponseRepository {
    db: Arc<Database>,
    api_version: String,
}

impl RawResponseRepository {
    pub fn new(db: Arc<Database>, api_version: impl Into<String>) -> Self {
        Self {
            db,
            api_version: api_version.into(),
        }
    }

    pub async fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = self
            .db
            .run("raw_responses.prune", || {
                sqlx::query("DELETE FROM raw_api_responses WHERE received_at < $1")
                    .bind(cutoff)
                    .execute(self.db.pool())
            })
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl RawResponseStore for RawResponseRepository {
    async fn record(&self, endpoint: &str, payload: &serde_json::Value) -> Result<()> {
        self.db
            .run("raw_responses.record", || {
                sqlx::query(
                    "INSERT INTO raw_api_responses (endpoint, payload, api_version) \
                     VALUES ($1, $2, $3)",
                )
                .bind(endpoint)
                .bind(payload)
                .bind(&self.api_version)
                .execute(self.db.pool())
            })
            .await?;
        Ok(())
    }
}
