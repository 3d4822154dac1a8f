//! Profile repository.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::FromRow;

use pulse_core::traits::ProfileStore;
use pulse_core::{Profile, Result};

use crate::db::Database;
use crate::repos::batch_error;

const COLUMNS: &str = "id, email, phone, external_id, first_name, last_name, \
                       created_at, updated_at, properties, last_event_at";

// last_event_at only ever moves forward; GREATEST ignores NULLs
const UPSERT: &str = r#"
    INSERT INTO profiles (id, email, phone, external_id, first_name, last_name,
                          created_at, updated_at, properties, last_event_at)
    VALUES ($1, $2, $3, $4, $5, $6, $7, now(), $8, $9)
    ON CONFLICT (id) DO UPDATE SET
        email = EXCLUDED.email,
        phone = EXCLUDED.phone,
        external_id = EXCLUDED.external_id,
        first_name = EXCLUDED.first_name,
        last_name = EXCLUDED.last_name,
        updated_at = now(),
        properties = EXCLUDED.properties,
        last_event_at = GREATEST(profiles.last_event_at, EXCLUDED.last_event_at)
"#;

#[derive(Debug, FromRow)]
struct ProfileRow {
    id: String,
    email: Option<String>,
    phone: Option<String>,
    external_id: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    properties: serde_json::Value,
    last_event_at: Option<DateTime<Utc>>,
}

impl From<ProfileRow> for Profile {
    fn from(r: ProfileRow) -> Self {
        Profile {
            id: r.id,
            email: r.email,
            phone: r.phone,
            external_id: r.external_id,
            first_name: r.first_name,
            last_name: r.last_name,
            created_at: r.created_at,
            updated_at: r.updated_at,
            properties: r.properties,
            last_event_at: r.last_event_at,
        }
    }
}

pub struct ProfileRepository {
    db: Arc<Database>,
}

impl ProfileRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    fn bind_upsert<'q>(
        query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
        p: &'q Profile,
    ) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
        query
            .bind(&p.id)
            .bind(&p.email)
            .bind(&p.phone)
            .bind(&p.external_id)
            .bind(&p.first_name)
            .bind(&p.last_name)
            .bind(p.created_at)
            .bind(&p.properties)
            .bind(p.last_event_at)
    }
}

#[async_trait]
impl ProfileStore for ProfileRepository {
    async fn find_by_id(&self, id: &str) -> Result<Option<Profile>> {
        let sql = format!("SELECT {COLUMNS} FROM profiles WHERE id = $1");
        let row = self
            .db
            .run("profiles.find_by_id", || {
                sqlx::query_as::<_, ProfileRow>(&sql)
                    .bind(id)
                    .fetch_optional(self.db.pool())
            })
            .await?;
        Ok(row.map(Profile::from))
    }

    async fn find_by_date_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Profile>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM profiles WHERE created_at >= $1 AND created_at <= $2 \
             ORDER BY created_at DESC"
        );
        let rows = self
            .db
            .run("profiles.find_by_date_range", || {
                sqlx::query_as::<_, ProfileRow>(&sql)
                    .bind(start)
                    .bind(end)
                    .fetch_all(self.db.pool())
            })
            .await?;
        Ok(rows.into_iter().map(Profile::from).collect())
    }

    async fn find_all(&self, limit: i64, offset: i64) -> Result<Vec<Profile>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM profiles ORDER BY updated_at DESC LIMIT $1 OFFSET $2"
        );
        let rows = self
            .db
            .run("profiles.find_all", || {
                sqlx::query_as::<_, ProfileRow>(&sql)
                    .bind(limit)
                    .bind(offset)
                    .fetch_all(self.db.pool())
            })
            .await?;
        Ok(rows.into_iter().map(Profile::from).collect())
    }

    async fn create(&self, profile: &Profile) -> Result<()> {
        const INSERT: &str = r#"
            INSERT INTO profiles (id, email, phone, external_id, first_name, last_name,
                                  created_at, updated_at, properties, last_event_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#;
        self.db
            .run("profiles.create", || {
                sqlx::query(INSERT)
                    .bind(&profile.id)
                    .bind(&profile.email)
                    .bind(&profile.phone)
                    .bind(&profile.external_id)
                    .bind(&profile.first_name)
                    .bind(&profile.last_name)
                    .bind(profile.created_at)
                    .bind(profile.updated_at)
                    .bind(&profile.properties)
                    .bind(profile.last_event_at)
                    .execute(self.db.pool())
            })
            .await?;
        Ok(())
    }

    async fn create_or_update(&self, profile: &Profile) -> Result<()> {
        self.db
            .run("profiles.create_or_update", || {
                Self::bind_upsert(sqlx::query(UPSERT), profile).execute(self.db.pool())
            })
            .await?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let result = self
            .db
            .run("profiles.delete", || {
                sqlx::query("DELETE FROM profiles WHERE id = $1")
                    .bind(id)
                    .execute(self.db.pool())
            })
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn create_batch(&self, profiles: &[Profile]) -> Result<u64> {
        if profiles.is_empty() {
            return Ok(0);
        }
        self.db
            .run("profiles.create_batch", || async {
                let mut tx = self.db.pool().begin().await?;
                for profile in profiles {
                    Self::bind_upsert(sqlx::query(UPSERT), profile)
                        .execute(&mut *tx)
                        .await?;
                }
                tx.commit().await?;
                Ok(profiles.len() as u64)
            })
            .await
            .map_err(|e| batch_error(profiles.len(), e))
    }

    async fn advance_last_event(&self, id: &str, ts: DateTime<Utc>) -> Result<()> {
        self.db
            .run("profiles.advance_last_event", || {
                sqlx::query(
                    "UPDATE profiles SET last_event_at = GREATEST(last_event_at, $2) WHERE id = $1",
                )
                .bind(id)
                .bind(ts)
                .execute(self.db.pool())
            })
            .await?;
        Ok(())
    }

    async fn find_updated_since(&self, ts: DateTime<Utc>) -> Result<Vec<Profile>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM profiles WHERE updated_at > $1 ORDER BY updated_at ASC"
        );
        let rows = self
            .db
            .run("profiles.find_updated_since", || {
                sqlx::query_as::<_, ProfileRow>(&sql)
                    .bind(ts)
                    .fetch_all(self.db.pool())
            })
            .await?;
        Ok(rows.into_iter().map(Profile::from).collect())
    }

    async fn latest_update_timestamp(&self) -> Result<Option<DateTime<Utc>>> {
        self.db
            .run("profiles.latest_update_timestamp", || {
                sqlx::query_scalar::<_, Option<DateTime<Utc>>>(
                    "SELECT MAX(updated_at) FROM profiles",
                )
                .fetch_one(self.db.pool())
            })
            .await
    }
}
