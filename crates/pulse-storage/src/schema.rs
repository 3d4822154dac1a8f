//! Idempotent schema bootstrap.
//!
//! Applied at startup. Event-bearing tables become hypertables with a
//! 7-day chunk interval; the TimescaleDB calls are tolerated to fail so
//! the service still runs against plain PostgreSQL (without compression
//! and retention policies).

use tracing::info;

use pulse_core::Result;

use crate::db::{map_sqlx_error, Database};

const TABLES: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS metrics (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        kind TEXT,
        description TEXT,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL,
        integration_id TEXT,
        integration_name TEXT,
        integration_category TEXT,
        metadata JSONB NOT NULL DEFAULT 'null'::jsonb
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS profiles (
        id TEXT PRIMARY KEY,
        email TEXT,
        phone TEXT,
        external_id TEXT,
        first_name TEXT,
        last_name TEXT,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL,
        properties JSONB NOT NULL DEFAULT 'null'::jsonb,
        last_event_at TIMESTAMPTZ
    )
    "#,
    // append-only, time-partitioned; the partition column must be part
    // of the primary key
    r#"
    CREATE TABLE IF NOT EXISTS events (
        id TEXT NOT NULL,
        metric_id TEXT NOT NULL,
        profile_id TEXT NOT NULL,
        timestamp TIMESTAMPTZ NOT NULL,
        value NUMERIC,
        properties JSONB NOT NULL DEFAULT 'null'::jsonb,
        raw JSONB NOT NULL DEFAULT 'null'::jsonb,
        PRIMARY KEY (id, timestamp)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS aggregated_metrics (
        metric_id TEXT NOT NULL,
        bucket_start TIMESTAMPTZ NOT NULL,
        bucket_seconds BIGINT NOT NULL,
        count BIGINT NOT NULL,
        sum_value DOUBLE PRECISION NOT NULL,
        min_value DOUBLE PRECISION NOT NULL,
        max_value DOUBLE PRECISION NOT NULL,
        avg_value DOUBLE PRECISION NOT NULL,
        PRIMARY KEY (bucket_start, metric_id, bucket_seconds)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sync_status (
        entity_type TEXT PRIMARY KEY,
        last_sync_started_at TIMESTAMPTZ,
        last_sync_completed_at TIMESTAMPTZ,
        last_watermark TIMESTAMPTZ,
        status TEXT NOT NULL DEFAULT 'idle',
        record_count BIGINT NOT NULL DEFAULT 0,
        error_message TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS raw_api_responses (
        id BIGSERIAL PRIMARY KEY,
        endpoint TEXT NOT NULL,
        payload JSONB NOT NULL,
        received_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        api_version TEXT NOT NULL
    )
    "#,
];

const MARKETING_TABLES: &[&str] = &["campaigns", "flows", "forms", "segments"];

const HYPERTABLES: &[&str] = &[
    r#"
    SELECT create_hypertable('events', 'timestamp',
        if_not_exists => TRUE,
        chunk_time_interval => INTERVAL '7 days'
    )
    "#,
    r#"
    SELECT create_hypertable('aggregated_metrics', 'bucket_start',
        if_not_exists => TRUE,
        chunk_time_interval => INTERVAL '7 days'
    )
    "#,
];

const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_events_metric_ts ON events (metric_id, timestamp DESC) INCLUDE (value)",
    "CREATE INDEX IF NOT EXISTS idx_events_profile_ts ON events (profile_id, timestamp DESC)",
    "CREATE INDEX IF NOT EXISTS idx_events_ts_brin ON events USING BRIN (timestamp)",
    "CREATE INDEX IF NOT EXISTS idx_events_properties ON events USING GIN (properties)",
    "CREATE INDEX IF NOT EXISTS idx_profiles_properties ON profiles USING GIN (properties)",
    "CREATE INDEX IF NOT EXISTS idx_aggregated_metric_bucket ON aggregated_metrics (metric_id, bucket_seconds, bucket_start)",
];

const POLICIES: &[&str] = &[
    "ALTER TABLE events SET (timescaledb.compress, timescaledb.compress_segmentby = 'metric_id')",
    "SELECT add_compression_policy('events', INTERVAL '90 days', if_not_exists => TRUE)",
    "SELECT add_retention_policy('events', INTERVAL '24 months', if_not_exists => TRUE)",
];

/// Create tables, hypertables, indexes, and policies. Safe to run on
/// every startup.
pub async fn bootstrap(db: &Database) -> Result<()> {
    info!("bootstrapping database schema");

    for ddl in TABLES {
        sqlx::query(ddl)
            .execute(db.pool())
            .await
            .map_err(|e| map_sqlx_error("schema.create_table", e))?;
    }

    for table in MARKETING_TABLES {
        let ddl = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL,
                archived_at TIMESTAMPTZ,
                sent_count BIGINT NOT NULL DEFAULT 0,
                open_count BIGINT NOT NULL DEFAULT 0,
                click_count BIGINT NOT NULL DEFAULT 0,
                conversion_count BIGINT NOT NULL DEFAULT 0,
                revenue NUMERIC NOT NULL DEFAULT 0,
                metadata JSONB NOT NULL DEFAULT 'null'::jsonb
            )
            "#
        );
        sqlx::query(&ddl)
            .execute(db.pool())
            .await
            .map_err(|e| map_sqlx_error("schema.create_table", e))?;

        for idx in [
            format!("CREATE INDEX IF NOT EXISTS idx_{table}_updated ON {table} (updated_at DESC)"),
            format!("CREATE INDEX IF NOT EXISTS idx_{table}_status ON {table} (status)"),
            format!("CREATE INDEX IF NOT EXISTS idx_{table}_name ON {table} (name text_pattern_ops)"),
            format!("CREATE INDEX IF NOT EXISTS idx_{table}_metadata ON {table} USING GIN (metadata)"),
        ] {
            sqlx::query(&idx)
                .execute(db.pool())
                .await
                .map_err(|e| map_sqlx_error("schema.create_index", e))?;
        }
    }

    // Hypertable conversion and policies need the timescaledb
    // extension; keep going without them on plain Postgres.
    for ddl in HYPERTABLES.iter().chain(POLICIES) {
        if let Err(e) = sqlx::query(ddl).execute(db.pool()).await {
            tracing::debug!(error = %e, "timescaledb statement skipped");
        }
    }

    for ddl in INDEXES {
        sqlx::query(ddl)
            .execute(db.pool())
            .await
            .map_err(|e| map_sqlx_error("schema.create_index", e))?;
    }

    info!("schema bootstrap complete");
    Ok(())
}
