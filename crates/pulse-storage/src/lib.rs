//! Postgres/TimescaleDB persistence for the Pulse backend.
//!
//! Owns the connection pool (sizing, statement timeouts, transient-error
//! retry, slow-query logging, live pool metrics), the idempotent schema
//! bootstrap, one repository per entity family, and the in-memory
//! response cache used by the HTTP layer.

pub mod cache;
pub mod db;
pub mod repos;
pub mod schema;

pub use cache::{cache_key, CacheStats, ResponseCache, ResponseCacheConfig};
pub use db::{AdvisoryLeaseStore, Database, DatabaseConfig, PoolMetrics};
pub use repos::{
    AggregatedMetricRepository, EventRepository, MarketingEntityRepository, MetricRepository,
    ProfileRepository, RawResponseRepository, SyncStatusRepository,
};
