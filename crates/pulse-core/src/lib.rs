//! Core types shared across the Pulse marketing analytics backend.
//!
//! This crate defines the entity model, the error taxonomy, the JSON:API
//! wire types used to talk to the upstream marketing platform, and the
//! storage traits the sync orchestrator and analytics engine are written
//! against.

pub mod daterange;
pub mod error;
pub mod jsonapi;
pub mod timeseries;
pub mod traits;
pub mod types;

pub use daterange::DateRange;
pub use error::{Error, FieldError, Result};
pub use jsonapi::{ApiDocument, ApiParams, Filter, FilterOp, FilterValue, Resource, Sort};
pub use timeseries::{AnomalyPoint, Decomposition, Interval, TimeSeriesPoint};
pub use types::{
    AggregatedMetric, CounterPatch, EntityType, Event, MarketingEntity, Metric, Profile,
    RawApiResponse, SyncState, SyncStatus,
};
