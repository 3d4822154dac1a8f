//! Entity model for the local store.
//!
//! All IDs are opaque strings assigned by the upstream platform; all
//! timestamps are UTC. Monetary amounts use fixed-point decimals, never
//! binary floats.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// The entity types the sync pipeline knows how to ingest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Campaign,
    Flow,
    Form,
    Segment,
    Metric,
    Profile,
    Event,
}

impl EntityType {
    pub const ALL: [EntityType; 7] = [
        EntityType::Campaign,
        EntityType::Flow,
        EntityType::Form,
        EntityType::Segment,
        EntityType::Metric,
        EntityType::Profile,
        EntityType::Event,
    ];

    /// The four marketing entities sharing one row shape.
    pub const MARKETING: [EntityType; 4] = [
        EntityType::Campaign,
        EntityType::Flow,
        EntityType::Form,
        EntityType::Segment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Campaign => "campaign",
            EntityType::Flow => "flow",
            EntityType::Form => "form",
            EntityType::Segment => "segment",
            EntityType::Metric => "metric",
            EntityType::Profile => "profile",
            EntityType::Event => "event",
        }
    }

    /// Table backing this entity type.
    pub fn table(&self) -> &'static str {
        match self {
            EntityType::Campaign => "campaigns",
            EntityType::Flow => "flows",
            EntityType::Form => "forms",
            EntityType::Segment => "segments",
            EntityType::Metric => "metrics",
            EntityType::Profile => "profiles",
            EntityType::Event => "events",
        }
    }

    /// Upstream collection path for this entity type.
    pub fn api_path(&self) -> &'static str {
        match self {
            EntityType::Campaign => "/api/campaigns",
            EntityType::Flow => "/api/flows",
            EntityType::Form => "/api/forms",
            EntityType::Segment => "/api/segments",
            EntityType::Metric => "/api/metrics",
            EntityType::Profile => "/api/profiles",
            EntityType::Event => "/api/events",
        }
    }

    pub fn is_marketing(&self) -> bool {
        Self::MARKETING.contains(self)
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "campaign" | "campaigns" => Ok(EntityType::Campaign),
            "flow" | "flows" => Ok(EntityType::Flow),
            "form" | "forms" => Ok(EntityType::Form),
            "segment" | "segments" => Ok(EntityType::Segment),
            "metric" | "metrics" => Ok(EntityType::Metric),
            "profile" | "profiles" => Ok(EntityType::Profile),
            "event" | "events" => Ok(EntityType::Event),
            other => Err(Error::validation(format!("unknown entity type: {}", other))),
        }
    }
}

/// A measurable event type defined by the upstream platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub integration_id: Option<String>,
    pub integration_name: Option<String>,
    pub integration_category: Option<String>,
    pub metadata: serde_json::Value,
}

/// An end customer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub external_id: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub properties: serde_json::Value,
    /// Monotonically advanced by event ingestion.
    pub last_event_at: Option<DateTime<Utc>>,
}

/// A metric occurrence on a profile at a point in time. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub metric_id: String,
    pub profile_id: String,
    pub timestamp: DateTime<Utc>,
    pub value: Option<Decimal>,
    pub properties: serde_json::Value,
    pub raw: serde_json::Value,
}

/// Campaigns, flows, forms, and segments all carry the same row shape:
/// a name, a status, lifecycle timestamps, denormalized performance
/// counters, and a metadata blob. The `entity_type` tag selects the
/// backing table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketingEntity {
    pub id: String,
    pub entity_type: EntityType,
    pub name: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub archived_at: Option<DateTime<Utc>>,
    pub sent_count: i64,
    pub open_count: i64,
    pub click_count: i64,
    pub conversion_count: i64,
    pub revenue: Decimal,
    pub metadata: serde_json::Value,
}

impl MarketingEntity {
    /// A minimal row for an entity we only know by id, used when a
    /// referent has to be created before the row that points at it.
    pub fn stub(entity_type: EntityType, id: impl Into<String>, now: DateTime<Utc>) -> Self {
        MarketingEntity {
            id: id.into(),
            entity_type,
            name: String::new(),
            status: "unknown".to_string(),
            created_at: now,
            updated_at: now,
            archived_at: None,
            sent_count: 0,
            open_count: 0,
            click_count: 0,
            conversion_count: 0,
            revenue: Decimal::ZERO,
            metadata: serde_json::Value::Null,
        }
    }
}

/// Partial update for denormalized counters. `None` leaves the stored
/// counter untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CounterPatch {
    pub sent_count: Option<i64>,
    pub open_count: Option<i64>,
    pub click_count: Option<i64>,
    pub conversion_count: Option<i64>,
    pub revenue: Option<Decimal>,
}

impl CounterPatch {
    pub fn is_empty(&self) -> bool {
        self.sent_count.is_none()
            && self.open_count.is_none()
            && self.click_count.is_none()
            && self.conversion_count.is_none()
            && self.revenue.is_none()
    }
}

/// Pre-computed bucket summary over events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedMetric {
    pub metric_id: String,
    pub bucket_start: DateTime<Utc>,
    /// Bucket width in seconds; part of the composite key.
    pub bucket_seconds: i64,
    pub count: i64,
    pub sum_value: f64,
    pub min_value: f64,
    pub max_value: f64,
    pub avg_value: f64,
}

/// State of the most recent sync run for an entity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    Idle,
    Running,
    Succeeded,
    Failed,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Idle => "idle",
            SyncState::Running => "running",
            SyncState::Succeeded => "succeeded",
            SyncState::Failed => "failed",
        }
    }
}

impl FromStr for SyncState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(SyncState::Idle),
            "running" => Ok(SyncState::Running),
            "succeeded" => Ok(SyncState::Succeeded),
            "failed" => Ok(SyncState::Failed),
            other => Err(Error::validation(format!("unknown sync state: {}", other))),
        }
    }
}

/// Per-entity-type sync bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub entity_type: EntityType,
    pub last_sync_started_at: Option<DateTime<Utc>>,
    pub last_sync_completed_at: Option<DateTime<Utc>>,
    /// Upper bound of successfully ingested upstream updates. Never
    /// decreases.
    pub last_watermark: Option<DateTime<Utc>>,
    pub state: SyncState,
    pub record_count: i64,
    pub error_message: Option<String>,
}

impl SyncStatus {
    pub fn idle(entity_type: EntityType) -> Self {
        SyncStatus {
            entity_type,
            last_sync_started_at: None,
            last_sync_completed_at: None,
            last_watermark: None,
            state: SyncState::Idle,
            record_count: 0,
            error_message: None,
        }
    }
}

/// Optional audit row for a raw upstream payload, retained for a
/// bounded window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawApiResponse {
    pub id: i64,
    pub endpoint: String,
    pub payload: serde_json::Value,
    pub received_at: DateTime<Utc>,
    pub api_version: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_type_round_trip() {
        for et in EntityType::ALL {
            assert_eq!(et.as_str().parse::<EntityType>().unwrap(), et);
        }
        assert_eq!("Campaigns".parse::<EntityType>().unwrap(), EntityType::Campaign);
        assert!("widget".parse::<EntityType>().is_err());
    }

    #[test]
    fn marketing_entities_are_tagged() {
        assert!(EntityType::Campaign.is_marketing());
        assert!(EntityType::Segment.is_marketing());
        assert!(!EntityType::Metric.is_marketing());
        assert!(!EntityType::Event.is_marketing());
    }

    #[test]
    fn counter_patch_empty() {
        assert!(CounterPatch::default().is_empty());
        let patch = CounterPatch {
            open_count: Some(3),
            ..Default::default()
        };
        assert!(!patch.is_empty());
    }
}
